//! Track identity
//!
//! A track comes from one of two external catalogs. Numeric ids belong to the
//! streaming service, opaque string ids to the video-sharing music API. All
//! history bookkeeping is keyed by the canonical `"{source}:{id}"` string.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::{Error, Result};

/// Catalog a track was found in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackSource {
    /// Streaming service catalog (numeric ids)
    Yandex,
    /// Video-sharing music API (opaque string ids)
    Youtube,
}

impl TrackSource {
    /// Stable lowercase name used in track keys and the history table
    pub fn as_str(&self) -> &'static str {
        match self {
            TrackSource::Yandex => "yandex",
            TrackSource::Youtube => "youtube",
        }
    }
}

impl fmt::Display for TrackSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrackSource {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "yandex" => Ok(TrackSource::Yandex),
            "youtube" => Ok(TrackSource::Youtube),
            other => Err(Error::InvalidInput(format!("Unknown track source: {}", other))),
        }
    }
}

/// Source-dependent track identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TrackId {
    Numeric(i64),
    Opaque(String),
}

impl TrackId {
    /// Interpret a raw id string the way the given catalog issues ids
    ///
    /// Streaming-service ids are numeric when they parse as such and print
    /// back unchanged; everything else (leading zeros included) is kept
    /// verbatim, so the track key survives a round trip.
    pub fn parse_for(source: TrackSource, raw: &str) -> Self {
        match source {
            TrackSource::Yandex if !raw.is_empty() && raw.bytes().all(|b| b.is_ascii_digit()) => {
                match raw.parse::<i64>() {
                    Ok(id) if id.to_string() == raw => TrackId::Numeric(id),
                    _ => TrackId::Opaque(raw.to_string()),
                }
            }
            _ => TrackId::Opaque(raw.to_string()),
        }
    }
}

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrackId::Numeric(id) => write!(f, "{}", id),
            TrackId::Opaque(id) => f.write_str(id),
        }
    }
}

impl From<i64> for TrackId {
    fn from(id: i64) -> Self {
        TrackId::Numeric(id)
    }
}

impl From<i32> for TrackId {
    fn from(id: i32) -> Self {
        TrackId::Numeric(i64::from(id))
    }
}

impl From<String> for TrackId {
    fn from(id: String) -> Self {
        TrackId::Opaque(id)
    }
}

impl From<&str> for TrackId {
    fn from(id: &str) -> Self {
        TrackId::Opaque(id.to_string())
    }
}

/// Canonical `"{source}:{id}"` key, primary key of the history table
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackKey(String);

impl TrackKey {
    pub fn new(source: TrackSource, id: &TrackId) -> Self {
        TrackKey(format!("{}:{}", source, id))
    }

    /// Wrap a key read back from storage without validating it
    pub fn from_raw(raw: impl Into<String>) -> Self {
        TrackKey(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Split into `(source, id)` on the first colon
    ///
    /// Without a colon the whole key is the id and the source is `None`.
    /// Ids from the streaming service are bare numbers, so keys written by
    /// older builds may lack the prefix.
    pub fn split(&self) -> (Option<&str>, &str) {
        match self.0.split_once(':') {
            Some((source, id)) if !source.is_empty() => (Some(source), id),
            Some((_, id)) => (None, id),
            None => (None, self.0.as_str()),
        }
    }

    /// Parse back into typed parts, using `fallback` when the key carries no
    /// recognizable source
    pub fn parse(&self, fallback: TrackSource) -> (TrackSource, TrackId) {
        let (source, raw_id) = self.split();
        let source = source
            .and_then(|s| s.parse::<TrackSource>().ok())
            .unwrap_or(fallback);
        (source, TrackId::parse_for(source, raw_id))
    }
}

impl fmt::Display for TrackKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A playable item from one of the catalogs
///
/// Equality and hashing use the track key only. Comparing by title and author
/// is available separately through [`Track::same_display`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub title: String,
    pub author: String,
    pub source: TrackSource,
    /// Whether a local copy exists in the music folder
    #[serde(default)]
    pub downloaded: bool,
    /// Denormalized from history for display
    #[serde(default)]
    pub listen_count: i64,
}

impl Track {
    pub fn new(
        source: TrackSource,
        id: impl Into<TrackId>,
        title: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            author: author.into(),
            source,
            downloaded: false,
            listen_count: 0,
        }
    }

    pub fn with_downloaded(mut self, downloaded: bool) -> Self {
        self.downloaded = downloaded;
        self
    }

    pub fn key(&self) -> TrackKey {
        TrackKey::new(self.source, &self.id)
    }

    /// Loose match on display fields, for callers that only hold a
    /// title/author pair from a foreign representation
    pub fn same_display(&self, other: &Track) -> bool {
        self.title == other.title && self.author == other.author
    }
}

impl PartialEq for Track {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for Track {}

impl Hash for Track {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for Track {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} : {} - {}", self.source, self.title, self.author)
    }
}
