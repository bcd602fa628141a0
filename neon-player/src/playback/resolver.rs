//! Playable source resolution
//!
//! Downloaded tracks play from the music folder. Everything else is
//! streamed from a URL the track's catalog hands out, cached for a while
//! since resolving takes a network round trip.

use crate::catalog::CatalogSet;
use crate::clock::{Clock, MonotonicClock};
use crate::error::{Error, Result};
use crate::library::{TrackLibrary, TRACK_EXTENSIONS};
use crate::playback::url_cache::StreamUrlCache;
use neon_common::{Track, TrackKey};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Where a track will be played from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedSource {
    LocalFile(PathBuf),
    Stream(String),
}

impl ResolvedSource {
    /// Path or URL in the form the media engine loads
    pub fn media_source(&self) -> String {
        match self {
            ResolvedSource::LocalFile(path) => path.to_string_lossy().into_owned(),
            ResolvedSource::Stream(url) => url.clone(),
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self, ResolvedSource::Stream(_))
    }
}

pub struct SourceResolver {
    library: Arc<TrackLibrary>,
    catalogs: CatalogSet,
    cache: StreamUrlCache,
}

impl SourceResolver {
    pub fn new(library: Arc<TrackLibrary>, catalogs: CatalogSet, url_ttl: Duration) -> Self {
        Self::with_clock(library, catalogs, url_ttl, Arc::new(MonotonicClock))
    }

    pub fn with_clock(
        library: Arc<TrackLibrary>,
        catalogs: CatalogSet,
        url_ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            library,
            catalogs,
            cache: StreamUrlCache::new(url_ttl, clock),
        }
    }

    pub fn library(&self) -> &Arc<TrackLibrary> {
        &self.library
    }

    /// Local file for downloaded tracks, otherwise a (cached) stream URL
    pub async fn resolve(&self, track: &Track) -> Result<ResolvedSource> {
        let key = track.key();

        if track.downloaded {
            return match self.library.locate(track) {
                Some(path) => {
                    debug!("Playing {} from {}", key, path.display());
                    Ok(ResolvedSource::LocalFile(path))
                }
                None => Err(Error::SourceNotFound {
                    path: self.library.track_path(track, TRACK_EXTENSIONS[0]),
                    key,
                }),
            };
        }

        if let Some(url) = self.cache.get(&key) {
            debug!("Using cached stream URL for {}", key);
            return Ok(ResolvedSource::Stream(url));
        }

        let url = self
            .catalogs
            .resolve_stream_url(track)
            .await
            .ok_or_else(|| Error::StreamUnavailable(key.clone()))?;

        self.cache.insert(key, url.clone());
        Ok(ResolvedSource::Stream(url))
    }

    /// Drop a cached URL that failed to play
    pub fn invalidate(&self, key: &TrackKey) {
        self.cache.invalidate(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FixedUrlResolver, StreamResolver};
    use futures::future::BoxFuture;
    use neon_common::TrackSource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl StreamResolver for CountingResolver {
        fn resolve_stream_url<'a>(
            &'a self,
            track: &'a Track,
        ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            let url = format!("https://cdn.example.com/{}/{}", track.id, n);
            Box::pin(async move { Ok(Some(url)) })
        }
    }

    #[tokio::test]
    async fn test_stream_url_cached_until_invalidated() {
        let dir = tempfile::tempdir().unwrap();
        let counting = Arc::new(CountingResolver {
            calls: AtomicUsize::new(0),
        });
        let resolver = SourceResolver::new(
            Arc::new(TrackLibrary::new(dir.path())),
            CatalogSet::new().with_resolver(TrackSource::Youtube, counting.clone()),
            Duration::from_secs(1800),
        );
        let track = Track::new(TrackSource::Youtube, "abc", "Song", "Artist");

        let first = resolver.resolve(&track).await.unwrap();
        let second = resolver.resolve(&track).await.unwrap();
        assert_eq!(first, second);
        assert!(first.is_stream());
        assert_eq!(counting.calls.load(Ordering::SeqCst), 1);

        resolver.invalidate(&track.key());
        let third = resolver.resolve(&track).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(counting.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_downloaded_track_plays_local_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("5_Song_Artist.mp3");
        std::fs::write(&path, b"x").unwrap();

        let resolver = SourceResolver::new(
            Arc::new(TrackLibrary::new(dir.path())),
            CatalogSet::new(),
            Duration::from_secs(60),
        );
        let track = Track::new(TrackSource::Yandex, 5, "Song", "Artist").with_downloaded(true);

        assert_eq!(
            resolver.resolve(&track).await.unwrap(),
            ResolvedSource::LocalFile(path)
        );
    }

    #[tokio::test]
    async fn test_missing_download_and_missing_stream() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = SourceResolver::new(
            Arc::new(TrackLibrary::new(dir.path())),
            CatalogSet::new().with_resolver(TrackSource::Yandex, Arc::new(FixedUrlResolver::new())),
            Duration::from_secs(60),
        );

        let downloaded = Track::new(TrackSource::Yandex, 6, "Gone", "Artist").with_downloaded(true);
        match resolver.resolve(&downloaded).await {
            Err(Error::SourceNotFound { key, path }) => {
                assert_eq!(key.as_str(), "yandex:6");
                assert_eq!(path, dir.path().join("6_Gone_Artist.mp3"));
            }
            other => panic!("unexpected: {:?}", other),
        }

        let streamed = Track::new(TrackSource::Yandex, 7, "Song", "Artist");
        assert!(matches!(
            resolver.resolve(&streamed).await,
            Err(Error::StreamUnavailable(_))
        ));
    }
}
