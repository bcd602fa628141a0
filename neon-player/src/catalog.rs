//! Stream URL resolution per catalog
//!
//! Catalog clients live outside this crate; they plug in through
//! [`StreamResolver`]. A resolver error and a missing URL are reported the
//! same way to the player: no stream.

use futures::future::BoxFuture;
use neon_common::{Track, TrackKey, TrackSource};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Turns a catalog track into a playable URL
pub trait StreamResolver: Send + Sync {
    fn resolve_stream_url<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>>;
}

/// One resolver per catalog
#[derive(Clone, Default)]
pub struct CatalogSet {
    resolvers: HashMap<TrackSource, Arc<dyn StreamResolver>>,
}

impl CatalogSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_resolver(mut self, source: TrackSource, resolver: Arc<dyn StreamResolver>) -> Self {
        self.register(source, resolver);
        self
    }

    pub fn register(&mut self, source: TrackSource, resolver: Arc<dyn StreamResolver>) {
        self.resolvers.insert(source, resolver);
    }

    pub fn has_resolver(&self, source: TrackSource) -> bool {
        self.resolvers.contains_key(&source)
    }

    /// Ask the track's catalog for a URL; failures are logged and yield `None`
    pub async fn resolve_stream_url(&self, track: &Track) -> Option<String> {
        let Some(resolver) = self.resolvers.get(&track.source) else {
            warn!("No stream resolver registered for {}", track.source);
            return None;
        };

        match resolver.resolve_stream_url(track).await {
            Ok(Some(url)) if !url.trim().is_empty() => Some(url),
            Ok(_) => None,
            Err(e) => {
                warn!("Stream resolution failed for {}: {:#}", track.key(), e);
                None
            }
        }
    }
}

/// Resolver over URLs known up front, keyed by track key
#[derive(Debug, Clone, Default)]
pub struct FixedUrlResolver {
    urls: HashMap<TrackKey, String>,
}

impl FixedUrlResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, key: TrackKey, url: impl Into<String>) -> Self {
        self.urls.insert(key, url.into());
        self
    }
}

impl StreamResolver for FixedUrlResolver {
    fn resolve_stream_url<'a>(
        &'a self,
        track: &'a Track,
    ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
        let url = self.urls.get(&track.key()).cloned();
        Box::pin(async move { Ok(url) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingResolver;

    impl StreamResolver for FailingResolver {
        fn resolve_stream_url<'a>(
            &'a self,
            _track: &'a Track,
        ) -> BoxFuture<'a, anyhow::Result<Option<String>>> {
            Box::pin(async { Err(anyhow::anyhow!("catalog offline")) })
        }
    }

    #[tokio::test]
    async fn test_resolves_through_track_catalog() {
        let track = Track::new(TrackSource::Youtube, "abc", "Song", "Artist");
        let catalogs = CatalogSet::new().with_resolver(
            TrackSource::Youtube,
            Arc::new(FixedUrlResolver::new().with_url(track.key(), "https://cdn.example.com/abc.m4a")),
        );

        assert_eq!(
            catalogs.resolve_stream_url(&track).await.as_deref(),
            Some("https://cdn.example.com/abc.m4a")
        );

        let other = Track::new(TrackSource::Youtube, "zzz", "Other", "Artist");
        assert_eq!(catalogs.resolve_stream_url(&other).await, None);
    }

    #[tokio::test]
    async fn test_errors_and_missing_catalog_yield_none() {
        let catalogs = CatalogSet::new().with_resolver(TrackSource::Yandex, Arc::new(FailingResolver));

        let track = Track::new(TrackSource::Yandex, 1, "Song", "Artist");
        assert_eq!(catalogs.resolve_stream_url(&track).await, None);

        let track = Track::new(TrackSource::Youtube, "x", "Song", "Artist");
        assert!(!catalogs.has_resolver(TrackSource::Youtube));
        assert_eq!(catalogs.resolve_stream_url(&track).await, None);
    }
}
