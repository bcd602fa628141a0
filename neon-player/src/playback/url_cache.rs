//! Time-limited cache of resolved stream URLs

use crate::clock::Clock;
use neon_common::TrackKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

struct CachedUrl {
    url: String,
    resolved_at: Instant,
}

/// Stream URLs keyed by track key, expiring after a fixed lifetime
pub struct StreamUrlCache {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    entries: Mutex<HashMap<TrackKey, CachedUrl>>,
}

impl StreamUrlCache {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TrackKey, CachedUrl>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Cached URL if still fresh; expired entries are evicted on read
    pub fn get(&self, key: &TrackKey) -> Option<String> {
        let now = self.clock.now();
        let mut entries = self.entries();

        let cached = entries.get(key)?;
        if now.saturating_duration_since(cached.resolved_at) < self.ttl {
            return Some(cached.url.clone());
        }

        entries.remove(key);
        None
    }

    /// Store a fresh URL, dropping every entry that has expired meanwhile
    pub fn insert(&self, key: TrackKey, url: String) {
        let now = self.clock.now();
        let ttl = self.ttl;
        let mut entries = self.entries();
        entries.retain(|_, cached| now.saturating_duration_since(cached.resolved_at) < ttl);
        entries.insert(
            key,
            CachedUrl {
                url,
                resolved_at: now,
            },
        );
    }

    /// Forget a URL the media framework could not open
    pub fn invalidate(&self, key: &TrackKey) {
        self.entries().remove(key);
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }
}
