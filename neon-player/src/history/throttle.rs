//! Per-track write throttle

use crate::clock::Clock;
use neon_common::TrackKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Remembers when each track was last written
///
/// A timestamp is recorded only after a write succeeds, so a failed write
/// is retried on the next tick instead of being throttled away.
pub struct WriteThrottle {
    interval: Duration,
    clock: Arc<dyn Clock>,
    last_saved: Mutex<HashMap<TrackKey, Instant>>,
}

impl WriteThrottle {
    pub fn new(interval: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            interval,
            clock,
            last_saved: Mutex::new(HashMap::new()),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<TrackKey, Instant>> {
        self.last_saved.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Whether a non-forced write for `key` is due
    pub fn should_write(&self, key: &TrackKey) -> bool {
        match self.entries().get(key) {
            Some(last) => self.clock.now().saturating_duration_since(*last) >= self.interval,
            None => true,
        }
    }

    pub fn record(&self, key: &TrackKey) {
        let now = self.clock.now();
        self.entries().insert(key.clone(), now);
    }
}
