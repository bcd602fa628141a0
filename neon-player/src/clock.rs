//! Monotonic clock seam
//!
//! Rate limiting and URL expiry read time through [`Clock`] so their policy
//! can be stepped deterministically in tests.

use std::time::Instant;

/// Source of monotonic instants
pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The process monotonic clock
#[derive(Debug, Default, Clone, Copy)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}
