//! Listening history: storage, write policy and the recent playlist

pub mod database;
pub mod repository;
pub mod service;
pub mod throttle;

pub use database::HistoryDatabase;
pub use repository::{HistoryRepository, ProgressRecord, TrackHistoryEntry};
pub use service::{HistoryService, RecentlyPlayed, SaveOutcome, RECENTLY_PLAYED_NAME};
pub use throttle::WriteThrottle;
