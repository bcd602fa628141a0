//! # Neon Common Library
//!
//! Shared code for the Neon music player crates:
//! - Track identity (sources, ids, canonical track keys)
//! - History database bootstrap and schema migrations
//! - Data folder / configuration file resolution
//! - Timestamp helpers

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod time;
pub mod track;

pub use error::{Error, Result};
pub use track::{Track, TrackId, TrackKey, TrackSource};
