//! # Neon Player Library (neon-player)
//!
//! Playback core of a desktop music player: a media engine driving an
//! audible stream plus a silent analysis stream, a spectrum analyzer fed
//! from the analysis stream's PCM, listening history in SQLite, and the
//! controller tying them together.
//!
//! **Architecture:** symphonia decode, rubato resampling, cpal output,
//! realfft spectrum, sqlx for history

pub mod audio;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod history;
pub mod library;
pub mod playback;
pub mod state;

pub use error::{Error, Result};
pub use events::PlaybackEvent;
pub use state::SharedState;
