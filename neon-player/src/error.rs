//! Error types for neon-player
//!
//! Failures below the PCM callback boundary are swallowed there; everything
//! above it is reported through these variants so callers can tell "nothing
//! happened" apart from success.

use neon_common::TrackKey;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for neon-player
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Errors bubbled up from the shared crate
    #[error(transparent)]
    Common(#[from] neon_common::Error),

    /// Media framework could not load or start a source
    #[error("Media engine error: {0}")]
    Engine(String),

    /// Audio decoding errors
    #[error("Audio decode error: {0}")]
    Decode(String),

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Track is marked downloaded but its local file is gone
    #[error("Local file missing for {key}: {path}")]
    SourceNotFound { key: TrackKey, path: PathBuf },

    /// Catalog resolver returned no stream URL
    #[error("No stream available for {0}")]
    StreamUnavailable(TrackKey),

    /// Invalid state for operation
    #[error("Playback error: {0}")]
    Playback(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience Result type using neon-player Error
pub type Result<T> = std::result::Result<T, Error>;
