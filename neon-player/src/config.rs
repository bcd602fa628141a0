//! Configuration for neon-player
//!
//! Bootstrap settings come from a TOML file. Every field has a built-in
//! default, so a missing file or a partial file both start cleanly.
//!
//! # Settings Sources Priority
//!
//! 1. Command-line arguments (--data-folder, --database)
//! 2. Environment variables (NEON_DATA_FOLDER, NEON_CONFIG)
//! 3. TOML configuration file
//! 4. Built-in defaults (code constants)

use crate::error::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Complete player configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// SQLite history database (relative paths resolve against the data folder)
    pub database_path: PathBuf,

    /// Folder holding downloaded tracks
    pub music_dir: PathBuf,

    pub playback: PlaybackSettings,
    pub analyzer: AnalyzerSettings,
    pub history: HistorySettings,
    pub logging: LoggingConfig,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("player_history.db"),
            music_dir: PathBuf::from("music"),
            playback: PlaybackSettings::default(),
            analyzer: AnalyzerSettings::default(),
            history: HistorySettings::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Timing of the playback controller and media engine
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlaybackSettings {
    /// Delay between starting the audible stream and the analysis stream
    pub analysis_start_delay_ms: u64,

    /// Settle time before a saved resume position is applied
    pub resume_settle_delay_ms: u64,

    /// Periodic progress save interval while playing
    pub progress_interval_ms: u64,

    /// Lifetime of a resolved stream URL
    pub stream_url_ttl_secs: u64,

    /// Volume applied at startup (0-100)
    pub initial_volume: u8,

    /// Output device name (None = system default)
    pub output_device: Option<String>,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            analysis_start_delay_ms: 1500,
            resume_settle_delay_ms: 350,
            progress_interval_ms: 5000,
            stream_url_ttl_secs: 30 * 60,
            initial_volume: 75,
            output_device: None,
        }
    }
}

impl PlaybackSettings {
    pub fn analysis_start_delay(&self) -> Duration {
        Duration::from_millis(self.analysis_start_delay_ms)
    }

    pub fn resume_settle_delay(&self) -> Duration {
        Duration::from_millis(self.resume_settle_delay_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms.max(1))
    }

    pub fn stream_url_ttl(&self) -> Duration {
        Duration::from_secs(self.stream_url_ttl_secs)
    }
}

/// PCM capture and FFT parameters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerSettings {
    pub sample_rate: u32,
    pub channels: u16,
    /// Upper bound on the FFT window length
    pub samples_per_read: usize,
    /// Seconds of audio retained in the capture buffer
    pub buffer_duration_secs: f32,
    /// Minimum mono samples needed before a spectrum is produced
    pub min_fft_size: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 2,
            samples_per_read: 1024,
            buffer_duration_secs: 2.0,
            min_fft_size: 32,
        }
    }
}

/// History write policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HistorySettings {
    /// Minimum seconds between non-forced writes for the same track
    pub save_interval_secs: f64,
    /// Default size of the "recently played" playlist
    pub recent_limit: i64,
}

impl Default for HistorySettings {
    fn default() -> Self {
        Self {
            save_interval_secs: 5.0,
            recent_limit: 24,
        }
    }
}

impl HistorySettings {
    /// Throttle interval, never below one second
    pub fn save_interval(&self) -> Duration {
        Duration::from_secs_f64(self.save_interval_secs.max(1.0))
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

impl PlayerConfig {
    /// Parse configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid config: {}", e)))
    }

    /// Load configuration from a TOML file
    ///
    /// A missing file is not an error: `None` tells the caller to use
    /// defaults. Runs before logging is set up, so it logs nothing itself.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content).map(Some)
    }

    /// Anchor relative paths at the data folder
    pub fn resolve_paths(mut self, data_folder: &Path) -> Self {
        if self.database_path.is_relative() {
            self.database_path = data_folder.join(&self.database_path);
        }
        if self.music_dir.is_relative() {
            self.music_dir = data_folder.join(&self.music_dir);
        }
        self
    }
}
