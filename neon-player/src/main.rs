//! neon-player - command-line front end for the playback core
//!
//! `play` streams or plays a downloaded track until it ends or the process
//! is interrupted, logging the analysis spectrum peak as it goes. `recent`
//! prints the "Recently played" playlist built from listening history.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use neon_common::config::{find_config_file, resolve_data_folder, CONFIG_FILE_NAME};
use neon_common::{Track, TrackKey, TrackSource};
use neon_player::audio::{MediaEngine, NativeBackend, SpectrumAnalyzer};
use neon_player::catalog::{CatalogSet, FixedUrlResolver};
use neon_player::config::PlayerConfig;
use neon_player::history::{HistoryDatabase, HistoryService};
use neon_player::library::{DownloadIndex, TrackLibrary};
use neon_player::playback::{PlaybackController, SourceResolver};
use neon_player::PlaybackEvent;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// How often the spectrum peak is logged while playing
const SPECTRUM_LOG_INTERVAL: Duration = Duration::from_secs(2);

/// Command-line arguments for neon-player
#[derive(Parser, Debug)]
#[command(name = "neon-player")]
#[command(about = "Music playback core with listening history")]
#[command(version)]
struct Args {
    /// Data folder holding the history database and downloaded music
    #[arg(short, long, env = "NEON_DATA_FOLDER")]
    data_folder: Option<PathBuf>,

    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, env = "NEON_CONFIG")]
    config: Option<PathBuf>,

    /// History database path, overrides the configuration file
    #[arg(long)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Play one track until it ends or Ctrl+C
    Play {
        /// Track key, "youtube:<id>" or "yandex:<id>"
        track_key: String,

        #[arg(long, default_value = "")]
        title: String,

        #[arg(long, default_value = "")]
        author: String,

        /// Stream URL to use when the track is not downloaded
        #[arg(long)]
        url: Option<String>,

        /// Output device name
        #[arg(long)]
        device: Option<String>,
    },

    /// Print the "Recently played" playlist
    Recent {
        /// Number of tracks (defaults to the configured size)
        #[arg(short, long)]
        limit: Option<i64>,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// List audio output devices
    Devices,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let data_folder = resolve_data_folder(args.data_folder.as_deref(), "NEON_DATA_FOLDER");
    let config_path = args
        .config
        .clone()
        .or_else(|| find_config_file().ok())
        .unwrap_or_else(|| data_folder.join(CONFIG_FILE_NAME));

    // Read before logging starts so the configured level applies
    let loaded = PlayerConfig::load(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let config_found = loaded.is_some();
    let mut config = loaded.unwrap_or_default().resolve_paths(&data_folder);
    if let Some(database) = args.database {
        config.database_path = database;
    }

    let default_filter = format!(
        "neon_player={level},neon_common={level}",
        level = config.logging.level
    );
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!(
        "Starting neon-player v{} [{}] built {} ({})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_HASH"),
        env!("BUILD_TIMESTAMP"),
        env!("BUILD_PROFILE")
    );
    info!("Data folder: {}", data_folder.display());
    if config_found {
        info!("Loaded configuration from {}", config_path.display());
    } else {
        info!("No configuration at {}, using defaults", config_path.display());
    }

    match args.command {
        Command::Play {
            track_key,
            title,
            author,
            url,
            device,
        } => {
            if device.is_some() {
                config.playback.output_device = device;
            }
            play(config, TrackKey::from_raw(track_key), title, author, url).await
        }
        Command::Recent { limit, json } => recent(config, limit, json).await,
        Command::Devices => {
            for name in neon_player::audio::output::AudioOutput::list_devices()? {
                println!("{}", name);
            }
            Ok(())
        }
    }
}

async fn play(
    config: PlayerConfig,
    key: TrackKey,
    title: String,
    author: String,
    url: Option<String>,
) -> Result<()> {
    let library = Arc::new(TrackLibrary::new(&config.music_dir));

    let (source, id) = key.parse(TrackSource::Youtube);
    let downloaded = library.is_downloaded(&id.to_string());
    let track = Track::new(source, id, title, author).with_downloaded(downloaded);
    info!("Track {} (downloaded: {})", track.key(), downloaded);

    let backend = Arc::new(
        NativeBackend::new(config.playback.output_device.clone())
            .context("Failed to initialize audio output")?,
    );
    let engine = Arc::new(
        MediaEngine::new(backend, config.playback.analysis_start_delay())
            .context("Failed to create media engine")?,
    );

    let analyzer = SpectrumAnalyzer::new(&config.analyzer);
    analyzer.attach(engine.analysis_player());

    let db = Arc::new(HistoryDatabase::open(&config.database_path));
    let history = Arc::new(HistoryService::new(db, &config.history, library.clone()));

    let mut catalogs = CatalogSet::new();
    if let Some(url) = url {
        catalogs.register(
            track.source,
            Arc::new(FixedUrlResolver::new().with_url(track.key(), url)),
        );
    }
    let resolver = Arc::new(SourceResolver::new(
        library,
        catalogs,
        config.playback.stream_url_ttl(),
    ));

    let controller = PlaybackController::new(engine, history, resolver, config.playback.clone());
    controller.start();

    let mut events = controller.subscribe_events();
    if let Err(e) = controller.play_track(track).await {
        controller.shutdown().await;
        return Err(e).context("Playback failed to start");
    }

    let mut spectrum_tick = tokio::time::interval(SPECTRUM_LOG_INTERVAL);
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = events.recv() => match event {
                Ok(PlaybackEvent::TrackFinished { track_key }) => {
                    info!("Finished {}", track_key);
                    break;
                }
                Ok(PlaybackEvent::PlaybackFailed { track_key, reason }) => {
                    warn!("Playback of {} failed: {}", track_key, reason);
                    break;
                }
                Ok(PlaybackEvent::PositionRestored { position_ms, .. }) => {
                    info!("Resumed at {}", format_ms(position_ms));
                }
                Ok(_) => {}
                Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => break,
            },
            _ = spectrum_tick.tick() => {
                let position = format_ms(controller.position_ms());
                let duration = format_ms(controller.duration_ms());
                match analyzer.get_fft().and_then(|s| s.peak_frequency()) {
                    Some(peak) => info!("{} / {}  peak {:.0} Hz", position, duration, peak),
                    None => info!("{} / {}", position, duration),
                }
            }
        }
    }

    analyzer.detach();
    controller.shutdown().await;
    info!("Playback stopped");
    Ok(())
}

async fn recent(config: PlayerConfig, limit: Option<i64>, json: bool) -> Result<()> {
    let library = Arc::new(TrackLibrary::new(&config.music_dir));
    let db = Arc::new(HistoryDatabase::open(&config.database_path));
    let history = HistoryService::new(db, &config.history, library);

    let playlist = match limit {
        Some(limit) => history.get_recent_playlist(limit).await,
        None => history.get_default_recent_playlist().await,
    };
    history.close().await;

    let Some(playlist) = playlist.context("Failed to read listening history")? else {
        println!("No listening history yet");
        return Ok(());
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&playlist)?);
        return Ok(());
    }

    println!("{}", playlist.name);
    for (index, track) in playlist.tracks.iter().enumerate() {
        println!(
            "{:>3}. {} [{}] plays: {}{}",
            index + 1,
            track,
            track.key(),
            track.listen_count,
            if track.downloaded { ", downloaded" } else { "" }
        );
    }
    Ok(())
}

fn format_ms(ms: u64) -> String {
    let secs = ms / 1000;
    format!("{}:{:02}", secs / 60, secs % 60)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                warn!("Failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
