//! Stinger kiosk (stinger-kiosk) - Main entry point
//!
//! Runs the recognition loop against an image-directory capture source and
//! the default audio output device until Ctrl+C or SIGTERM.

use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use stinger_common::config::{resolve_config_path, SettingsStore, TomlConfig};
use stinger_kiosk::audio::{AudioSink, CueAudioSink, NullAudioSink};
use stinger_kiosk::capture::ImageDirSource;
use stinger_kiosk::detector::{FaceDetector, UnavailableDetector};
use stinger_kiosk::engine::{self, KioskContext, LoopOptions};
use stinger_kiosk::gallery::{load_gallery, Gallery};
use stinger_kiosk::SharedState;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(60);

/// Command-line arguments for stinger-kiosk
#[derive(Parser, Debug)]
#[command(name = "stinger-kiosk")]
#[command(about = "Face-recognition kiosk that plays a cue for each known visitor")]
#[command(version)]
struct Args {
    /// Bootstrap TOML file (falls back to STINGER_CONFIG, then the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory of images replayed in place of a camera
    #[arg(long, env = "STINGER_FRAMES_DIR")]
    frames: Option<PathBuf>,

    /// Gallery directory, overriding `people_dir` from the config file
    #[arg(long, env = "STINGER_PEOPLE_DIR")]
    people: Option<PathBuf>,

    /// Audio output device name (default device if omitted)
    #[arg(long, env = "STINGER_AUDIO_DEVICE")]
    audio_device: Option<String>,
}

fn init_tracing(config: &TomlConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "stinger_kiosk={level},stinger_common={level}",
            level = config.logging.level
        ))
    });

    let file_layer = match &config.logging.file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                tracing_subscriber::fmt::layer()
                    .with_ansi(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config_path = resolve_config_path(args.config.as_deref());
    let config = TomlConfig::load_or_default(config_path.as_deref());
    init_tracing(&config)?;

    info!("Starting Stinger kiosk");
    if let Some(path) = &config_path {
        info!("Configuration: {}", path.display());
    }

    let settings = Arc::new(
        SettingsStore::open(config.settings_path()).context("Failed to load runtime settings")?,
    );
    let snapshot = settings.snapshot();

    // No face model is linked into this binary; hosts embedding the library
    // supply their own FaceDetector
    let detector: Arc<dyn FaceDetector> = Arc::new(UnavailableDetector);

    let people_dir = args.people.unwrap_or_else(|| config.people_dir.clone());
    let gallery = if detector.is_ready() {
        load_gallery(&people_dir, detector.as_ref(), &snapshot)
            .with_context(|| format!("Failed to load gallery from {}", people_dir.display()))?
    } else {
        warn!("Face detector not ready; starting with an empty gallery");
        Gallery::new()
    };
    info!("Gallery: {} identities", gallery.len());

    let audio: Arc<dyn AudioSink> = match CueAudioSink::new(args.audio_device) {
        Ok(sink) => Arc::new(sink),
        Err(e) => {
            warn!("Audio output unavailable, cues will be skipped: {}", e);
            Arc::new(NullAudioSink)
        }
    };

    let frames_dir = args.frames.unwrap_or_else(|| config.data_dir.join("frames"));
    info!(
        "Capture: image directory {} (camera {} at {}x{} requires a platform driver)",
        frames_dir.display(),
        config.camera.device,
        config.camera.width,
        config.camera.height
    );
    let capture = Box::new(ImageDirSource::new(frames_dir));

    let state = Arc::new(SharedState::new());
    let ctx = KioskContext {
        state: Arc::clone(&state),
        gallery: gallery.into_shared(),
        detector,
        audio,
        settings,
    };

    let options = LoopOptions::default();
    let Some(kiosk) = engine::start(ctx, capture, options) else {
        info!("Nothing to run; exiting");
        return Ok(());
    };

    let status_state = Arc::clone(&state);
    let status_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(STATUS_LOG_INTERVAL);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let status = status_state.get_status();
            info!(
                "Status: running={} camera={} fps={:.1} frames={} queued_events={}",
                status.running,
                status.camera_connected,
                status.fps,
                status.frame_count,
                status_state.queued_events()
            );
        }
    });

    shutdown_signal().await;
    engine::stop(&state);
    status_task.abort();

    // The loop itself bounds its wait on in-flight recognition
    let grace = options.shutdown_timeout + Duration::from_secs(1);
    match tokio::time::timeout(grace, kiosk).await {
        Ok(Ok(())) => info!("Kiosk loop shut down cleanly"),
        Ok(Err(e)) => warn!("Kiosk loop task failed: {}", e),
        Err(_) => warn!("Kiosk loop did not stop within {:?}", grace),
    }

    info!("Shutdown complete");
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
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
