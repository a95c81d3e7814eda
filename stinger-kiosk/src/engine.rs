//! Kiosk orchestration loop
//!
//! One task owns the capture source and runs a fixed-rate tick:
//!
//! 1. Ensure the camera is connected, reconnecting with a cooldown
//! 2. Read a frame (skip the tick on failure)
//! 3. Collect a finished recognition, feed the cadence controller, apply
//!    the cooldown policy, play cues and publish faces and events
//! 4. Dispatch a new recognition when the interval elapsed and none is
//!    in flight
//! 5. Draw the last known faces onto the display frame
//! 6. Encode and publish the display frame
//! 7. Sleep out the rest of the frame period
//!
//! Every sleep, including reconnect backoff, ends early once the loop is
//! stopped.
//!
//! Recognition never runs on this task; see [`RecognitionDispatcher`].

use crate::audio::AudioSink;
use crate::cadence::{CadenceConfig, CadenceController};
use crate::capture::{reconnect, CaptureSource, DEFAULT_RECONNECT_ATTEMPTS, DEFAULT_RECONNECT_DELAY};
use crate::detector::FaceDetector;
use crate::dispatcher::{RecognitionDispatcher, RecognitionOutcome};
use crate::frame::{draw_overlays, encode_jpeg, mirror_horizontal, JPEG_QUALITY};
use crate::gallery::SharedGallery;
use crate::state::SharedState;
use std::sync::Arc;
use std::time::Duration;
use stinger_common::config::{RuntimeSettings, SettingsStore};
use stinger_common::events::{MatchResult, RecognitionEvent, TriggeredCue};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// Everything the loop shares with the rest of the process
#[derive(Clone)]
pub struct KioskContext {
    pub state: Arc<SharedState>,
    pub gallery: SharedGallery,
    pub detector: Arc<dyn FaceDetector>,
    pub audio: Arc<dyn AudioSink>,
    pub settings: Arc<SettingsStore>,
}

/// Loop timing knobs that are not runtime settings
#[derive(Debug, Clone, Copy)]
pub struct LoopOptions {
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Sleep after a failed reconnect cycle
    pub reconnect_cooldown: Duration,
    /// Sleep after a failed frame read
    pub read_retry_delay: Duration,
    pub min_sleep: Duration,
    pub settings_refresh_interval: Duration,
    pub perf_log_interval: Duration,
    /// Upper bound on waiting for in-flight recognition at shutdown
    pub shutdown_timeout: Duration,
}

impl Default for LoopOptions {
    fn default() -> Self {
        Self {
            reconnect_attempts: DEFAULT_RECONNECT_ATTEMPTS,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            reconnect_cooldown: Duration::from_secs(5),
            read_retry_delay: Duration::from_millis(100),
            min_sleep: Duration::from_millis(1),
            settings_refresh_interval: Duration::from_secs(1),
            perf_log_interval: Duration::from_secs(30),
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Sleep for the remainder of the frame period, never less than `min_sleep`
pub fn frame_sleep(period: Duration, elapsed: Duration, min_sleep: Duration) -> Duration {
    period.saturating_sub(elapsed).max(min_sleep)
}

pub struct KioskLoop {
    ctx: KioskContext,
    capture: Box<dyn CaptureSource>,
    options: LoopOptions,
    dispatcher: RecognitionDispatcher,
    cadence: CadenceController,
    settings: RuntimeSettings,
    last_dispatch: Option<Instant>,
    last_faces: Vec<MatchResult>,
    last_settings_check: Instant,
    perf_window_start: Instant,
    perf_window_frames: u64,
}

impl KioskLoop {
    /// Build a loop and mark the kiosk running
    ///
    /// Clearing `running` on the shared state (see [`stop`]) ends the loop
    /// at its next tick.
    pub fn new(ctx: KioskContext, capture: Box<dyn CaptureSource>, options: LoopOptions) -> Self {
        let settings = ctx.settings.snapshot();
        let cadence = CadenceController::new(CadenceConfig::from_settings(&settings));
        let dispatcher = RecognitionDispatcher::new(Arc::clone(&ctx.detector), Arc::clone(&ctx.gallery));
        ctx.state.set_running(true);

        let now = Instant::now();
        Self {
            ctx,
            capture,
            options,
            dispatcher,
            cadence,
            settings,
            last_dispatch: None,
            last_faces: Vec::new(),
            last_settings_check: now,
            perf_window_start: now,
            perf_window_frames: 0,
        }
    }

    pub async fn run(mut self) {
        info!("Starting kiosk loop");
        if self.settings.low_power_mode {
            info!("Low power mode enabled - adaptive recognition cadence active");
        }

        if let Err(e) = self.capture.open() {
            error!("Failed to open camera, kiosk will retry: {}", e);
        }
        self.ctx.state.set_camera_connected(self.capture.is_connected());

        while self.ctx.state.is_running() {
            self.tick().await;
        }

        self.shutdown().await;
    }

    async fn tick(&mut self) {
        let tick_start = Instant::now();
        self.refresh_settings(tick_start).await;

        // 1. Connectivity
        if !self.capture.is_connected() {
            self.ctx.state.set_camera_connected(false);
            warn!("Camera disconnected, attempting reconnect");
            let state = Arc::clone(&self.ctx.state);
            let reconnected = tokio::select! {
                reconnected = reconnect(
                    self.capture.as_mut(),
                    self.options.reconnect_attempts,
                    self.options.reconnect_delay,
                ) => reconnected,
                _ = state.wait_stopped() => return,
            };
            if !reconnected {
                self.pause(self.options.reconnect_cooldown).await;
                return;
            }
            info!("Camera reconnected");
            self.ctx.state.set_camera_connected(true);
        }

        // 2. Capture
        let Some(mut frame) = self.capture.read() else {
            self.ctx.state.set_camera_connected(false);
            self.pause(self.options.read_retry_delay).await;
            return;
        };
        self.ctx.state.set_camera_connected(true);

        // 3. Collect
        match self.dispatcher.poll_completed() {
            Some(Ok(outcome)) => self.publish_outcome(outcome),
            Some(Err(e)) => error!("Recognition error: {}", e),
            None => {}
        }

        // 4. Dispatch
        let due = self
            .last_dispatch
            .map_or(true, |at| tick_start.duration_since(at) >= self.cadence.interval());
        if due
            && !self.dispatcher.is_busy()
            && self.dispatcher.try_dispatch(frame.clone(), &self.settings)
        {
            self.last_dispatch = Some(tick_start);
        }

        // 5. Overlay (display copy only)
        if self.settings.mirror_feed {
            mirror_horizontal(&mut frame);
        }
        draw_overlays(&mut frame, &self.last_faces, self.settings.mirror_feed);

        // 6. Publish
        match encode_jpeg(&frame, JPEG_QUALITY) {
            Ok(jpeg) => self.ctx.state.set_frame(jpeg),
            Err(e) => warn!("Failed to encode frame: {}", e),
        }

        self.perf_window_frames += 1;
        self.log_performance(tick_start);

        // 7. Pace
        let sleep = frame_sleep(
            self.settings.frame_period(),
            tick_start.elapsed(),
            self.options.min_sleep,
        );
        self.pause(sleep).await;
    }

    /// Sleep for `duration`, waking early if the loop is stopped
    async fn pause(&self, duration: Duration) {
        tokio::select! {
            _ = tokio::time::sleep(duration) => {}
            _ = self.ctx.state.wait_stopped() => {}
        }
    }

    fn publish_outcome(&mut self, outcome: RecognitionOutcome) {
        let RecognitionOutcome {
            matches,
            processing,
            completed_at,
        } = outcome;

        self.cadence.observe(processing);

        let triggered: Vec<TriggeredCue> = match self.ctx.gallery.write() {
            Ok(mut gallery) => {
                gallery.register_sightings(&matches, completed_at, self.settings.audio_cooldown_seconds)
            }
            Err(_) => {
                error!("Gallery lock poisoned; skipping cooldown update");
                Vec::new()
            }
        };

        for cue in &triggered {
            if !cue.cue_path.exists() {
                warn!(
                    "Cue for {} is missing: {}",
                    cue.identity,
                    cue.cue_path.display()
                );
                continue;
            }
            if let Err(e) = self.ctx.audio.play(&cue.cue_path) {
                warn!("Failed to play cue for {}: {}", cue.identity, e);
            }
        }

        self.ctx.state.set_faces(&matches);
        if !matches.is_empty() {
            debug!(
                "Recognized {} face(s) in {:.0}ms, {} cue(s)",
                matches.len(),
                processing.as_secs_f64() * 1000.0,
                triggered.len()
            );
            self.ctx.state.push_event(RecognitionEvent::new(
                matches.clone(),
                triggered,
                completed_at,
                processing,
            ));
        }
        self.last_faces = matches;
    }

    async fn refresh_settings(&mut self, now: Instant) {
        if now.duration_since(self.last_settings_check) < self.options.settings_refresh_interval {
            return;
        }
        self.last_settings_check = now;

        // File stat and read stay off the loop's worker thread
        if self.ctx.settings.path().is_some() {
            let store = Arc::clone(&self.ctx.settings);
            if let Err(e) = tokio::task::spawn_blocking(move || store.refresh_if_changed()).await {
                warn!("Settings refresh task failed: {}", e);
            }
        }
        let latest = self.ctx.settings.snapshot();
        if latest == self.settings {
            return;
        }

        debug!("Applying updated runtime settings");
        let cadence = CadenceConfig::from_settings(&latest);
        if cadence != *self.cadence.config() {
            self.cadence.apply_config(cadence);
        }
        self.settings = latest;
    }

    fn log_performance(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.perf_window_start);
        if elapsed < self.options.perf_log_interval {
            return;
        }

        if self.settings.low_power_mode {
            let mean_ms = self
                .cadence
                .mean_latency()
                .map_or(0.0, |d| d.as_secs_f64() * 1000.0);
            info!(
                "Performance: {:.1} FPS, avg recognition: {:.0}ms, interval: {}ms",
                self.perf_window_frames as f64 / elapsed.as_secs_f64(),
                mean_ms,
                self.cadence.interval().as_millis()
            );
        }
        self.perf_window_start = now;
        self.perf_window_frames = 0;
    }

    async fn shutdown(&mut self) {
        self.dispatcher.shutdown(self.options.shutdown_timeout).await;
        self.capture.close();
        self.ctx.state.set_running(false);
        self.ctx.state.set_camera_connected(false);
        info!("Kiosk loop stopped");
    }
}

/// Spawn the kiosk loop, unless the kiosk is disabled in settings
pub fn start(
    ctx: KioskContext,
    capture: Box<dyn CaptureSource>,
    options: LoopOptions,
) -> Option<JoinHandle<()>> {
    if !ctx.settings.snapshot().kiosk_enabled {
        info!("Kiosk is disabled in settings");
        return None;
    }
    let kiosk = KioskLoop::new(ctx, capture, options);
    Some(tokio::spawn(kiosk.run()))
}

/// Ask a running loop to stop after its current tick
pub fn stop(state: &SharedState) {
    state.set_running(false);
}
