//! Capture source abstraction
//!
//! Platform camera drivers live outside the kiosk core and plug in through
//! [`CaptureSource`]. A failed read only marks the source disconnected;
//! reconnecting is the kiosk loop's job, via [`reconnect`].

use crate::error::{Error, Result};
use crate::frame::Frame;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

/// Default reconnect attempts per reconnect cycle
pub const DEFAULT_RECONNECT_ATTEMPTS: u32 = 3;

/// Default delay between reconnect attempts
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// A camera (or camera-like) frame source
pub trait CaptureSource: Send + Sync {
    /// Open the device. Opening an already open source is a no-op.
    fn open(&mut self) -> Result<()>;

    /// Next frame, or `None` if unavailable. Must return promptly.
    fn read(&mut self) -> Option<Frame>;

    /// Whether the source is open and producing frames
    fn is_connected(&self) -> bool;

    /// Release the device
    fn close(&mut self);
}

/// Close `source` and try to open it up to `max_attempts` times, sleeping
/// `delay` after each failed attempt
pub async fn reconnect(source: &mut dyn CaptureSource, max_attempts: u32, delay: Duration) -> bool {
    source.close();

    for attempt in 1..=max_attempts {
        info!("Camera reconnection attempt {}/{}", attempt, max_attempts);
        match source.open() {
            Ok(()) => return true,
            Err(e) => warn!("Camera open failed: {}", e),
        }
        tokio::time::sleep(delay).await;
    }

    error!("Failed to reconnect to camera after {} attempts", max_attempts);
    false
}

/// Replays the images of a directory in file-name order, looping forever
///
/// Stands in for a camera on machines without one.
pub struct ImageDirSource {
    dir: PathBuf,
    frames: Vec<Frame>,
    next: usize,
    connected: bool,
}

impl ImageDirSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            frames: Vec::new(),
            next: 0,
            connected: false,
        }
    }

    fn load_frames(dir: &Path) -> Result<Vec<Frame>> {
        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let mut frames = Vec::with_capacity(paths.len());
        for path in paths {
            match image::open(&path) {
                Ok(img) => frames.push(img.to_rgb8()),
                Err(e) => warn!("Skipping {}: {}", path.display(), e),
            }
        }
        Ok(frames)
    }
}

impl CaptureSource for ImageDirSource {
    fn open(&mut self) -> Result<()> {
        if self.connected {
            return Ok(());
        }

        info!("Opening image directory source {}", self.dir.display());
        let frames = Self::load_frames(&self.dir)?;
        if frames.is_empty() {
            return Err(Error::Capture(format!(
                "no readable images in {}",
                self.dir.display()
            )));
        }

        let (w, h) = frames[0].dimensions();
        info!("Image source opened: {} frames, first frame {}x{}", frames.len(), w, h);
        self.frames = frames;
        self.next = 0;
        self.connected = true;
        Ok(())
    }

    fn read(&mut self) -> Option<Frame> {
        if !self.connected || self.frames.is_empty() {
            return None;
        }
        let frame = self.frames[self.next].clone();
        self.next = (self.next + 1) % self.frames.len();
        Some(frame)
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        if self.connected {
            info!("Closing image directory source {}", self.dir.display());
        }
        self.frames.clear();
        self.connected = false;
    }
}
