//! Face detector seam
//!
//! The detection/embedding model is an external collaborator. The kiosk only
//! needs a synchronous `detect` call, which it always runs off the capture
//! loop inside the recognition dispatcher.

use crate::error::{Error, Result};
use crate::frame::Frame;
use image::imageops::FilterType;
use stinger_common::config::RuntimeSettings;
use stinger_common::events::Detection;
use tracing::debug;

/// Images whose longest side reaches this size are not upscaled on retry
pub const UPSCALE_RETRY_MAX_SIDE: u32 = 1600;

/// Face detection and embedding model
pub trait FaceDetector: Send + Sync {
    /// Detect faces scoring at least `score_threshold` and compute their embeddings
    fn detect(&self, frame: &Frame, score_threshold: f32) -> Result<Vec<Detection>>;

    /// Whether the model is loaded and `detect` may be called
    fn is_ready(&self) -> bool;
}

/// Placeholder used when no model is linked; never becomes ready
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableDetector;

impl FaceDetector for UnavailableDetector {
    fn detect(&self, _frame: &Frame, _score_threshold: f32) -> Result<Vec<Detection>> {
        Err(Error::Detector("no face detection model is loaded".to_string()))
    }

    fn is_ready(&self) -> bool {
        false
    }
}

/// Run detection, retrying once on an upscaled copy when nothing was found
///
/// The retry is skipped when disabled in settings or when the frame is
/// already large. Boxes found on the upscaled copy are mapped back to the
/// source resolution.
pub fn detect_with_retry(
    detector: &dyn FaceDetector,
    frame: &Frame,
    settings: &RuntimeSettings,
) -> Result<Vec<Detection>> {
    let detections = detector.detect(frame, settings.detection_score_threshold)?;
    if !detections.is_empty() || settings.skip_upscale_retry {
        return Ok(detections);
    }

    let (width, height) = frame.dimensions();
    if width.max(height) >= UPSCALE_RETRY_MAX_SIDE || settings.upscale_factor <= 1.0 {
        return Ok(detections);
    }

    let factor = settings.upscale_factor;
    let scaled_w = (width as f32 * factor) as u32;
    let scaled_h = (height as f32 * factor) as u32;
    debug!("No faces found, retrying at {}x{}", scaled_w, scaled_h);

    let scaled = image::imageops::resize(frame, scaled_w, scaled_h, FilterType::CatmullRom);
    let mut retried = detector.detect(&scaled, settings.detection_score_threshold)?;
    for detection in &mut retried {
        detection.bbox = detection.bbox.scaled_down(factor);
    }
    Ok(retried)
}
