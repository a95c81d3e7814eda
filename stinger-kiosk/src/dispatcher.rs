//! Single-flight recognition dispatcher
//!
//! At most one recognition task runs at a time. Dispatching while a task is
//! in flight is a no-op, so the capture loop never queues work behind a
//! slow model; it simply skips the frame.

use crate::detector::{detect_with_retry, FaceDetector};
use crate::error::{Error, Result};
use crate::frame::{apply_masks, Frame};
use crate::gallery::SharedGallery;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use stinger_common::config::RuntimeSettings;
use stinger_common::events::MatchResult;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Result of one completed recognition task
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionOutcome {
    /// One entry per detected face, in detector order
    pub matches: Vec<MatchResult>,
    /// Wall time from dispatch to completion, including any wait for a
    /// blocking-pool thread
    pub processing: Duration,
    pub completed_at: DateTime<Utc>,
}

/// Runs recognition off the capture loop, one frame at a time
pub struct RecognitionDispatcher {
    detector: Arc<dyn FaceDetector>,
    gallery: SharedGallery,
    in_flight: Option<JoinHandle<Result<RecognitionOutcome>>>,
    dispatched: u64,
    skipped: u64,
}

impl RecognitionDispatcher {
    pub fn new(detector: Arc<dyn FaceDetector>, gallery: SharedGallery) -> Self {
        Self {
            detector,
            gallery,
            in_flight: None,
            dispatched: 0,
            skipped: 0,
        }
    }

    /// True while a dispatched task has not yet been collected
    pub fn is_busy(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn detector_ready(&self) -> bool {
        self.detector.is_ready()
    }

    /// Tasks started since creation
    pub fn dispatched(&self) -> u64 {
        self.dispatched
    }

    /// Dispatch attempts refused because a task was in flight
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Start recognition on `frame` unless a task is in flight or the
    /// detector is not ready. Returns whether a task was started.
    ///
    /// Masks are applied to a copy inside the task; `frame` is moved in and
    /// the caller keeps its own display copy.
    pub fn try_dispatch(&mut self, frame: Frame, settings: &RuntimeSettings) -> bool {
        if self.in_flight.is_some() {
            self.skipped += 1;
            return false;
        }
        if !self.detector.is_ready() {
            return false;
        }

        let detector = Arc::clone(&self.detector);
        let gallery = Arc::clone(&self.gallery);
        let settings = settings.clone();
        let dispatched_at = Instant::now();

        self.in_flight = Some(tokio::task::spawn_blocking(move || {
            recognize(detector.as_ref(), &gallery, &frame, &settings, dispatched_at)
        }));
        self.dispatched += 1;
        true
    }

    /// Collect the in-flight task if it has finished; never waits
    pub fn poll_completed(&mut self) -> Option<Result<RecognitionOutcome>> {
        if !self.in_flight.as_ref()?.is_finished() {
            return None;
        }

        let mut handle = self.in_flight.take()?;
        match (&mut handle).now_or_never() {
            Some(Ok(outcome)) => Some(outcome),
            Some(Err(e)) => Some(Err(Error::Recognition(format!(
                "recognition task failed: {}",
                e
            )))),
            // Finished but not yet yielded (e.g. coop budget); keep it for the next poll
            None => {
                self.in_flight = Some(handle);
                None
            }
        }
    }

    /// Abort the in-flight task and wait up to `timeout` for it to finish
    ///
    /// Blocking tasks cannot be interrupted mid-call; the wait bounds how
    /// long shutdown will stand on one.
    pub async fn shutdown(&mut self, timeout: Duration) {
        let Some(handle) = self.in_flight.take() else {
            return;
        };

        handle.abort();
        match tokio::time::timeout(timeout, handle).await {
            Ok(_) => debug!("Recognition task finished during shutdown"),
            Err(_) => warn!(
                "Recognition task still running after {:?}; abandoning it",
                timeout
            ),
        }
    }
}

/// Mask, detect and classify one frame
fn recognize(
    detector: &dyn FaceDetector,
    gallery: &SharedGallery,
    frame: &Frame,
    settings: &RuntimeSettings,
    dispatched_at: Instant,
) -> Result<RecognitionOutcome> {

    let masked;
    let input = if settings.camera_masks.is_empty() {
        frame
    } else {
        masked = apply_masks(frame, &settings.camera_masks);
        &masked
    };

    let detections = detect_with_retry(detector, input, settings)?;

    let matches = {
        let gallery = gallery
            .read()
            .map_err(|_| Error::Internal("gallery lock poisoned".to_string()))?;
        detections
            .into_iter()
            .map(|d| gallery.classify(d, settings.embedding_distance_threshold))
            .collect()
    };

    Ok(RecognitionOutcome {
        matches,
        processing: dispatched_at.elapsed(),
        completed_at: Utc::now(),
    })
}
