//! Recognition data model shared between the kiosk engine and its consumers
//!
//! These are fixed, typed payloads: the engine produces them once per
//! recognition cycle and the state hub hands out copies to readers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Label used for detections that did not confidently match any identity
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Axis-aligned face box in frame pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl BoundingBox {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self { x, y, width, height }
    }

    /// Box area in pixels (zero for degenerate boxes)
    pub fn area(&self) -> i64 {
        i64::from(self.width.max(0)) * i64::from(self.height.max(0))
    }

    /// Divide every coordinate by `factor` (used to map boxes found on an
    /// upscaled image back to the source resolution)
    pub fn scaled_down(&self, factor: f32) -> Self {
        let scale = |v: i32| (v as f32 / factor) as i32;
        Self {
            x: scale(self.x),
            y: scale(self.y),
            width: scale(self.width),
            height: scale(self.height),
        }
    }

    /// Reflect the box across the vertical centre line of a frame `frame_width` wide
    pub fn mirrored(&self, frame_width: u32) -> Self {
        Self {
            x: frame_width as i32 - self.x - self.width,
            ..*self
        }
    }
}

/// A face found by the detector in one recognition cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    #[serde(rename = "box")]
    pub bbox: BoundingBox,

    /// Detector confidence (0.0-1.0)
    pub score: f32,

    /// Identity embedding. Not forwarded to consumers.
    #[serde(skip_serializing, default)]
    pub embedding: Vec<f32>,
}

/// A detection paired with its nearest gallery identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub detection: Detection,

    /// Matched identity name; `None` unless the match is confident
    pub identity: Option<String>,

    /// Cosine distance to the nearest gallery embedding (infinite for an empty gallery)
    pub distance: f32,

    /// True iff `distance` is strictly below the configured threshold
    pub is_match: bool,
}

impl MatchResult {
    /// Text to render next to the face box
    pub fn label(&self) -> &str {
        match (&self.identity, self.is_match) {
            (Some(name), true) => name,
            _ => UNKNOWN_LABEL,
        }
    }
}

/// An identity whose audio cue was triggered during a cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggeredCue {
    pub identity: String,
    pub cue_path: PathBuf,
}

/// Result of one completed recognition cycle, as published to consumers
///
/// Immutable once constructed; read through the accessors.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecognitionEvent {
    id: Uuid,
    matches: Vec<MatchResult>,
    triggered: Vec<TriggeredCue>,
    timestamp: DateTime<Utc>,
    processing_ms: f64,
}

impl RecognitionEvent {
    pub fn new(
        matches: Vec<MatchResult>,
        triggered: Vec<TriggeredCue>,
        timestamp: DateTime<Utc>,
        processing: Duration,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            matches,
            triggered,
            timestamp,
            processing_ms: crate::time::duration_to_millis_f64(processing),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn matches(&self) -> &[MatchResult] {
        &self.matches
    }

    pub fn triggered(&self) -> &[TriggeredCue] {
        &self.triggered
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn processing_ms(&self) -> f64 {
        self.processing_ms
    }
}

/// Point-in-time kiosk status for polling consumers
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KioskStatus {
    pub running: bool,
    pub camera_connected: bool,
    pub fps: f64,
    pub frame_count: u64,
}
