//! Test helpers for stinger-kiosk integration tests
//!
//! - Fakes for the external collaborators: capture source, face detector,
//!   audio sink
//! - Fixtures: frames, detections, on-disk gallery directories

#![allow(dead_code)]

pub mod fakes;
pub mod fixtures;

pub use fakes::{CaptureStats, RecordingAudioSink, ScriptedCapture, ScriptedDetector, ShadeDetector};
pub use fixtures::{detection, solid_frame, write_photo, GalleryDirBuilder};
