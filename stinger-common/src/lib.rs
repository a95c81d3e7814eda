//! # Stinger Common Library
//!
//! Shared code for the Stinger kiosk crates including:
//! - Recognition data model (detections, match results, events)
//! - Kiosk status snapshot type
//! - Configuration loading (bootstrap TOML and hot-reloadable runtime settings)
//! - Timestamp helpers

pub mod config;
pub mod error;
pub mod events;
pub mod time;

pub use error::{Error, Result};
pub use events::{BoundingBox, Detection, KioskStatus, MatchResult, RecognitionEvent, TriggeredCue};
