//! # Stinger Kiosk Library (stinger-kiosk)
//!
//! Face-recognition kiosk core: captures frames, matches faces against a
//! gallery, plays each identity's audio cue under a cooldown and publishes
//! frames, detections and events for independent consumers.
//!
//! **Architecture:** a fixed-rate capture loop ([`engine`]) hands frames to
//! a single-flight recognition worker ([`dispatcher`]) whose cadence is tuned
//! by a feedback controller ([`cadence`]). Results land in the shared state
//! hub ([`state`]), which transports read without touching the loop.

pub mod audio;
pub mod cadence;
pub mod capture;
pub mod detector;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod frame;
pub mod gallery;
pub mod state;

pub use error::{Error, Result};
pub use state::SharedState;
