//! Error types for stinger-kiosk
//!
//! Every failure in the kiosk core is local and recoverable; these variants
//! exist so callers can log and classify them, not to abort the loop.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for stinger-kiosk
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(#[from] stinger_common::Error),

    /// Camera open/read errors
    #[error("Capture error: {0}")]
    Capture(String),

    /// Face detector failed or is not initialized
    #[error("Detector error: {0}")]
    Detector(String),

    /// Recognition task failed to run to completion
    #[error("Recognition error: {0}")]
    Recognition(String),

    /// Gallery loading or mutation errors
    #[error("Gallery error: {0}")]
    Gallery(String),

    /// Audio decoding errors
    #[error("Audio decode error for {path}: {message}")]
    Decode { path: PathBuf, message: String },

    /// Audio output device errors
    #[error("Audio output error: {0}")]
    AudioOutput(String),

    /// Image decode/encode errors
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using stinger-kiosk Error
pub type Result<T> = std::result::Result<T, Error>;
