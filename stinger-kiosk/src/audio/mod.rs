//! Audio cue output
//!
//! The kiosk loop only sees [`AudioSink`]. [`CueAudioSink`] decodes cues
//! with symphonia, resamples them with rubato and plays them through cpal.

mod decode;
mod output;
mod resampler;

pub use decode::{decode_clip, DecodedClip};
pub use output::CueAudioSink;
pub use resampler::resample_stereo;

use crate::error::Result;
use std::path::Path;
use tracing::debug;

/// Fire-and-forget cue playback
pub trait AudioSink: Send + Sync {
    /// Start playing `cue_path`. Must return without waiting for playback.
    fn play(&self, cue_path: &Path) -> Result<()>;
}

/// Sink for hosts without an output device; logs and discards every cue
#[derive(Debug, Default, Clone, Copy)]
pub struct NullAudioSink;

impl AudioSink for NullAudioSink {
    fn play(&self, cue_path: &Path) -> Result<()> {
        debug!("No audio output; dropping cue {}", cue_path.display());
        Ok(())
    }
}
