//! Sample rate conversion using rubato
//!
//! Clips are resampled once, to the output device rate, when first decoded.

use crate::error::{Error, Result};
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

const CHANNELS: usize = 2;

/// Resample interleaved stereo `input` from `input_rate` to `output_rate`
pub fn resample_stereo(input: &[f32], input_rate: u32, output_rate: u32) -> Result<Vec<f32>> {
    if input_rate == output_rate || input.len() < CHANNELS {
        return Ok(input.to_vec());
    }
    if input_rate == 0 || output_rate == 0 {
        return Err(Error::AudioOutput(format!(
            "invalid sample rates {} -> {}",
            input_rate, output_rate
        )));
    }

    let planar = deinterleave(input);
    let frames = planar[0].len();

    debug!(
        "Resampling {} frames from {}Hz to {}Hz",
        frames, input_rate, output_rate
    );

    // One chunk covering the whole clip
    let mut resampler = FastFixedIn::<f32>::new(
        f64::from(output_rate) / f64::from(input_rate),
        1.0,
        PolynomialDegree::Cubic,
        frames,
        CHANNELS,
    )
    .map_err(|e| Error::AudioOutput(format!("failed to create resampler: {}", e)))?;

    let output = resampler
        .process(&planar, None)
        .map_err(|e| Error::AudioOutput(format!("resampling failed: {}", e)))?;

    Ok(interleave(&output))
}

fn deinterleave(samples: &[f32]) -> Vec<Vec<f32>> {
    let frames = samples.len() / CHANNELS;
    let mut planar = vec![Vec::with_capacity(frames); CHANNELS];
    for frame in samples.chunks_exact(CHANNELS) {
        for (ch, &s) in frame.iter().enumerate() {
            planar[ch].push(s);
        }
    }
    planar
}

fn interleave(planar: &[Vec<f32>]) -> Vec<f32> {
    let frames = planar.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planar.len());
    for i in 0..frames {
        for channel in planar {
            out.push(channel[i]);
        }
    }
    out
}
