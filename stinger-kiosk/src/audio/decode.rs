//! Cue clip decoding using symphonia
//!
//! Clips are short, so each file is decoded whole into memory.
//!
//! # Sample Format
//!
//! - Output: stereo f32 samples, interleaved `[L, R, L, R, ...]`
//! - Mono files are duplicated to both channels
//! - Channels beyond the first two are dropped

use crate::error::{Error, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

/// A fully decoded clip
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedClip {
    /// Interleaved stereo samples
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedClip {
    /// Number of stereo frames
    pub fn frames(&self) -> usize {
        self.samples.len() / 2
    }
}

fn decode_error(path: &Path, message: impl Into<String>) -> Error {
    Error::Decode {
        path: path.to_path_buf(),
        message: message.into(),
    }
}

/// Decode an entire audio file to stereo f32
pub fn decode_clip(path: &Path) -> Result<DecodedClip> {
    debug!("Decoding cue clip: {}", path.display());

    let file = File::open(path).map_err(|e| decode_error(path, format!("open failed: {}", e)))?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| decode_error(path, format!("unsupported format: {}", e)))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| decode_error(path, "no audio track"))?;
    let track_id = track.id;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| decode_error(path, "sample rate unknown"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| decode_error(path, format!("no decoder: {}", e)))?;

    let mut samples = Vec::new();
    let mut buffer: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => {
                warn!("Error reading packet from {}: {}", path.display(), e);
                break;
            }
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                // Corrupt frame; skip it and keep going
                debug!("Skipping undecodable packet: {}", e);
                continue;
            }
            Err(e) => return Err(decode_error(path, e.to_string())),
        };

        let spec = *decoded.spec();
        let channels = spec.channels.count();
        let needed = decoded.capacity() as u64;

        if buffer
            .as_ref()
            .map_or(true, |b| (b.capacity() as u64) < needed * channels as u64)
        {
            buffer = Some(SampleBuffer::new(needed, spec));
        }
        let Some(buf) = buffer.as_mut() else {
            continue;
        };
        buf.copy_interleaved_ref(decoded);
        push_stereo(buf.samples(), channels, &mut samples);
    }

    if samples.is_empty() {
        return Err(decode_error(path, "no audio decoded"));
    }

    debug!(
        "Decoded {} frames at {} Hz from {}",
        samples.len() / 2,
        sample_rate,
        path.display()
    );
    Ok(DecodedClip {
        samples,
        sample_rate,
    })
}

/// Append interleaved `channels`-wide samples to `out` as interleaved stereo
fn push_stereo(interleaved: &[f32], channels: usize, out: &mut Vec<f32>) {
    match channels {
        0 => {}
        1 => {
            out.reserve(interleaved.len() * 2);
            for &s in interleaved {
                out.push(s);
                out.push(s);
            }
        }
        2 => out.extend_from_slice(interleaved),
        n => {
            out.reserve(interleaved.len() / n * 2);
            for frame in interleaved.chunks_exact(n) {
                out.push(frame[0]);
                out.push(frame[1]);
            }
        }
    }
}
