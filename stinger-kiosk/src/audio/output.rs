//! Cue playback through cpal
//!
//! The cpal stream is not `Send`, so it lives on a dedicated audio thread
//! that owns the device, the decoded-clip cache and the playback cursor.
//! [`CueAudioSink`] only sends commands to that thread and never blocks on
//! decoding or the device.

use super::decode::decode_clip;
use super::resampler::resample_stereo;
use super::AudioSink;
use crate::error::{Error, Result};
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use tracing::{debug, error, info, warn};

enum Command {
    Play(PathBuf),
    Stop,
    ClearCache,
    Shutdown,
}

/// Clip currently being played and the next stereo frame to output
#[derive(Default)]
struct Cursor {
    clip: Option<Arc<[f32]>>,
    position: usize,
}

impl Cursor {
    /// Next stereo frame, or silence once the clip is exhausted
    fn next_frame(&mut self) -> (f32, f32) {
        let Some(clip) = self.clip.as_ref() else {
            return (0.0, 0.0);
        };
        if self.position + 1 >= clip.len() {
            self.clip = None;
            self.position = 0;
            return (0.0, 0.0);
        }
        let frame = (clip[self.position], clip[self.position + 1]);
        self.position += 2;
        frame
    }
}

fn lock(cursor: &Mutex<Cursor>) -> MutexGuard<'_, Cursor> {
    cursor.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Audio sink playing cue clips on the default (or named) output device
///
/// Starting a new cue replaces the one currently playing.
pub struct CueAudioSink {
    commands: Sender<Command>,
    thread: Option<JoinHandle<()>>,
    sample_rate: u32,
}

impl CueAudioSink {
    /// Open the output device on a new audio thread
    ///
    /// Fails if the device cannot be opened; callers may fall back to
    /// [`super::NullAudioSink`].
    pub fn new(device_name: Option<String>) -> Result<Self> {
        let (command_tx, command_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<u32>>(1);

        let handle = thread::Builder::new()
            .name("stinger-audio".to_string())
            .spawn(move || audio_thread(device_name, command_rx, ready_tx))?;

        let sample_rate = match ready_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(Error::AudioOutput(
                    "audio thread exited during startup".to_string(),
                ));
            }
        };

        Ok(Self {
            commands: command_tx,
            thread: Some(handle),
            sample_rate,
        })
    }

    /// Output device sample rate
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Silence the current cue
    pub fn stop(&self) -> Result<()> {
        self.send(Command::Stop)
    }

    /// Drop every cached clip; the next play of each path decodes again
    pub fn clear_cache(&self) -> Result<()> {
        self.send(Command::ClearCache)
    }

    fn send(&self, command: Command) -> Result<()> {
        self.commands
            .send(command)
            .map_err(|_| Error::AudioOutput("audio thread has stopped".to_string()))
    }
}

impl AudioSink for CueAudioSink {
    fn play(&self, cue_path: &Path) -> Result<()> {
        if !cue_path.is_file() {
            return Err(Error::Decode {
                path: cue_path.to_path_buf(),
                message: "file not found".to_string(),
            });
        }
        self.send(Command::Play(cue_path.to_path_buf()))
    }
}

impl Drop for CueAudioSink {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.thread.take() {
            if handle.join().is_err() {
                error!("Audio thread panicked");
            }
        }
    }
}

fn audio_thread(
    device_name: Option<String>,
    commands: Receiver<Command>,
    ready: mpsc::SyncSender<Result<u32>>,
) {
    let cursor = Arc::new(Mutex::new(Cursor::default()));

    let (stream, sample_rate) = match open_stream(device_name, Arc::clone(&cursor)) {
        Ok(opened) => opened,
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };
    let _ = ready.send(Ok(sample_rate));

    let mut cache: HashMap<PathBuf, Arc<[f32]>> = HashMap::new();

    while let Ok(command) = commands.recv() {
        match command {
            Command::Play(path) => {
                let clip = match cache.get(&path) {
                    Some(clip) => Arc::clone(clip),
                    None => match load_clip(&path, sample_rate) {
                        Ok(clip) => {
                            cache.insert(path.clone(), Arc::clone(&clip));
                            clip
                        }
                        Err(e) => {
                            warn!("Cue playback failed: {}", e);
                            continue;
                        }
                    },
                };
                debug!("Playing cue {}", path.display());
                let mut cursor = lock(&cursor);
                cursor.clip = Some(clip);
                cursor.position = 0;
            }
            Command::Stop => *lock(&cursor) = Cursor::default(),
            Command::ClearCache => cache.clear(),
            Command::Shutdown => break,
        }
    }

    drop(stream);
    info!("Audio thread stopped");
}

fn load_clip(path: &Path, device_rate: u32) -> Result<Arc<[f32]>> {
    let clip = decode_clip(path)?;
    let samples = resample_stereo(&clip.samples, clip.sample_rate, device_rate)?;
    Ok(samples.into())
}

fn find_device(host: &cpal::Host, name: Option<&str>) -> Result<Device> {
    if let Some(name) = name {
        let devices = host
            .output_devices()
            .map_err(|e| Error::AudioOutput(format!("failed to enumerate devices: {}", e)))?;
        for device in devices {
            if device.name().map(|n| n == name).unwrap_or(false) {
                return Ok(device);
            }
        }
        warn!("Audio device '{}' not found, using default", name);
    }

    host.default_output_device()
        .ok_or_else(|| Error::AudioOutput("no output device available".to_string()))
}

fn open_stream(device_name: Option<String>, cursor: Arc<Mutex<Cursor>>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = find_device(&host, device_name.as_deref())?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::AudioOutput(format!("failed to get default config: {}", e)))?;
    let sample_format = supported.sample_format();
    let config: StreamConfig = supported.config();

    info!(
        "Audio output: {} ({} Hz, {} channels, {:?})",
        device.name().unwrap_or_else(|_| "unknown".to_string()),
        config.sample_rate.0,
        config.channels,
        sample_format
    );

    let stream = match sample_format {
        SampleFormat::F32 => build_stream::<f32>(&device, &config, cursor)?,
        SampleFormat::I16 => build_stream::<i16>(&device, &config, cursor)?,
        SampleFormat::U16 => build_stream::<u16>(&device, &config, cursor)?,
        other => {
            return Err(Error::AudioOutput(format!(
                "unsupported sample format: {:?}",
                other
            )))
        }
    };

    stream
        .play()
        .map_err(|e| Error::AudioOutput(format!("failed to start stream: {}", e)))?;

    Ok((stream, config.sample_rate.0))
}

fn build_stream<T>(device: &Device, config: &StreamConfig, cursor: Arc<Mutex<Cursor>>) -> Result<Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = usize::from(config.channels);

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut cursor = lock(&cursor);
                for frame in data.chunks_mut(channels) {
                    let (left, right) = cursor.next_frame();
                    write_frame(frame, left, right);
                }
            },
            |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| Error::AudioOutput(format!("failed to build stream: {}", e)))
}

/// Map a stereo frame onto a device frame of any width
fn write_frame<T: Sample + FromSample<f32>>(frame: &mut [T], left: f32, right: f32) {
    match frame.len() {
        0 => {}
        1 => frame[0] = T::from_sample(((left + right) * 0.5).clamp(-1.0, 1.0)),
        _ => {
            frame[0] = T::from_sample(left.clamp(-1.0, 1.0));
            frame[1] = T::from_sample(right.clamp(-1.0, 1.0));
            for extra in &mut frame[2..] {
                *extra = T::from_sample(0.0f32);
            }
        }
    }
}
