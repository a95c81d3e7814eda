//! Scripted stand-ins for the camera, face model and audio device

use image::RgbImage;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use stinger_common::events::{BoundingBox, Detection};
use stinger_kiosk::audio::AudioSink;
use stinger_kiosk::capture::CaptureSource;
use stinger_kiosk::detector::FaceDetector;
use stinger_kiosk::{Error, Result};

/// Counters shared between a [`ScriptedCapture`] and the test
#[derive(Debug, Default)]
pub struct CaptureStats {
    pub opens: AtomicUsize,
    pub reads: AtomicUsize,
    pub closes: AtomicUsize,
}

/// Capture source replaying one frame forever
///
/// Can be told to fail its first N opens and to drop the connection after
/// a number of successful reads (once).
pub struct ScriptedCapture {
    frame: RgbImage,
    connected: bool,
    failing_opens: usize,
    disconnect_after: Option<usize>,
    reads_since_open: usize,
    stats: Arc<CaptureStats>,
}

impl ScriptedCapture {
    pub fn new(frame: RgbImage) -> Self {
        Self {
            frame,
            connected: false,
            failing_opens: 0,
            disconnect_after: None,
            reads_since_open: 0,
            stats: Arc::new(CaptureStats::default()),
        }
    }

    pub fn failing_opens(mut self, count: usize) -> Self {
        self.failing_opens = count;
        self
    }

    pub fn disconnect_after(mut self, reads: usize) -> Self {
        self.disconnect_after = Some(reads);
        self
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        Arc::clone(&self.stats)
    }
}

impl CaptureSource for ScriptedCapture {
    fn open(&mut self) -> Result<()> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        if self.failing_opens > 0 {
            self.failing_opens -= 1;
            return Err(Error::Capture("scripted open failure".to_string()));
        }
        self.connected = true;
        self.reads_since_open = 0;
        Ok(())
    }

    fn read(&mut self) -> Option<RgbImage> {
        if !self.connected {
            return None;
        }
        if self.disconnect_after == Some(self.reads_since_open) {
            self.disconnect_after = None;
            self.connected = false;
            return None;
        }
        self.reads_since_open += 1;
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        Some(self.frame.clone())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
        self.connected = false;
    }
}

/// Detector returning the same detections for every frame
pub struct ScriptedDetector {
    detections: Vec<Detection>,
    delay: Duration,
    failing_calls: Vec<usize>,
    ready: AtomicBool,
    calls: AtomicUsize,
    failures: AtomicUsize,
    running: AtomicUsize,
    max_running: AtomicUsize,
    call_starts: Mutex<Vec<Instant>>,
}

impl ScriptedDetector {
    pub fn new(detections: Vec<Detection>) -> Self {
        Self {
            detections,
            delay: Duration::ZERO,
            failing_calls: Vec::new(),
            ready: AtomicBool::new(true),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
            call_starts: Mutex::new(Vec::new()),
        }
    }

    /// Fail the given calls (1-based) with a detector error
    pub fn failing_calls(mut self, calls: &[usize]) -> Self {
        self.failing_calls = calls.to_vec();
        self
    }

    /// Block each call for `delay`, simulating a slow model
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn not_ready(self) -> Self {
        self.ready.store(false, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Calls that returned an error so far
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// Time between consecutive `detect` calls
    pub fn call_gaps(&self) -> Vec<Duration> {
        let starts = self.call_starts.lock().unwrap();
        starts.windows(2).map(|w| w[1] - w[0]).collect()
    }

    /// Highest number of concurrent `detect` calls observed
    pub fn max_concurrency(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

impl FaceDetector for ScriptedDetector {
    fn detect(&self, _frame: &RgbImage, _score_threshold: f32) -> Result<Vec<Detection>> {
        self.call_starts.lock().unwrap().push(Instant::now());
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(running, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }

        self.running.fetch_sub(1, Ordering::SeqCst);
        if self.failing_calls.contains(&call) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            return Err(Error::Detector(format!("scripted failure on call {}", call)));
        }
        Ok(self.detections.clone())
    }

    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }
}

/// Detector whose single face embedding is the image's mean colour
///
/// Lets photo fixtures of different colours produce distinct embeddings.
/// Images whose mean brightness is below 8 contain no face.
pub struct ShadeDetector;

impl FaceDetector for ShadeDetector {
    fn detect(&self, frame: &RgbImage, _score_threshold: f32) -> Result<Vec<Detection>> {
        let pixels = frame.pixels().len().max(1) as f32;
        let mut sum = [0.0f32; 3];
        for p in frame.pixels() {
            for (acc, &c) in sum.iter_mut().zip(p.0.iter()) {
                *acc += f32::from(c);
            }
        }
        let mean = sum.map(|s| s / pixels);
        if mean.iter().sum::<f32>() / 3.0 < 8.0 {
            return Ok(Vec::new());
        }

        let (w, h) = frame.dimensions();
        Ok(vec![Detection {
            bbox: BoundingBox::new(0, 0, w as i32, h as i32),
            score: 0.99,
            embedding: mean.to_vec(),
        }])
    }

    fn is_ready(&self) -> bool {
        true
    }
}

/// Audio sink recording every cue it is asked to play
#[derive(Debug, Default)]
pub struct RecordingAudioSink {
    played: Mutex<Vec<PathBuf>>,
}

impl RecordingAudioSink {
    pub fn played(&self) -> Vec<PathBuf> {
        self.played.lock().unwrap().clone()
    }
}

impl AudioSink for RecordingAudioSink {
    fn play(&self, cue_path: &Path) -> Result<()> {
        self.played.lock().unwrap().push(cue_path.to_path_buf());
        Ok(())
    }
}
