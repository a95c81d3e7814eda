//! Shared kiosk state hub
//!
//! Thread-safe store read by transport consumers (frame streaming, status
//! polling, event pulling) and written by the kiosk loop.
//!
//! Each store has its own lock and no method holds more than one of them.
//! Every accessor copies data in or out; no reference to internal state
//! escapes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use stinger_common::events::{KioskStatus, MatchResult, RecognitionEvent};
use tokio::sync::Notify;
use tokio::time::Instant;

/// Default bound of the recognition event queue
pub const EVENT_QUEUE_CAPACITY: usize = 100;

const FPS_WINDOW: Duration = Duration::from_secs(1);

/// Latest published frame and its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSnapshot {
    pub bytes: Arc<[u8]>,
    pub sequence: u64,
}

#[derive(Debug)]
struct FrameStore {
    current: Option<Arc<[u8]>>,
    frame_count: u64,
    fps: f64,
    window_start: Instant,
    window_frames: u64,
}

impl FrameStore {
    fn new() -> Self {
        Self {
            current: None,
            frame_count: 0,
            fps: 0.0,
            window_start: Instant::now(),
            window_frames: 0,
        }
    }

    fn current_fps(&self) -> f64 {
        let elapsed = self.window_start.elapsed().as_secs_f64();
        if elapsed > 0.0 && self.window_frames > 0 {
            self.window_frames as f64 / elapsed
        } else {
            self.fps
        }
    }
}

/// Shared state accessible by the kiosk loop and all consumers
#[derive(Debug)]
pub struct SharedState {
    frame: Mutex<FrameStore>,
    faces: Mutex<Vec<MatchResult>>,
    events: Mutex<VecDeque<RecognitionEvent>>,
    event_capacity: usize,
    event_ready: Notify,
    events_dropped: AtomicU64,
    running: AtomicBool,
    stop_requested: Notify,
    camera_connected: AtomicBool,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Stores hold plain data, so a panicked writer leaves nothing half-updated
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl SharedState {
    /// Create new shared state with the default event queue bound
    pub fn new() -> Self {
        Self::with_event_capacity(EVENT_QUEUE_CAPACITY)
    }

    pub fn with_event_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frame: Mutex::new(FrameStore::new()),
            faces: Mutex::new(Vec::new()),
            events: Mutex::new(VecDeque::with_capacity(capacity)),
            event_capacity: capacity,
            event_ready: Notify::new(),
            events_dropped: AtomicU64::new(0),
            running: AtomicBool::new(false),
            stop_requested: Notify::new(),
            camera_connected: AtomicBool::new(false),
        }
    }

    // ----- Frame store -----

    /// Replace the current frame and advance the frame/FPS counters
    pub fn set_frame(&self, bytes: impl Into<Arc<[u8]>>) {
        let bytes = bytes.into();
        let mut store = lock(&self.frame);
        store.current = Some(bytes);
        store.frame_count += 1;
        store.window_frames += 1;

        let elapsed = store.window_start.elapsed();
        if elapsed >= FPS_WINDOW {
            store.fps = store.window_frames as f64 / elapsed.as_secs_f64();
            store.window_frames = 0;
            store.window_start = Instant::now();
        }
    }

    /// Latest frame, or `None` before the first [`SharedState::set_frame`]
    pub fn get_frame(&self) -> Option<Arc<[u8]>> {
        lock(&self.frame).current.clone()
    }

    /// Latest frame with its sequence number, letting streamers skip repeats
    pub fn get_frame_snapshot(&self) -> Option<FrameSnapshot> {
        let store = lock(&self.frame);
        store.current.clone().map(|bytes| FrameSnapshot {
            bytes,
            sequence: store.frame_count,
        })
    }

    pub fn frame_count(&self) -> u64 {
        lock(&self.frame).frame_count
    }

    /// Frames per second over the current one-second sample window
    pub fn fps(&self) -> f64 {
        lock(&self.frame).current_fps()
    }

    // ----- Latest detections -----

    pub fn set_faces(&self, faces: &[MatchResult]) {
        *lock(&self.faces) = faces.to_vec();
    }

    pub fn get_faces(&self) -> Vec<MatchResult> {
        lock(&self.faces).clone()
    }

    // ----- Event queue -----

    /// Queue an event without blocking; when full the oldest event is dropped
    pub fn push_event(&self, event: RecognitionEvent) {
        {
            let mut events = lock(&self.events);
            while events.len() >= self.event_capacity {
                events.pop_front();
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
            }
            events.push_back(event);
        }
        self.event_ready.notify_one();
    }

    /// Pop the oldest queued event without waiting
    pub fn try_next_event(&self) -> Option<RecognitionEvent> {
        lock(&self.events).pop_front()
    }

    /// Wait up to `timeout` for the next event
    ///
    /// Intended for a single pulling consumer; concurrent callers each get
    /// distinct events.
    pub async fn next_event(&self, timeout: Duration) -> Option<RecognitionEvent> {
        tokio::time::timeout(timeout, async {
            loop {
                if let Some(event) = self.try_next_event() {
                    return event;
                }
                self.event_ready.notified().await;
            }
        })
        .await
        .ok()
    }

    pub fn queued_events(&self) -> usize {
        lock(&self.events).len()
    }

    /// Events discarded because the queue was full
    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    // ----- Status flags -----

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::Release);
        if !running {
            self.stop_requested.notify_waiters();
        }
    }

    /// Resolve once `running` is false
    pub async fn wait_stopped(&self) {
        loop {
            let stopped = self.stop_requested.notified();
            if !self.is_running() {
                return;
            }
            stopped.await;
        }
    }

    pub fn is_camera_connected(&self) -> bool {
        self.camera_connected.load(Ordering::Acquire)
    }

    pub fn set_camera_connected(&self, connected: bool) {
        self.camera_connected.store(connected, Ordering::Release);
    }

    pub fn get_status(&self) -> KioskStatus {
        let (fps, frame_count) = {
            let store = lock(&self.frame);
            (store.current_fps(), store.frame_count)
        };
        KioskStatus {
            running: self.is_running(),
            camera_connected: self.is_camera_connected(),
            fps,
            frame_count,
        }
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}
