//! End-to-end tests of the kiosk loop with scripted collaborators

mod helpers;

use helpers::{detection, solid_frame, RecordingAudioSink, ScriptedCapture, ScriptedDetector};
use std::path::PathBuf;
use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use stinger_common::config::{RuntimeSettings, RuntimeSettingsUpdate, SettingsStore};
use stinger_kiosk::engine::{self, KioskContext, LoopOptions};
use stinger_kiosk::gallery::{Gallery, Identity};
use stinger_kiosk::SharedState;
use tempfile::TempDir;

const EVENT_WAIT: Duration = Duration::from_secs(5);

fn fast_settings() -> RuntimeSettings {
    RuntimeSettings {
        camera_fps: 100,
        recognition_interval_ms: 10,
        min_recognition_interval_ms: 10,
        ..RuntimeSettings::default()
    }
}

fn fast_options() -> LoopOptions {
    LoopOptions {
        reconnect_delay: Duration::from_millis(5),
        reconnect_cooldown: Duration::from_millis(20),
        read_retry_delay: Duration::from_millis(5),
        settings_refresh_interval: Duration::from_millis(10),
        shutdown_timeout: Duration::from_secs(1),
        ..LoopOptions::default()
    }
}

/// A with a cue file on disk, B without a cue
fn two_person_gallery(dir: &TempDir) -> (Gallery, PathBuf) {
    let cue = dir.path().join("alice.wav");
    std::fs::write(&cue, b"cue").unwrap();

    let mut alice = Identity::new("alice").with_cue(&cue);
    alice.add_embedding("alice.jpg", vec![1.0, 0.0]);
    let mut bob = Identity::new("bob");
    bob.add_embedding("bob.jpg", vec![0.0, 1.0]);

    let mut gallery = Gallery::new();
    gallery.insert(alice);
    gallery.insert(bob);
    (gallery, cue)
}

struct Harness {
    state: Arc<SharedState>,
    audio: Arc<RecordingAudioSink>,
    settings: Arc<SettingsStore>,
    ctx: KioskContext,
}

fn harness(gallery: Gallery, detector: Arc<ScriptedDetector>, settings: RuntimeSettings) -> Harness {
    harness_with_store(gallery, detector, Arc::new(SettingsStore::in_memory(settings)))
}

fn harness_with_store(
    gallery: Gallery,
    detector: Arc<ScriptedDetector>,
    settings: Arc<SettingsStore>,
) -> Harness {
    let state = Arc::new(SharedState::new());
    let audio = Arc::new(RecordingAudioSink::default());
    let ctx = KioskContext {
        state: Arc::clone(&state),
        gallery: gallery.into_shared(),
        detector,
        audio: audio.clone(),
        settings: Arc::clone(&settings),
    };
    Harness {
        state,
        audio,
        settings,
        ctx,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_two_identities_one_cue() {
    let dir = TempDir::new().unwrap();
    let (gallery, cue) = two_person_gallery(&dir);
    let detector = Arc::new(ScriptedDetector::new(vec![
        detection(10, 10, 40, vec![1.0, 0.0]),
        detection(80, 10, 40, vec![0.0, 1.0]),
    ]));
    let h = harness(gallery, detector, fast_settings());
    let capture = ScriptedCapture::new(solid_frame(160, 120, [90, 90, 90]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();

    let first = h.state.next_event(EVENT_WAIT).await.expect("first event");
    assert_eq!(first.matches().len(), 2);
    assert_eq!(first.matches()[0].label(), "alice");
    assert_eq!(first.matches()[1].label(), "bob");
    assert_eq!(first.triggered().len(), 1);
    assert_eq!(first.triggered()[0].identity, "alice");
    assert_eq!(first.triggered()[0].cue_path, cue);

    // Continuous sightings keep the gap under the cooldown
    let second = h.state.next_event(EVENT_WAIT).await.expect("second event");
    assert_eq!(second.matches().len(), 2);
    assert!(second.triggered().is_empty());

    assert_eq!(h.audio.played(), vec![cue]);
    assert!(h.state.get_frame().is_some());
    assert_eq!(h.state.get_faces().len(), 2);
    let status = h.state.get_status();
    assert!(status.running && status.camera_connected);

    engine::stop(&h.state);
    kiosk.await.unwrap();
    let status = h.state.get_status();
    assert!(!status.running);
    assert!(!status.camera_connected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unknown_faces_publish_event_without_cues() {
    let dir = TempDir::new().unwrap();
    let (gallery, _) = two_person_gallery(&dir);
    let detector = Arc::new(ScriptedDetector::new(vec![detection(
        10,
        10,
        40,
        vec![-1.0, -1.0],
    )]));
    let h = harness(gallery, detector, fast_settings());
    let capture = ScriptedCapture::new(solid_frame(160, 120, [90, 90, 90]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();

    let event = h.state.next_event(EVENT_WAIT).await.expect("event");
    assert_eq!(event.matches().len(), 1);
    assert!(!event.matches()[0].is_match);
    assert_eq!(event.matches()[0].label(), "Unknown");
    assert!(event.triggered().is_empty());
    assert!(h.audio.played().is_empty());

    engine::stop(&h.state);
    kiosk.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_no_faces_means_no_events() {
    let detector = Arc::new(ScriptedDetector::new(vec![]));
    let h = harness(Gallery::new(), detector.clone(), fast_settings());
    let capture = ScriptedCapture::new(solid_frame(64, 48, [0, 0, 0]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(detector.calls() > 0);
    assert_eq!(h.state.queued_events(), 0);
    assert!(h.state.get_frame().is_some());

    engine::stop(&h.state);
    kiosk.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_not_ready_detector_is_never_called() {
    let detector = Arc::new(ScriptedDetector::new(vec![detection(0, 0, 10, vec![1.0])]).not_ready());
    let h = harness(Gallery::new(), detector.clone(), fast_settings());
    let capture = ScriptedCapture::new(solid_frame(64, 48, [10, 10, 10]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(detector.calls(), 0);
    assert!(h.state.frame_count() > 0);
    assert_eq!(h.state.queued_events(), 0);

    engine::stop(&h.state);
    kiosk.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_slow_recognition_stays_single_flight() {
    let detector = Arc::new(
        ScriptedDetector::new(vec![detection(0, 0, 10, vec![1.0, 0.0])])
            .with_delay(Duration::from_millis(60)),
    );
    let h = harness(Gallery::new(), detector.clone(), fast_settings());
    let capture = ScriptedCapture::new(solid_frame(64, 48, [10, 10, 10]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine::stop(&h.state);
    kiosk.await.unwrap();

    assert!(detector.calls() >= 2);
    assert_eq!(detector.max_concurrency(), 1);
    // Capture kept running at frame rate while recognition lagged
    assert!(h.state.frame_count() as usize > detector.calls() * 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_reconnects_after_disconnect() {
    let detector = Arc::new(ScriptedDetector::new(vec![]));
    let h = harness(Gallery::new(), detector, fast_settings());
    let capture = ScriptedCapture::new(solid_frame(64, 48, [10, 10, 10]))
        .failing_opens(1)
        .disconnect_after(3);
    let stats = capture.stats();

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    tokio::time::sleep(Duration::from_millis(400)).await;

    // Initial open fails, first reconnect succeeds, the later drop reconnects again
    assert!(stats.opens.load(Ordering::SeqCst) >= 3);
    assert!(stats.reads.load(Ordering::SeqCst) > 3);
    assert!(h.state.is_camera_connected());

    engine::stop(&h.state);
    kiosk.await.unwrap();
    assert!(stats.closes.load(Ordering::SeqCst) >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_settings_update_reaches_running_loop() {
    let dir = TempDir::new().unwrap();
    let (gallery, _) = two_person_gallery(&dir);
    let detector = Arc::new(ScriptedDetector::new(vec![detection(
        10,
        10,
        40,
        vec![1.0, 0.05],
    )]));
    let h = harness(gallery, detector, fast_settings());
    let capture = ScriptedCapture::new(solid_frame(160, 120, [90, 90, 90]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    let event = h.state.next_event(EVENT_WAIT).await.expect("event");
    assert!(event.matches()[0].is_match);

    // Tighten the threshold below the observed distance
    h.settings
        .update(RuntimeSettingsUpdate {
            embedding_distance_threshold: Some(0.0001),
            ..Default::default()
        })
        .unwrap();

    let mut became_unknown = false;
    for _ in 0..50 {
        if let Some(event) = h.state.next_event(EVENT_WAIT).await {
            if !event.matches()[0].is_match {
                became_unknown = true;
                break;
            }
        }
    }
    assert!(became_unknown);

    engine::stop(&h.state);
    kiosk.await.unwrap();
}

#[tokio::test]
async fn test_disabled_kiosk_does_not_start() {
    let detector = Arc::new(ScriptedDetector::new(vec![]));
    let settings = RuntimeSettings {
        kiosk_enabled: false,
        ..RuntimeSettings::default()
    };
    let h = harness(Gallery::new(), detector, settings);
    let capture = ScriptedCapture::new(solid_frame(8, 8, [0, 0, 0]));

    assert!(engine::start(h.ctx.clone(), Box::new(capture), fast_options()).is_none());
    assert!(!h.state.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_reconnect_backoff_joins_promptly() {
    let options = LoopOptions::default();
    let grace = options.shutdown_timeout + Duration::from_secs(1);

    // Stop once while attempts are sleeping and once during the cooldown
    for stop_after in [Duration::from_millis(500), Duration::from_millis(3500)] {
        let detector = Arc::new(ScriptedDetector::new(vec![]));
        let h = harness(Gallery::new(), detector.clone(), RuntimeSettings::default());
        let capture = ScriptedCapture::new(solid_frame(8, 8, [0, 0, 0])).failing_opens(usize::MAX);
        let stats = capture.stats();

        let kiosk = engine::start(h.ctx.clone(), Box::new(capture), options).unwrap();
        tokio::time::sleep(stop_after).await;
        assert!(!h.state.is_camera_connected());

        let stopped_at = tokio::time::Instant::now();
        engine::stop(&h.state);
        tokio::time::timeout(grace, kiosk)
            .await
            .expect("loop joined within the shutdown grace")
            .unwrap();

        assert!(stopped_at.elapsed() < Duration::from_secs(1));
        assert!(!h.state.is_running());
        assert!(stats.closes.load(Ordering::SeqCst) >= 2);
        assert_eq!(detector.calls(), 0);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_low_power_mode_widens_dispatch_spacing() {
    let settings = RuntimeSettings {
        low_power_mode: true,
        recognition_interval_ms: 10,
        min_recognition_interval_ms: 10,
        max_recognition_interval_ms: 300,
        target_process_time_ms: 5,
        ..fast_settings()
    };
    let detector = Arc::new(
        ScriptedDetector::new(vec![detection(0, 0, 10, vec![1.0, 0.0])])
            .with_delay(Duration::from_millis(30)),
    );
    let h = harness(Gallery::new(), detector.clone(), settings);
    let capture = ScriptedCapture::new(solid_frame(64, 48, [10, 10, 10]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(15);
    while detector.calls() < 18 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    engine::stop(&h.state);
    kiosk.await.unwrap();

    let gaps = detector.call_gaps();
    assert!(gaps.len() >= 17, "only {} dispatches", gaps.len() + 1);
    let first = gaps[0];
    let last = *gaps.last().unwrap();
    // Every completion runs over target, so each one stretches the interval
    assert!(last >= Duration::from_millis(100), "last gap {:?}", last);
    assert!(last >= first * 2, "first {:?}, last {:?}", first, last);
    assert_eq!(detector.max_concurrency(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_detector_error_does_not_stop_recognition() {
    let dir = TempDir::new().unwrap();
    let (gallery, _) = two_person_gallery(&dir);
    let detector = Arc::new(
        ScriptedDetector::new(vec![detection(10, 10, 40, vec![1.0, 0.0])])
            .with_delay(Duration::from_millis(50))
            .failing_calls(&[2]),
    );
    let h = harness(gallery, detector.clone(), fast_settings());
    let capture = ScriptedCapture::new(solid_frame(160, 120, [90, 90, 90]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();

    let first = h.state.next_event(EVENT_WAIT).await.expect("first event");
    assert_eq!(first.matches()[0].label(), "alice");

    let deadline = tokio::time::Instant::now() + EVENT_WAIT;
    while detector.failures() == 0 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    assert_eq!(detector.failures(), 1);

    // The failed cycle has been collected; the previous faces stay up
    tokio::time::sleep(Duration::from_millis(20)).await;
    let faces = h.state.get_faces();
    assert_eq!(faces.len(), 1);
    assert_eq!(faces[0].label(), "alice");

    let after = h.state.next_event(EVENT_WAIT).await.expect("event after failure");
    assert_eq!(after.matches()[0].label(), "alice");
    assert!(detector.calls() >= 3);
    assert!(h.state.is_running());

    engine::stop(&h.state);
    kiosk.await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_settings_file_edit_reaches_running_loop() {
    let dir = TempDir::new().unwrap();
    let (gallery, _) = two_person_gallery(&dir);
    let path = dir.path().join("settings.toml");
    fast_settings().save(&path).unwrap();
    let store = Arc::new(SettingsStore::open(&path).unwrap());

    let detector = Arc::new(ScriptedDetector::new(vec![detection(
        10,
        10,
        40,
        vec![1.0, 0.05],
    )]));
    let h = harness_with_store(gallery, detector, store);
    let capture = ScriptedCapture::new(solid_frame(160, 120, [90, 90, 90]));

    let kiosk = engine::start(h.ctx.clone(), Box::new(capture), fast_options()).unwrap();
    let event = h.state.next_event(EVENT_WAIT).await.expect("event");
    assert!(event.matches()[0].is_match);

    RuntimeSettings {
        embedding_distance_threshold: 0.0001,
        ..fast_settings()
    }
    .save(&path)
    .unwrap();
    File::options()
        .write(true)
        .open(&path)
        .unwrap()
        .set_modified(SystemTime::now() + Duration::from_secs(5))
        .unwrap();

    let mut became_unknown = false;
    for _ in 0..50 {
        if let Some(event) = h.state.next_event(EVENT_WAIT).await {
            if !event.matches()[0].is_match {
                became_unknown = true;
                break;
            }
        }
    }
    assert!(became_unknown);
    assert_eq!(h.settings.snapshot().embedding_distance_threshold, 0.0001);

    engine::stop(&h.state);
    kiosk.await.unwrap();
}
