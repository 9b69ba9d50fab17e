//! Capture session lifecycle tests
//!
//! Drive `ScannerSession` against the scripted backend with a paused clock:
//! single-stream ownership, track loss and recovery, and teardown races.

use dulcescan::config::ScannerConfig;
use dulcescan::decode::DefaultEngineFactory;
use dulcescan::errors::ScannerError;
use dulcescan::session::{ScannerSession, SessionState};
use dulcescan::testing::{
    synthetic_ean13_frame, MockBackend, ScriptedEngine, ScriptedEngineFactory,
};
use dulcescan::types::{Severity, StatusUpdate};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn setup(devices: &[(&str, &str)]) -> (MockBackend, Arc<ScriptedEngine>, ScannerSession) {
    let backend = MockBackend::with_devices(devices);
    let engine = Arc::new(ScriptedEngine::new());
    let session = ScannerSession::new(
        Arc::new(backend.clone()),
        Arc::new(ScriptedEngineFactory::new(engine.clone())),
        ScannerConfig::default(),
    );
    (backend, engine, session)
}

fn drain(rx: &mut broadcast::Receiver<StatusUpdate>) -> Vec<StatusUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════════
// SINGLE STREAM OWNERSHIP
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_start_stop_start_holds_one_stream() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);

    session.start("cam1", None).await.unwrap();
    session.stop();
    session.start("cam1", None).await.unwrap();

    assert_eq!(backend.open_stream_count(), 1);
    assert_eq!(backend.max_concurrent_streams(), 1);
    assert_eq!(backend.total_opened(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_restart_releases_before_acquiring() {
    let (backend, _engine, session) =
        setup(&[("cam1", "Back Camera"), ("cam2", "Front Camera")]);

    session.start("cam1", None).await.unwrap();
    session.start("cam2", None).await.unwrap();
    session.switch_device("cam1").await.unwrap();

    assert_eq!(session.current_device().as_deref(), Some("cam1"));
    assert_eq!(backend.max_concurrent_streams(), 1);
    assert_eq!(backend.open_stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_starts_leave_one_stream() {
    let (backend, _engine, session) =
        setup(&[("cam1", "Back Camera"), ("cam2", "Front Camera")]);

    let (first, second) = futures::join!(session.start("cam1", None), session.start("cam2", None));
    assert!(first.is_ok() || second.is_ok());

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(backend.open_stream_count(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_switch_device_keeps_target_field() {
    let (_backend, _engine, session) =
        setup(&[("cam1", "Back Camera"), ("cam2", "Front Camera")]);

    session.start("cam1", Some("barcode-input".into())).await.unwrap();
    session.switch_device("cam2").await.unwrap();
    assert_eq!(session.target_field().as_deref(), Some("barcode-input"));
    assert_eq!(session.state(), SessionState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_switch_device_while_idle_is_noop() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.switch_device("cam1").await.unwrap();
    assert_eq!(backend.total_opened(), 0);
    assert_eq!(session.state(), SessionState::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_stop_is_idempotent_when_idle() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.stop();
    session.stop();
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
// INTERRUPTION AND RECOVERY
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_track_loss_recovers_once() {
    let (backend, engine, session) = setup(&[("cam1", "Back Camera")]);
    let mut events = session.subscribe_events();
    session.start("cam1", None).await.unwrap();
    let mut states = session.subscribe_state();

    assert!(backend.end_current_track());
    states.changed().await.unwrap();
    assert_eq!(*states.borrow_and_update(), SessionState::Interrupted);
    assert_eq!(backend.open_stream_count(), 0);

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(backend.open_stream_count(), 1);
    assert_eq!(backend.total_opened(), 2);

    // Decoding resumes on the new stream
    engine.show("7501031311309");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(events.try_recv().unwrap().code, "7501031311309");
}

#[tokio::test(start_paused = true)]
async fn test_failed_recovery_goes_idle_with_error() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    let mut status = session.subscribe_status();
    session.start("cam1", None).await.unwrap();

    // Device unplugged: the reacquire cannot find it
    backend.set_devices(&[]);
    backend.end_current_track();
    tokio::time::sleep(Duration::from_millis(1500)).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
    let last = drain(&mut status).pop().unwrap();
    assert_eq!(last.severity, Severity::Error);
    assert!(last.message.contains("restart the scanner"));
}

#[tokio::test(start_paused = true)]
async fn test_close_during_recovery_delay() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.start("cam1", None).await.unwrap();

    backend.end_current_track();
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(session.state(), SessionState::Interrupted);

    session.stop();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
    assert_eq!(backend.total_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_close_while_reacquire_in_flight() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.start("cam1", None).await.unwrap();

    backend.set_open_delay(Duration::from_millis(500));
    backend.end_current_track();
    // Past the recovery delay, inside the slow open
    tokio::time::sleep(Duration::from_millis(1200)).await;
    assert_eq!(session.state(), SessionState::Recovering);

    session.stop();
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_acquisition_is_cancelled() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    backend.set_pending_checks(3);
    let session = Arc::new(session);

    let starter = {
        let session = session.clone();
        tokio::spawn(async move { session.start("cam1", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Acquiring);
    session.stop();

    let result = starter.await.unwrap();
    assert_eq!(result, Err(ScannerError::Cancelled));
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stop_during_restart_settle_delay() {
    let (backend, _engine, session) =
        setup(&[("cam1", "Back Camera"), ("cam2", "Front Camera")]);
    session.start("cam1", None).await.unwrap();
    let session = Arc::new(session);

    let restart = {
        let session = session.clone();
        tokio::spawn(async move { session.start("cam2", None).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(session.state(), SessionState::Acquiring);
    session.stop();

    assert_eq!(restart.await.unwrap(), Err(ScannerError::Cancelled));
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(session.state(), SessionState::Idle);
    assert_eq!(backend.open_stream_count(), 0);
    assert_eq!(backend.total_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_slow_release_never_overlaps_streams() {
    let (backend, _engine, session) =
        setup(&[("cam1", "Back Camera"), ("cam2", "Front Camera")]);
    backend.set_release_delay(Duration::from_millis(800));

    session.start("cam1", None).await.unwrap();
    session.switch_device("cam2").await.unwrap();
    session.stop();
    session.start("cam1", None).await.unwrap();

    assert_eq!(backend.max_concurrent_streams(), 1);
    assert_eq!(session.state(), SessionState::Live);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_waits_for_release() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    backend.set_release_delay(Duration::from_millis(1500));
    session.start("cam1", None).await.unwrap();

    backend.end_current_track();
    tokio::time::sleep(Duration::from_millis(1200)).await;
    // Past the recovery delay, but the old stream still holds the device
    assert_eq!(backend.total_opened(), 1);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(backend.total_opened(), 2);
    assert_eq!(backend.max_concurrent_streams(), 1);
}

// ═══════════════════════════════════════════════════════════════════════════
// HEALTH CHECKS WHILE LIVE
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_health_check_refreshes_blank_stream() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.start("cam1", None).await.unwrap();
    let baseline = backend.refresh_count();

    assert!(backend.blank_current_stream(1));
    // Ten snapshot ticks at 200 ms
    tokio::time::sleep(Duration::from_millis(2100)).await;

    assert!(backend.refresh_count() > baseline);
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(backend.total_opened(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_health_check_catches_silent_track_end() {
    let (backend, _engine, session) = setup(&[("cam1", "Back Camera")]);
    session.start("cam1", None).await.unwrap();

    assert!(backend.end_current_track_silently());
    tokio::time::sleep(Duration::from_millis(2100)).await;
    assert_eq!(session.state(), SessionState::Interrupted);

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert_eq!(session.state(), SessionState::Live);
    assert_eq!(backend.total_opened(), 2);
}

// ═══════════════════════════════════════════════════════════════════════════
// DETECTION FLOW
// ═══════════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn test_both_strategies_same_code_single_event() {
    let (_backend, engine, session) = setup(&[("cam1", "Back Camera")]);
    session.set_continuous_mode(true);
    let mut events = session.subscribe_events();
    session.start("cam1", None).await.unwrap();

    engine.show("CODE-128");
    tokio::time::sleep(Duration::from_millis(1900)).await;

    assert_eq!(events.try_recv().unwrap().code, "CODE-128");
    assert!(events.try_recv().is_err());
}

#[tokio::test(start_paused = true)]
async fn test_status_sequence_on_scan() {
    let (_backend, engine, session) = setup(&[("cam1", "Back Camera")]);
    let mut status = session.subscribe_status();
    session.start("cam1", None).await.unwrap();
    engine.show("123456");
    tokio::time::sleep(Duration::from_millis(100)).await;

    let updates = drain(&mut status);
    let progress = updates
        .iter()
        .position(|u| u.message.contains("Negotiating"))
        .unwrap();
    let active = updates
        .iter()
        .position(|u| u.message.contains("Camera active"))
        .unwrap();
    let scanned = updates
        .iter()
        .position(|u| u.severity == Severity::Success)
        .unwrap();
    assert!(progress < active && active < scanned);
}

#[tokio::test(start_paused = true)]
async fn test_legacy_mode_dedups_consecutive_only() {
    let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
    let engine = Arc::new(ScriptedEngine::new());
    let session = ScannerSession::new(
        Arc::new(backend.clone()),
        Arc::new(ScriptedEngineFactory::new(engine.clone()).without_primary()),
        ScannerConfig::default(),
    );
    session.set_continuous_mode(true);
    let mut events = session.subscribe_events();
    session.start("cam1", None).await.unwrap();

    engine.show("A");
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(events.try_recv().unwrap().code, "A");
    // No cooldown re-emission in legacy mode
    assert!(events.try_recv().is_err());

    engine.show("B");
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(events.try_recv().unwrap().code, "B");
}

#[tokio::test(start_paused = true)]
async fn test_same_code_within_cooldown_then_rescan() {
    let (_backend, engine, session) = setup(&[("cam1", "Back Camera")]);
    session.set_continuous_mode(true);
    let mut events = session.subscribe_events();
    session.start("cam1", None).await.unwrap();

    engine.show("7501234567890");
    tokio::time::sleep(Duration::from_millis(500)).await;
    engine.hide();
    engine.show("7501234567890");
    tokio::time::sleep(Duration::from_millis(1000)).await;
    assert_eq!(events.try_recv().unwrap().code, "7501234567890");
    assert!(events.try_recv().is_err());

    // Cooldown over: the same code scans again
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert_eq!(events.try_recv().unwrap().code, "7501234567890");
}

#[tokio::test(start_paused = true)]
async fn test_different_code_emits_second_event() {
    let (_backend, engine, session) = setup(&[("cam1", "Back Camera")]);
    session.set_continuous_mode(true);
    let mut events = session.subscribe_events();
    session.start("cam1", None).await.unwrap();

    engine.show("7501234567890");
    tokio::time::sleep(Duration::from_millis(100)).await;
    engine.show("7501234567891");
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(events.try_recv().unwrap().code, "7501234567890");
    assert_eq!(events.try_recv().unwrap().code, "7501234567891");
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn test_default_engine_reads_product_barcode() {
    let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
    backend.show_scene(synthetic_ean13_frame("7501234567893", 3, 80).unwrap());
    let session = ScannerSession::new(
        Arc::new(backend.clone()),
        Arc::new(DefaultEngineFactory),
        ScannerConfig::default(),
    );
    let mut events = session.subscribe_events();
    session.start("cam1", Some("sku".into())).await.unwrap();

    let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(event.code, "7501234567893");
    assert_eq!(event.target_field.as_deref(), Some("sku"));
    assert_eq!(session.engine_mode(), Some(dulcescan::EngineMode::Dual));
}
