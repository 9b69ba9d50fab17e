//! Capture session manager
//!
//! [`ScannerSession`] owns at most one camera capture at a time and drives it
//! through `Idle → Acquiring → Live`, handles unexpected track loss with a
//! one-shot recovery, and reacts to decode hits (confirm, emit, then close or
//! resume).
//!
//! All mutable state sits behind one mutex that is never held across an
//! await. Every capture carries a [`CancellationToken`]; each await point in
//! acquisition and recovery is followed by a check that the capture is still
//! the current one, so a closed session is never brought back to life.

mod acquire;
mod feedback;

#[cfg(feature = "audio")]
pub use feedback::ToneFeedback;
pub use feedback::{
    default_feedback, render_tones, LogFeedback, ScanFeedback, Tone, CONFIRMATION_TONES,
};

use crate::config::ScannerConfig;
use crate::decode::{
    DecodeAdapter, DecodeEngine, DecodeEngineFactory, Deduplicator, DetectionSink, EngineMode,
    Strategy,
};
use crate::errors::ScannerError;
use crate::platform::{wait_released, MediaBackend, VideoStream};
use crate::timing::sleep_or_cancel;
use crate::types::{ScanEvent, Severity, StatusUpdate, TrackState};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const CHANNEL_CAPACITY: usize = 64;

/// Capture lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Idle,
    Acquiring,
    Live,
    Interrupted,
    Recovering,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Acquiring => "acquiring",
            SessionState::Live => "live",
            SessionState::Interrupted => "interrupted",
            SessionState::Recovering => "recovering",
        };
        write!(f, "{}", name)
    }
}

/// One camera capture, from `start` until `stop` or a fatal failure.
struct Capture {
    id: u64,
    /// Bumped for every installed stream; decode results carry it
    generation: u64,
    device_id: String,
    target_field: Option<String>,
    cancel: CancellationToken,
    stream_cancel: CancellationToken,
    stream: Option<Arc<dyn VideoStream>>,
    engine: Option<(Arc<dyn DecodeEngine>, EngineMode)>,
    tasks: Vec<JoinHandle<()>>,
    attempts: u32,
    suppressed: bool,
    torch: bool,
}

impl Capture {
    /// Cancel everything and start releasing the stream, which is returned so
    /// the next acquisition can wait for the device to come free.
    fn release(self) -> Option<Arc<dyn VideoStream>> {
        self.cancel.cancel();
        for task in &self.tasks {
            task.abort();
        }
        let stream = self.stream?;
        stream.stop();
        Some(stream)
    }
}

struct Inner {
    next_id: u64,
    capture: Option<Capture>,
    dedup: Deduplicator,
    continuous_mode: bool,
    /// Stopped streams that may still hold their device
    releasing: Vec<Arc<dyn VideoStream>>,
}

impl Inner {
    fn current(&mut self, id: u64) -> Option<&mut Capture> {
        self.capture
            .as_mut()
            .filter(|c| c.id == id && !c.cancel.is_cancelled())
    }

    fn by_generation(&mut self, generation: u64) -> Option<&mut Capture> {
        self.capture
            .as_mut()
            .filter(|c| c.generation == generation && !c.cancel.is_cancelled())
    }
}

pub(crate) struct Shared {
    me: Weak<Shared>,
    backend: Arc<dyn MediaBackend>,
    engines: Arc<dyn DecodeEngineFactory>,
    feedback: Arc<dyn ScanFeedback>,
    config: ScannerConfig,
    events: broadcast::Sender<ScanEvent>,
    status: broadcast::Sender<StatusUpdate>,
    state: watch::Sender<SessionState>,
    inner: Mutex<Inner>,
}

/// Camera scanning session.
///
/// Dropping the session stops any capture it owns.
pub struct ScannerSession {
    shared: Arc<Shared>,
}

impl ScannerSession {
    pub fn new(
        backend: Arc<dyn MediaBackend>,
        engines: Arc<dyn DecodeEngineFactory>,
        config: ScannerConfig,
    ) -> Self {
        Self::with_feedback(backend, engines, config, Arc::new(LogFeedback))
    }

    pub fn with_feedback(
        backend: Arc<dyn MediaBackend>,
        engines: Arc<dyn DecodeEngineFactory>,
        config: ScannerConfig,
        feedback: Arc<dyn ScanFeedback>,
    ) -> Self {
        let (events, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (status, _) = broadcast::channel(CHANNEL_CAPACITY);
        let (state, _) = watch::channel(SessionState::Idle);
        let inner = Inner {
            next_id: 0,
            capture: None,
            dedup: Deduplicator::new(config.decode.cooldown()),
            continuous_mode: config.decode.continuous_mode,
            releasing: Vec::new(),
        };
        let shared = Arc::new_cyclic(|me| Shared {
            me: me.clone(),
            backend,
            engines,
            feedback,
            config,
            events,
            status,
            state,
            inner: Mutex::new(inner),
        });
        Self { shared }
    }

    /// Acquire `device_id` and start decoding. Any running capture is torn
    /// down first. `target_field` is echoed on every event from this capture.
    pub async fn start(
        &self,
        device_id: &str,
        target_field: Option<String>,
    ) -> Result<(), ScannerError> {
        let shared = &self.shared;
        // The new capture is registered before any await so `stop()` can
        // always reach it, including during the settle delay.
        let (id, cancel, prior) = {
            let mut inner = shared.lock();
            let prior = inner.capture.take();
            inner.dedup.reset();
            inner.next_id += 1;
            let id = inner.next_id;
            let cancel = CancellationToken::new();
            inner.capture = Some(Capture {
                id,
                generation: 0,
                device_id: device_id.to_string(),
                target_field,
                cancel: cancel.clone(),
                stream_cancel: cancel.child_token(),
                stream: None,
                engine: None,
                tasks: Vec::new(),
                attempts: 0,
                suppressed: false,
                torch: false,
            });
            shared.state.send_replace(SessionState::Acquiring);
            (id, cancel, prior)
        };
        let restarting = prior.is_some();
        if let Some(prior) = prior {
            shared.retire(prior, "restart");
        }
        log::info!("Starting scanner on device {}", device_id);
        shared.publish("Requesting camera access...", Severity::Progress);

        shared.await_releases(&cancel).await?;
        if restarting {
            let settle = Duration::from_millis(shared.config.recovery.restart_delay_ms);
            sleep_or_cancel(settle, &cancel).await?;
        }

        let stream = match acquire::acquire(shared, device_id, &cancel).await {
            Ok(stream) => stream,
            Err(ScannerError::Cancelled) => return Err(ScannerError::Cancelled),
            Err(e) => {
                shared.fail(id, &e);
                return Err(e);
            }
        };

        let engine = match shared.select_engine() {
            Ok(engine) => engine,
            Err(e) => {
                shared.discard(stream);
                shared.fail(id, &e);
                return Err(e);
            }
        };
        if let Some(capture) = shared.lock().current(id) {
            capture.engine = Some(engine);
        }

        shared.install_stream(id, stream)?;
        shared.publish(
            "Camera active - hold the code steady and centered",
            Severity::Info,
        );
        Ok(())
    }

    /// Stop scanning and release the camera. Idempotent and synchronous.
    pub fn stop(&self) {
        self.shared.teardown("stop");
    }

    /// Restart on another device if a capture is running; otherwise no-op.
    pub async fn switch_device(&self, device_id: &str) -> Result<(), ScannerError> {
        let target = {
            let inner = self.shared.lock();
            match &inner.capture {
                Some(c) if c.device_id == device_id => return Ok(()),
                Some(c) => c.target_field.clone(),
                None => return Ok(()),
            }
        };
        log::info!("Switching scanner to device {}", device_id);
        self.start(device_id, target).await
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn is_active(&self) -> bool {
        self.state() != SessionState::Idle
    }

    pub fn current_device(&self) -> Option<String> {
        self.shared.lock().capture.as_ref().map(|c| c.device_id.clone())
    }

    pub fn target_field(&self) -> Option<String> {
        self.shared
            .lock()
            .capture
            .as_ref()
            .and_then(|c| c.target_field.clone())
    }

    pub fn engine_mode(&self) -> Option<EngineMode> {
        self.shared
            .lock()
            .capture
            .as_ref()
            .and_then(|c| c.engine.as_ref().map(|(_, mode)| *mode))
    }

    pub fn continuous_mode(&self) -> bool {
        self.shared.lock().continuous_mode
    }

    pub fn set_continuous_mode(&self, enabled: bool) -> bool {
        self.shared.lock().continuous_mode = enabled;
        let message = if enabled {
            "Continuous mode on - scanner stays open"
        } else {
            "Continuous mode off - scanner closes after a scan"
        };
        self.shared.publish(message, Severity::Info);
        enabled
    }

    pub fn toggle_continuous_mode(&self) -> bool {
        let next = !self.continuous_mode();
        self.set_continuous_mode(next)
    }

    /// Flip the torch. An unsupported torch is reported as a warning status and
    /// `Unsupported`; the session itself is unaffected.
    pub fn toggle_torch(&self) -> Result<bool, ScannerError> {
        let mut inner = self.shared.lock();
        let capture = inner
            .capture
            .as_mut()
            .ok_or_else(|| ScannerError::Unsupported("scanner is not running".to_string()))?;
        let stream = capture
            .stream
            .clone()
            .ok_or_else(|| ScannerError::Unsupported("no active stream".to_string()))?;
        if !stream.supports_torch() {
            drop(inner);
            self.shared
                .publish("Flash not available on this camera", Severity::Warning);
            return Err(ScannerError::Unsupported(
                "torch not supported on this device".to_string(),
            ));
        }
        let next = !capture.torch;
        stream.set_torch(next)?;
        capture.torch = next;
        log::info!("Torch {}", if next { "on" } else { "off" });
        Ok(next)
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ScanEvent> {
        self.shared.events.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<StatusUpdate> {
        self.shared.status.subscribe()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// Sender for events, so other inputs (USB) can share the channel.
    pub fn event_sender(&self) -> broadcast::Sender<ScanEvent> {
        self.shared.events.clone()
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.shared.config
    }
}

impl Drop for ScannerSession {
    fn drop(&mut self) {
        self.shared.teardown("session dropped");
    }
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn publish(&self, message: impl Into<String>, severity: Severity) {
        let update = StatusUpdate::new(message, severity);
        log::debug!("status [{:?}] {}", update.severity, update.message);
        let _ = self.status.send(update);
    }

    /// Release the current capture, if any. Returns whether one existed.
    fn teardown(&self, reason: &str) -> bool {
        let capture = {
            let mut inner = self.lock();
            let capture = inner.capture.take();
            inner.dedup.reset();
            self.state.send_replace(SessionState::Idle);
            capture
        };
        match capture {
            Some(capture) => {
                self.retire(capture, reason);
                true
            }
            None => false,
        }
    }

    /// Release a capture that is no longer current and remember its stream
    /// until the device is handed back.
    fn retire(&self, capture: Capture, reason: &str) {
        let device = capture.device_id.clone();
        if let Some(stream) = capture.release() {
            self.track_release(stream);
        }
        log::info!("Scanner on device {} released ({})", device, reason);
    }

    /// Stop a stream that never became (or no longer is) the live one.
    fn discard(&self, stream: Arc<dyn VideoStream>) {
        stream.stop();
        self.track_release(stream);
    }

    fn track_release(&self, stream: Arc<dyn VideoStream>) {
        let mut inner = self.lock();
        inner.releasing.retain(|s| !s.is_released());
        if !stream.is_released() {
            inner.releasing.push(stream);
        }
    }

    /// Block acquisition until every stopped stream has freed its device, so
    /// two streams never hold the hardware at once.
    async fn await_releases(&self, cancel: &CancellationToken) -> Result<(), ScannerError> {
        let pending = self.lock().releasing.clone();
        let timeout = self.config.recovery.release_timeout();
        for stream in pending {
            tokio::select! {
                _ = cancel.cancelled() => return Err(ScannerError::Cancelled),
                released = wait_released(stream.as_ref(), timeout) => {
                    if !released {
                        log::warn!(
                            "Device {} not released after {:?}, continuing",
                            stream.device_id(),
                            timeout
                        );
                    }
                }
            }
        }
        self.lock().releasing.retain(|s| !s.is_released());
        Ok(())
    }

    /// Fatal failure of capture `id`: release it, go idle, tell the user.
    fn fail(&self, id: u64, error: &ScannerError) {
        let capture = {
            let mut inner = self.lock();
            if inner.current(id).is_none() {
                return;
            }
            self.state.send_replace(SessionState::Idle);
            inner.capture.take()
        };
        if let Some(capture) = capture {
            if let Some(stream) = capture.release() {
                self.track_release(stream);
            }
        }
        log::error!("Scanner failed: {}", error);
        self.publish(error.user_message(), Severity::Error);
    }

    fn select_engine(&self) -> Result<(Arc<dyn DecodeEngine>, EngineMode), ScannerError> {
        match self.engines.create() {
            Ok(engine) => Ok((engine, EngineMode::Dual)),
            Err(primary) => {
                log::warn!("Primary decode engine unavailable: {}", primary);
                match self.engines.create_legacy() {
                    Ok(engine) => {
                        self.publish("Scanner in compatibility mode", Severity::Warning);
                        Ok((engine, EngineMode::Legacy))
                    }
                    Err(legacy) => Err(ScannerError::DecodeEngineUnavailable(format!(
                        "primary: {primary}; legacy: {legacy}"
                    ))),
                }
            }
        }
    }

    /// Bind a validated stream to capture `id` and start its tasks. The stream
    /// is stopped if the capture is gone.
    fn install_stream(&self, id: u64, stream: Arc<dyn VideoStream>) -> Result<(), ScannerError> {
        let Some(me) = self.me.upgrade() else {
            stream.stop();
            return Err(ScannerError::Cancelled);
        };
        let mut inner = self.lock();
        inner.next_id += 1;
        let generation = inner.next_id;
        let Some(capture) = inner.current(id) else {
            drop(inner);
            log::debug!("Capture {} closed during acquisition, releasing stream", id);
            self.discard(stream);
            return Err(ScannerError::Cancelled);
        };
        let Some((engine, mode)) = capture.engine.clone() else {
            drop(inner);
            self.discard(stream);
            return Err(ScannerError::DecodeEngineUnavailable(
                "no engine bound to capture".to_string(),
            ));
        };

        let stream_cancel = capture.cancel.child_token();
        capture.generation = generation;
        capture.stream = Some(stream.clone());
        capture.stream_cancel = stream_cancel.clone();
        capture.attempts = 0;
        capture.suppressed = false;
        capture.tasks.retain(|t| !t.is_finished());

        let adapter = DecodeAdapter::new(
            engine,
            mode,
            stream.clone(),
            me.clone(),
            generation,
            self.config.decode.clone(),
        );
        capture.tasks.extend(adapter.spawn(stream_cancel.clone()));
        capture.tasks.push(tokio::spawn(watch_track(
            me.clone(),
            generation,
            stream,
            stream_cancel.clone(),
        )));
        capture.tasks.push(tokio::spawn(watchdog(me, generation, stream_cancel)));
        self.state.send_replace(SessionState::Live);
        log::info!("Scanner live on device {} ({:?} mode)", capture.device_id, mode);
        Ok(())
    }

    /// The track behind stream `generation` ended without us stopping it.
    fn handle_interruption(&self, generation: u64) {
        let Some(me) = self.me.upgrade() else {
            return;
        };
        let stream = {
            let mut inner = self.lock();
            let Some(capture) = inner.by_generation(generation) else {
                return;
            };
            let Some(stream) = capture.stream.take() else {
                return;
            };
            capture.stream_cancel.cancel();
            capture.torch = false;
            let task = tokio::spawn(recover(me, capture.id, capture.cancel.clone()));
            capture.tasks.push(task);
            self.state.send_replace(SessionState::Interrupted);
            stream
        };
        stream.stop();
        self.track_release(stream);
        log::warn!("Camera track ended unexpectedly, scheduling recovery");
        self.publish("Reconnecting camera...", Severity::Warning);
    }

    /// Continuous mode: ready for the next code on the same stream.
    fn resume(&self, id: u64) {
        let mut inner = self.lock();
        let Some(capture) = inner.current(id) else {
            return;
        };
        capture.attempts = 0;
        capture.suppressed = false;
        drop(inner);
        self.publish("Scanner active - scan the next code", Severity::Info);
    }

    /// Close capture `id` after a successful scan.
    fn finish(&self, id: u64) {
        let current = self.lock().current(id).is_some();
        if current {
            self.teardown("scan complete");
        }
    }
}

impl DetectionSink for Shared {
    fn is_suppressed(&self, generation: u64) -> bool {
        self.lock()
            .by_generation(generation)
            .map_or(true, |c| c.suppressed)
    }

    fn on_detection(&self, generation: u64, code: String, strategy: Strategy) {
        let now = Instant::now();
        let (id, target_field, cancel) = {
            let mut guard = self.lock();
            let inner = &mut *guard;
            let Some(capture) = inner
                .capture
                .as_mut()
                .filter(|c| c.generation == generation && !c.cancel.is_cancelled())
            else {
                return;
            };
            if capture.suppressed {
                return;
            }
            let mode = capture.engine.as_ref().map_or(EngineMode::Dual, |(_, m)| *m);
            let fresh = match mode {
                EngineMode::Dual => inner.dedup.accept(&code, now),
                EngineMode::Legacy => inner.dedup.accept_distinct(&code, now),
            };
            if !fresh {
                log::debug!("Duplicate {} from {} strategy suppressed", code, strategy);
                return;
            }
            capture.suppressed = true;
            (capture.id, capture.target_field.clone(), capture.cancel.clone())
        };

        log::info!("Code detected by {} strategy: {}", strategy, code);
        self.feedback.confirm(&code);
        self.publish(format!("Code scanned! {}", code), Severity::Success);
        let _ = self.events.send(ScanEvent::camera(code, target_field));

        if let Some(me) = self.me.upgrade() {
            let task = tokio::spawn(after_success(me, id, cancel));
            match self.lock().current(id) {
                Some(capture) => {
                    capture.tasks.retain(|t| !t.is_finished());
                    capture.tasks.push(task);
                }
                None => task.abort(),
            }
        }
    }

    fn on_decode_error(&self, generation: u64, error: ScannerError) {
        let attempts = {
            let mut inner = self.lock();
            let Some(capture) = inner.by_generation(generation) else {
                return;
            };
            if capture.suppressed {
                return;
            }
            capture.attempts += 1;
            capture.attempts
        };
        let max = self.config.decode.max_attempts;
        log::debug!("Decode attempt {}/{} failed: {}", attempts, max, error);
        if attempts >= max {
            return;
        }
        match attempts {
            2 => self.publish("Analyzing code - keep it steady", Severity::Warning),
            4 => self.publish("Almost there - move the code closer", Severity::Warning),
            _ => {}
        }
    }

    fn on_health_check(&self, generation: u64) {
        let stream = {
            let mut inner = self.lock();
            match inner.by_generation(generation).and_then(|c| c.stream.clone()) {
                Some(stream) => stream,
                None => return,
            }
        };
        if stream.track_state() == TrackState::Ended && !stream.is_stopped() {
            self.handle_interruption(generation);
            return;
        }
        if stream.dimensions() == (0, 0) {
            log::warn!("Video surface lost its dimensions, refreshing");
            if let Err(e) = stream.refresh() {
                log::warn!("Refresh failed: {}", e);
            }
        }
    }
}

async fn watch_track(
    shared: Arc<Shared>,
    generation: u64,
    stream: Arc<dyn VideoStream>,
    cancel: CancellationToken,
) {
    let mut events = stream.track_events();
    loop {
        if *events.borrow_and_update() == TrackState::Ended {
            break;
        }
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = events.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    if cancel.is_cancelled() {
        return;
    }
    shared.handle_interruption(generation);
}

async fn watchdog(shared: Arc<Shared>, generation: u64, cancel: CancellationToken) {
    let delay = Duration::from_millis(shared.config.camera.watchdog_ms);
    if sleep_or_cancel(delay, &cancel).await.is_err() {
        return;
    }
    let waiting = shared
        .lock()
        .by_generation(generation)
        .is_some_and(|c| !c.suppressed);
    if waiting {
        log::info!("No code after {:?}", delay);
        shared.publish(
            "Still scanning - try a different angle or more light",
            Severity::Warning,
        );
    }
}

async fn after_success(shared: Arc<Shared>, id: u64, cancel: CancellationToken) {
    let delay = Duration::from_millis(shared.config.decode.success_delay_ms);
    if sleep_or_cancel(delay, &cancel).await.is_err() {
        return;
    }
    let continuous = shared.lock().continuous_mode;
    if continuous {
        shared.resume(id);
    } else {
        shared.finish(id);
    }
}

/// One-shot reacquisition after a track loss.
async fn recover(shared: Arc<Shared>, id: u64, cancel: CancellationToken) {
    let delay = Duration::from_millis(shared.config.recovery.recovery_delay_ms);
    if sleep_or_cancel(delay, &cancel).await.is_err() {
        return;
    }

    let device_id = {
        let mut inner = shared.lock();
        let Some(capture) = inner.current(id) else {
            return;
        };
        let device_id = capture.device_id.clone();
        shared.state.send_replace(SessionState::Recovering);
        device_id
    };
    log::info!("Recovering camera on device {}", device_id);
    shared.publish("Recovering camera...", Severity::Progress);
    if shared.await_releases(&cancel).await.is_err() {
        return;
    }

    match acquire::acquire(&shared, &device_id, &cancel).await {
        Ok(stream) => {
            if shared.install_stream(id, stream).is_ok() {
                shared.publish("Camera reconnected", Severity::Success);
            }
        }
        Err(ScannerError::Cancelled) => {}
        Err(e) => {
            log::error!("Camera recovery failed: {}", e);
            shared.fail(id, &ScannerError::TrackInterrupted(e.to_string()));
        }
    }
}
