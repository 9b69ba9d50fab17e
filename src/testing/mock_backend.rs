use crate::errors::ScannerError;
use crate::negotiation::ConstraintProfile;
use crate::platform::{MediaBackend, VideoStream};
use crate::testing::synthetic_video_frame;
use crate::types::{DeviceDescriptor, TrackState, VideoFrame};
use async_trait::async_trait;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::watch;

const FRAME_SIZE: (u32, u32) = (16, 12);

#[derive(Default)]
struct MockState {
    devices: Vec<DeviceDescriptor>,
    permission_denied: bool,
    rejected_profiles: HashSet<String>,
    open_failures: VecDeque<ScannerError>,
    pending_checks: u32,
    zero_dimension_refreshes: u32,
    open_delay: Duration,
    release_delay: Duration,
    torch_supported: bool,
    streams: Vec<Arc<StreamState>>,
    profiles_tried: Vec<String>,
    max_concurrent: usize,
}

/// Scriptable in-memory camera backend.
///
/// Clones share state, so a test can keep a handle while the session owns
/// another.
#[derive(Clone, Default)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
    access_checks: Arc<AtomicU64>,
    scene: Arc<Mutex<Option<VideoFrame>>>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_devices(devices: &[(&str, &str)]) -> Self {
        let backend = Self::new();
        backend.set_devices(devices);
        backend
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_devices(&self, devices: &[(&str, &str)]) {
        self.lock().devices = devices
            .iter()
            .map(|(id, label)| DeviceDescriptor::new(*id, *label))
            .collect();
    }

    pub fn deny_permission(&self) {
        self.lock().permission_denied = true;
    }

    /// Opens under this profile fail with `ConstraintUnsatisfiable`.
    pub fn reject_profile(&self, name: &str) {
        self.lock().rejected_profiles.insert(name.to_string());
    }

    /// Queue an error for the next `open_stream` call.
    pub fn fail_next_open(&self, error: ScannerError) {
        self.lock().open_failures.push_back(error);
    }

    /// New streams report `Pending` for this many liveness checks.
    pub fn set_pending_checks(&self, checks: u32) {
        self.lock().pending_checks = checks;
    }

    /// New streams report `(0, 0)` until refreshed this many times.
    pub fn set_zero_dimension_refreshes(&self, refreshes: u32) {
        self.lock().zero_dimension_refreshes = refreshes;
    }

    /// Simulated acquisition latency.
    pub fn set_open_delay(&self, delay: Duration) {
        self.lock().open_delay = delay;
    }

    /// Every stream serves `frame` instead of the synthetic gradient.
    pub fn show_scene(&self, frame: VideoFrame) {
        *self.scene.lock().unwrap_or_else(|e| e.into_inner()) = Some(frame);
    }

    pub fn clear_scene(&self) {
        *self.scene.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    /// Stopped streams keep holding the device this long, like a capture
    /// thread finishing its last poll.
    pub fn set_release_delay(&self, delay: Duration) {
        self.lock().release_delay = delay;
    }

    pub fn set_torch_supported(&self, supported: bool) {
        self.lock().torch_supported = supported;
    }

    /// Streams currently holding the (simulated) hardware.
    pub fn open_stream_count(&self) -> usize {
        self.lock().streams.iter().filter(|s| s.holds_device()).count()
    }

    /// `refresh` calls across all streams.
    pub fn refresh_count(&self) -> u32 {
        self.lock()
            .streams
            .iter()
            .map(|s| s.refreshes.load(Ordering::SeqCst))
            .sum()
    }

    /// Streams ever opened, access checks excluded.
    pub fn total_opened(&self) -> usize {
        self.lock().streams.len()
    }

    /// Highest number of simultaneously open streams observed.
    pub fn max_concurrent_streams(&self) -> usize {
        self.lock().max_concurrent
    }

    pub fn access_check_count(&self) -> u64 {
        self.access_checks.load(Ordering::SeqCst)
    }

    /// Profile names passed to `open_stream`, in order.
    pub fn profiles_tried(&self) -> Vec<String> {
        self.lock().profiles_tried.clone()
    }

    /// Torch state of the most recent stream.
    pub fn torch_on(&self) -> bool {
        self.lock()
            .streams
            .last()
            .is_some_and(|s| s.torch.load(Ordering::SeqCst))
    }

    fn current_stream(&self) -> Option<Arc<StreamState>> {
        self.lock()
            .streams
            .iter()
            .rev()
            .find(|s| !s.stopped.load(Ordering::SeqCst))
            .cloned()
    }

    /// Simulate the hardware track of the newest open stream going away.
    pub fn end_current_track(&self) -> bool {
        match self.current_stream() {
            Some(stream) => {
                stream.state_tx.send_replace(TrackState::Ended);
                true
            }
            None => false,
        }
    }

    /// End the newest track without notifying `track_events` subscribers;
    /// only polling `track_state` notices.
    pub fn end_current_track_silently(&self) -> bool {
        match self.current_stream() {
            Some(stream) => {
                stream.ended_silently.store(true, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    /// The newest open stream stops rendering until refreshed `refreshes` times.
    pub fn blank_current_stream(&self, refreshes: u32) -> bool {
        match self.current_stream() {
            Some(stream) => {
                stream.zero_refreshes.store(refreshes, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl MediaBackend for MockBackend {
    async fn request_permission(&self) -> Result<(), ScannerError> {
        if self.lock().permission_denied {
            return Err(ScannerError::PermissionDenied(
                "user dismissed the prompt".to_string(),
            ));
        }
        self.access_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn enumerate_video_inputs(&self) -> Result<Vec<DeviceDescriptor>, ScannerError> {
        let state = self.lock();
        if state.permission_denied {
            return Err(ScannerError::PermissionDenied(
                "labels unavailable without access".to_string(),
            ));
        }
        Ok(state.devices.clone())
    }

    async fn open_stream(
        &self,
        device_id: &str,
        profile: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, ScannerError> {
        let delay = {
            let mut state = self.lock();
            state.profiles_tried.push(profile.name.clone());
            if state.permission_denied {
                return Err(ScannerError::PermissionDenied("access revoked".to_string()));
            }
            if !state.devices.iter().any(|d| d.id == device_id) {
                return Err(ScannerError::NoDeviceFound(format!("no device {device_id}")));
            }
            if let Some(error) = state.open_failures.pop_front() {
                return Err(error);
            }
            if state.rejected_profiles.contains(&profile.name) {
                return Err(ScannerError::ConstraintUnsatisfiable(format!(
                    "profile '{}' not supported",
                    profile.name
                )));
            }
            state.open_delay
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        let initial = if state.pending_checks > 0 {
            TrackState::Pending
        } else {
            TrackState::Live
        };
        let (state_tx, _) = watch::channel(initial);
        let (released_tx, _) = watch::channel(false);
        let stream = Arc::new(StreamState {
            device_id: device_id.to_string(),
            state_tx,
            released_tx,
            release_delay: state.release_delay,
            scene: self.scene.clone(),
            stopped: AtomicBool::new(false),
            ended_silently: AtomicBool::new(false),
            refreshes: AtomicU32::new(0),
            pending_checks: AtomicU32::new(state.pending_checks),
            zero_refreshes: AtomicU32::new(state.zero_dimension_refreshes),
            torch_supported: state.torch_supported,
            torch: AtomicBool::new(false),
            frames: AtomicU64::new(0),
        });
        state.streams.push(stream.clone());
        let open = state.streams.iter().filter(|s| s.holds_device()).count();
        state.max_concurrent = state.max_concurrent.max(open);
        Ok(Box::new(MockStream { state: stream }))
    }
}

struct StreamState {
    device_id: String,
    state_tx: watch::Sender<TrackState>,
    released_tx: watch::Sender<bool>,
    release_delay: Duration,
    scene: Arc<Mutex<Option<VideoFrame>>>,
    stopped: AtomicBool,
    ended_silently: AtomicBool,
    refreshes: AtomicU32,
    pending_checks: AtomicU32,
    zero_refreshes: AtomicU32,
    torch_supported: bool,
    torch: AtomicBool,
    frames: AtomicU64,
}

impl StreamState {
    fn holds_device(&self) -> bool {
        !*self.released_tx.borrow()
    }
}

pub struct MockStream {
    state: Arc<StreamState>,
}

impl VideoStream for MockStream {
    fn device_id(&self) -> &str {
        &self.state.device_id
    }

    fn has_video_track(&self) -> bool {
        true
    }

    fn track_state(&self) -> TrackState {
        if self.state.ended_silently.load(Ordering::SeqCst) {
            return TrackState::Ended;
        }
        let current = *self.state.state_tx.borrow();
        if current == TrackState::Pending {
            let remaining = self.state.pending_checks.load(Ordering::SeqCst);
            if remaining <= 1 {
                self.state.pending_checks.store(0, Ordering::SeqCst);
                self.state.state_tx.send_replace(TrackState::Live);
            } else {
                self.state.pending_checks.store(remaining - 1, Ordering::SeqCst);
            }
        }
        current
    }

    fn track_events(&self) -> watch::Receiver<TrackState> {
        self.state.state_tx.subscribe()
    }

    fn dimensions(&self) -> (u32, u32) {
        if self.is_stopped() || self.state.zero_refreshes.load(Ordering::SeqCst) > 0 {
            (0, 0)
        } else {
            FRAME_SIZE
        }
    }

    fn refresh(&self) -> Result<(), ScannerError> {
        if self.is_stopped() {
            return Err(ScannerError::TrackInterrupted("stream stopped".to_string()));
        }
        self.state.refreshes.fetch_add(1, Ordering::SeqCst);
        let _ = self
            .state
            .zero_refreshes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        Ok(())
    }

    fn grab_frame(&self) -> Result<Option<VideoFrame>, ScannerError> {
        let (width, height) = self.dimensions();
        if width == 0 || height == 0 {
            return Ok(None);
        }
        let n = self.state.frames.fetch_add(1, Ordering::SeqCst);
        let scene = self
            .state
            .scene
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let mut frame = scene.unwrap_or_else(|| synthetic_video_frame(n, width, height));
        frame.device_id = self.state.device_id.clone();
        Ok(Some(frame))
    }

    fn supports_torch(&self) -> bool {
        self.state.torch_supported
    }

    fn set_torch(&self, enabled: bool) -> Result<(), ScannerError> {
        if !self.state.torch_supported {
            return Err(ScannerError::Unsupported("no torch on mock".to_string()));
        }
        self.state.torch.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) {
        if self.state.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.state.state_tx.send_replace(TrackState::Ended);
        let delay = self.state.release_delay;
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) if !delay.is_zero() => {
                let state = self.state.clone();
                runtime.spawn(async move {
                    tokio::time::sleep(delay).await;
                    state.released_tx.send_replace(true);
                });
            }
            _ => {
                self.state.released_tx.send_replace(true);
            }
        }
    }

    fn is_stopped(&self) -> bool {
        self.state.stopped.load(Ordering::SeqCst)
    }

    fn release_events(&self) -> watch::Receiver<bool> {
        self.state.released_tx.subscribe()
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stream_lifecycle() {
        let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
        let stream = backend
            .open_stream("cam1", &ConstraintProfile::unconstrained())
            .await
            .unwrap();
        assert_eq!(backend.open_stream_count(), 1);
        assert_eq!(stream.track_state(), TrackState::Live);
        assert!(stream.grab_frame().unwrap().is_some());

        stream.stop();
        stream.stop();
        assert_eq!(backend.open_stream_count(), 0);
        assert_eq!(stream.track_state(), TrackState::Ended);
    }

    #[tokio::test]
    async fn test_scripted_faults() {
        let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
        backend.set_pending_checks(2);
        backend.set_zero_dimension_refreshes(1);
        let stream = backend
            .open_stream("cam1", &ConstraintProfile::unconstrained())
            .await
            .unwrap();

        assert_eq!(stream.track_state(), TrackState::Pending);
        assert_eq!(stream.track_state(), TrackState::Pending);
        assert_eq!(stream.track_state(), TrackState::Live);

        assert_eq!(stream.dimensions(), (0, 0));
        stream.refresh().unwrap();
        assert_eq!(stream.dimensions(), FRAME_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_delayed_release() {
        let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
        backend.set_release_delay(Duration::from_millis(400));
        let stream = backend
            .open_stream("cam1", &ConstraintProfile::unconstrained())
            .await
            .unwrap();

        stream.stop();
        assert!(stream.is_stopped());
        assert!(!stream.is_released());
        assert_eq!(backend.open_stream_count(), 1);

        assert!(crate::platform::wait_released(stream.as_ref(), Duration::from_secs(1)).await);
        assert_eq!(backend.open_stream_count(), 0);
    }

    #[tokio::test]
    async fn test_unknown_device() {
        let backend = MockBackend::with_devices(&[("cam1", "Back Camera")]);
        let result = backend
            .open_stream("cam9", &ConstraintProfile::unconstrained())
            .await;
        assert!(matches!(result, Err(ScannerError::NoDeviceFound(_))));
    }
}
