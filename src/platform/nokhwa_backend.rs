use super::{wait_released, MediaBackend, VideoStream};
use crate::errors::ScannerError;
use crate::negotiation::ConstraintProfile;
use crate::types::{DeviceDescriptor, TrackState, VideoFrame};
use async_trait::async_trait;
use nokhwa::{
    pixel_format::RgbFormat,
    query,
    utils::{
        ApiBackend, CameraFormat, CameraIndex, FrameFormat, RequestedFormat,
        RequestedFormatType, Resolution,
    },
    CallbackCamera, NokhwaError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::{oneshot, watch};

/// Consecutive failed polls before the track is declared ended
const MAX_POLL_FAILURES: u32 = 30;

/// Upper bound on waiting for the access-check stream to hand its device back
const ACCESS_CHECK_RELEASE_TIMEOUT: Duration = Duration::from_secs(2);

/// Native cameras through nokhwa.
///
/// Each stream is owned by a dedicated capture thread; the async side only
/// sees the latest decoded frame and the track state.
pub struct NokhwaBackend {
    api: ApiBackend,
}

impl NokhwaBackend {
    pub fn new() -> Self {
        Self {
            api: ApiBackend::Auto,
        }
    }

    fn query_devices(api: ApiBackend) -> Result<Vec<DeviceDescriptor>, ScannerError> {
        let cameras = query(api).map_err(map_nokhwa_error)?;
        Ok(cameras
            .into_iter()
            .map(|info| DeviceDescriptor::new(info.index().to_string(), info.human_name()))
            .collect())
    }
}

impl Default for NokhwaBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MediaBackend for NokhwaBackend {
    async fn request_permission(&self) -> Result<(), ScannerError> {
        let devices = self.enumerate_video_inputs().await?;
        let Some(first) = devices.first() else {
            // Nothing to open; enumeration reports the empty list.
            return Ok(());
        };

        let check = self
            .open_stream(&first.id, &ConstraintProfile::unconstrained())
            .await?;
        check.stop();
        if wait_released(check.as_ref(), ACCESS_CHECK_RELEASE_TIMEOUT).await {
            log::debug!("Access check on device {} released", first.id);
        } else {
            log::warn!(
                "Access check on device {} still holds the camera after {:?}",
                first.id,
                ACCESS_CHECK_RELEASE_TIMEOUT
            );
        }
        Ok(())
    }

    async fn enumerate_video_inputs(&self) -> Result<Vec<DeviceDescriptor>, ScannerError> {
        let api = self.api;
        tokio::task::spawn_blocking(move || Self::query_devices(api))
            .await
            .map_err(|e| ScannerError::Backend(format!("Task join error: {}", e)))?
    }

    async fn open_stream(
        &self,
        device_id: &str,
        profile: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, ScannerError> {
        let stream = NokhwaStream::open(device_id.to_string(), profile.clone()).await?;
        Ok(Box::new(stream))
    }
}

struct Shared {
    latest: Mutex<Option<VideoFrame>>,
    dimensions: Mutex<(u32, u32)>,
    stop: AtomicBool,
    refresh: AtomicBool,
}

pub struct NokhwaStream {
    device_id: String,
    shared: Arc<Shared>,
    state_rx: watch::Receiver<TrackState>,
    released_rx: watch::Receiver<bool>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl NokhwaStream {
    async fn open(device_id: String, profile: ConstraintProfile) -> Result<Self, ScannerError> {
        let shared = Arc::new(Shared {
            latest: Mutex::new(None),
            dimensions: Mutex::new((0, 0)),
            stop: AtomicBool::new(false),
            refresh: AtomicBool::new(false),
        });
        let (state_tx, state_rx) = watch::channel(TrackState::Pending);
        let (released_tx, released_rx) = watch::channel(false);
        let (ready_tx, ready_rx) = oneshot::channel();

        let thread_shared = shared.clone();
        let thread_device = device_id.clone();
        let handle = std::thread::Builder::new()
            .name("dulcescan-capture".to_string())
            .spawn(move || {
                capture_loop(thread_device, profile, thread_shared, state_tx, ready_tx);
                // The camera is dropped by now.
                released_tx.send_replace(true);
            })
            .map_err(|e| ScannerError::Backend(format!("spawn failed: {e}")))?;

        match ready_rx.await {
            Ok(Ok(())) => Ok(Self {
                device_id,
                shared,
                state_rx,
                released_rx,
                thread: Mutex::new(Some(handle)),
            }),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(ScannerError::Backend(
                "capture thread exited before reporting".to_string(),
            )),
        }
    }
}

impl VideoStream for NokhwaStream {
    fn device_id(&self) -> &str {
        &self.device_id
    }

    fn has_video_track(&self) -> bool {
        !self.is_stopped()
    }

    fn track_state(&self) -> TrackState {
        *self.state_rx.borrow()
    }

    fn track_events(&self) -> watch::Receiver<TrackState> {
        self.state_rx.clone()
    }

    fn dimensions(&self) -> (u32, u32) {
        self.shared
            .dimensions
            .lock()
            .map(|d| *d)
            .unwrap_or((0, 0))
    }

    fn refresh(&self) -> Result<(), ScannerError> {
        if self.is_stopped() {
            return Err(ScannerError::TrackInterrupted(
                "stream already stopped".to_string(),
            ));
        }
        self.shared.refresh.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn grab_frame(&self) -> Result<Option<VideoFrame>, ScannerError> {
        let latest = self
            .shared
            .latest
            .lock()
            .map_err(|_| ScannerError::Backend("frame slot poisoned".to_string()))?;
        Ok(latest.clone())
    }

    fn stop(&self) {
        if self.shared.stop.swap(true, Ordering::SeqCst) {
            return;
        }
        log::info!("Stopping capture stream for device {}", self.device_id);
        // The capture thread lets go of the camera once its current poll
        // returns and then flips `release_events`.
        if let Ok(mut thread) = self.thread.lock() {
            thread.take();
        }
    }

    fn is_stopped(&self) -> bool {
        self.shared.stop.load(Ordering::SeqCst)
    }

    fn release_events(&self) -> watch::Receiver<bool> {
        self.released_rx.clone()
    }
}

impl Drop for NokhwaStream {
    fn drop(&mut self) {
        self.stop();
    }
}

fn camera_index(device_id: &str) -> CameraIndex {
    device_id
        .parse::<u32>()
        .map(CameraIndex::Index)
        .unwrap_or_else(|_| CameraIndex::String(device_id.to_string()))
}

fn requested_format(profile: &ConstraintProfile) -> RequestedFormat<'static> {
    match profile.ideal_resolution() {
        Some((width, height)) => {
            let fps = profile.ideal_frame_rate().unwrap_or(30);
            RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(CameraFormat::new(
                Resolution::new(width, height),
                FrameFormat::MJPEG,
                fps,
            )))
        }
        None => RequestedFormat::new::<RgbFormat>(RequestedFormatType::None),
    }
}

fn capture_loop(
    device_id: String,
    profile: ConstraintProfile,
    shared: Arc<Shared>,
    state_tx: watch::Sender<TrackState>,
    ready_tx: oneshot::Sender<Result<(), ScannerError>>,
) {
    let mut camera = match open_camera(&device_id, &profile) {
        Ok(camera) => camera,
        Err(e) => {
            let _ = ready_tx.send(Err(e));
            return;
        }
    };
    if ready_tx.send(Ok(())).is_err() {
        // Requester went away (session closed mid-acquire): release at once.
        log::debug!("Open of device {} abandoned, releasing camera", device_id);
        let _ = camera.stop_stream();
        drop(camera);
        return;
    }
    log::info!(
        "Capture stream open on device {} with profile '{}'",
        device_id,
        profile.name
    );

    let mut failures = 0;
    while !shared.stop.load(Ordering::SeqCst) {
        if shared.refresh.swap(false, Ordering::SeqCst) {
            log::debug!("Refreshing stream on device {}", device_id);
            let _ = camera.stop_stream();
            if let Err(e) = camera.open_stream() {
                log::warn!("Stream refresh failed on device {}: {}", device_id, e);
            }
        }

        match camera.poll_frame().and_then(|buffer| buffer.decode_image::<RgbFormat>()) {
            Ok(image) => {
                failures = 0;
                let (width, height) = (image.width(), image.height());
                let frame = VideoFrame::new(image.into_raw(), width, height, device_id.clone());
                if let Ok(mut dims) = shared.dimensions.lock() {
                    *dims = (width, height);
                }
                if let Ok(mut latest) = shared.latest.lock() {
                    *latest = Some(frame);
                }
                if *state_tx.borrow() != TrackState::Live {
                    let _ = state_tx.send(TrackState::Live);
                }
            }
            Err(e) => {
                failures += 1;
                log::debug!("Frame poll failed on device {}: {}", device_id, e);
                if failures >= MAX_POLL_FAILURES {
                    log::warn!("Track on device {} ended after repeated failures", device_id);
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }
    }

    if let Err(e) = camera.stop_stream() {
        log::warn!("Failed to stop stream on device {}: {}", device_id, e);
    }
    drop(camera);
    log::debug!("Camera on device {} released", device_id);
    if let Ok(mut dims) = shared.dimensions.lock() {
        *dims = (0, 0);
    }
    let _ = state_tx.send(TrackState::Ended);
}

fn open_camera(device_id: &str, profile: &ConstraintProfile) -> Result<CallbackCamera, ScannerError> {
    let mut camera = CallbackCamera::new(camera_index(device_id), requested_format(profile), |_| {})
        .map_err(map_nokhwa_error)?;

    camera.open_stream().map_err(map_nokhwa_error)?;

    if !profile.is_unconstrained() {
        let format = camera.camera_format().map_err(map_nokhwa_error)?;
        let (width, height) = (format.resolution().width(), format.resolution().height());
        if !profile.accepts(width, height, format.frame_rate()) {
            let _ = camera.stop_stream();
            return Err(ScannerError::ConstraintUnsatisfiable(format!(
                "profile '{}' rejected {}x{}@{}",
                profile.name,
                width,
                height,
                format.frame_rate()
            )));
        }
    }

    Ok(camera)
}

/// nokhwa reports failures as strings; classify them into the scanner taxonomy.
fn map_nokhwa_error(error: NokhwaError) -> ScannerError {
    let message = error.to_string();
    let lower = message.to_lowercase();
    if lower.contains("permission") || lower.contains("denied") || lower.contains("not authorized") {
        ScannerError::PermissionDenied(message)
    } else if lower.contains("not found")
        || lower.contains("no such")
        || lower.contains("could not find")
    {
        ScannerError::NoDeviceFound(message)
    } else {
        ScannerError::ConstraintUnsatisfiable(message)
    }
}
