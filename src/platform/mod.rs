//! Media backend abstraction
//!
//! The capture session only talks to cameras through these traits. The native
//! implementation sits on nokhwa; tests use the scripted backend in
//! `crate::testing`.

mod nokhwa_backend;

pub use nokhwa_backend::NokhwaBackend;

use crate::errors::ScannerError;
use crate::negotiation::ConstraintProfile;
use crate::types::{DeviceDescriptor, TrackState, VideoFrame};
use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::watch;

/// Source of camera streams.
#[async_trait]
pub trait MediaBackend: Send + Sync {
    /// Open and immediately release a throwaway stream so the platform grants
    /// access and populates device labels.
    async fn request_permission(&self) -> Result<(), ScannerError>;

    /// Currently attached video inputs.
    async fn enumerate_video_inputs(&self) -> Result<Vec<DeviceDescriptor>, ScannerError>;

    /// Acquire an exclusive stream for `device_id` under `profile`.
    ///
    /// Fails with `ConstraintUnsatisfiable` when the profile cannot be met,
    /// which lets the caller move down the negotiation table.
    async fn open_stream(
        &self,
        device_id: &str,
        profile: &ConstraintProfile,
    ) -> Result<Box<dyn VideoStream>, ScannerError>;
}

/// One acquired camera stream; holds the hardware lock until `stop`.
pub trait VideoStream: Send + Sync {
    fn device_id(&self) -> &str;

    fn has_video_track(&self) -> bool;

    fn track_state(&self) -> TrackState;

    /// Watch channel that flips to `Ended` when the hardware track goes away.
    fn track_events(&self) -> watch::Receiver<TrackState>;

    /// Decoded frame dimensions; `(0, 0)` while nothing renders.
    fn dimensions(&self) -> (u32, u32);

    /// Rebind the stream to its display surface after a render fault.
    fn refresh(&self) -> Result<(), ScannerError>;

    /// Latest decoded frame, if one is available.
    fn grab_frame(&self) -> Result<Option<VideoFrame>, ScannerError>;

    fn supports_torch(&self) -> bool {
        false
    }

    fn set_torch(&self, _enabled: bool) -> Result<(), ScannerError> {
        Err(ScannerError::Unsupported(
            "torch not supported on this device".to_string(),
        ))
    }

    /// Begin releasing the hardware. Safe to call more than once.
    ///
    /// The device may still be held when this returns; see [`wait_released`].
    fn stop(&self);

    fn is_stopped(&self) -> bool;

    /// Flips to `true` once the device has actually been handed back.
    fn release_events(&self) -> watch::Receiver<bool>;

    fn is_released(&self) -> bool {
        *self.release_events().borrow()
    }
}

/// Wait until `stream` has let go of its device. Returns false on timeout.
pub async fn wait_released(stream: &dyn VideoStream, timeout: Duration) -> bool {
    let mut events = stream.release_events();
    let released = tokio::time::timeout(timeout, events.wait_for(|released| *released)).await;
    matches!(released, Ok(Ok(_)))
}
