//! Stream acquisition: tiered constraint negotiation followed by validation.

use super::Shared;
use crate::errors::ScannerError;
use crate::platform::VideoStream;
use crate::types::{Severity, TrackState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Open `device_id` under the first profile the hardware accepts, then make
/// sure the stream is actually live and rendering.
pub(super) async fn acquire(
    shared: &Shared,
    device_id: &str,
    cancel: &CancellationToken,
) -> Result<Arc<dyn VideoStream>, ScannerError> {
    let stream = negotiate(shared, device_id, cancel).await?;
    if cancel.is_cancelled() {
        shared.discard(stream);
        return Err(ScannerError::Cancelled);
    }
    match validate(shared, stream.as_ref(), cancel).await {
        Ok(()) => Ok(stream),
        Err(e) => {
            shared.discard(stream);
            Err(e)
        }
    }
}

async fn negotiate(
    shared: &Shared,
    device_id: &str,
    cancel: &CancellationToken,
) -> Result<Arc<dyn VideoStream>, ScannerError> {
    let mut last_error = None;
    for profile in shared.config.camera.negotiation.attempts() {
        if cancel.is_cancelled() {
            return Err(ScannerError::Cancelled);
        }
        shared.publish(
            format!("Negotiating resolution ({})...", profile.name),
            Severity::Progress,
        );
        match shared.backend.open_stream(device_id, &profile).await {
            Ok(stream) => {
                log::info!("Device {} accepted profile '{}'", device_id, profile.name);
                return Ok(Arc::from(stream));
            }
            Err(ScannerError::ConstraintUnsatisfiable(reason)) => {
                log::warn!("Profile '{}' rejected: {}", profile.name, reason);
                last_error = Some(ScannerError::ConstraintUnsatisfiable(reason));
            }
            Err(e) => return Err(e),
        }
    }
    Err(last_error.unwrap_or_else(|| {
        ScannerError::ConstraintUnsatisfiable("no constraint profiles configured".to_string())
    }))
}

async fn validate(
    shared: &Shared,
    stream: &dyn VideoStream,
    cancel: &CancellationToken,
) -> Result<(), ScannerError> {
    if !stream.has_video_track() {
        return Err(ScannerError::ConstraintUnsatisfiable(
            "stream has no video track".to_string(),
        ));
    }

    let camera = &shared.config.camera;
    let recovery = &shared.config.recovery;

    recovery
        .retry_policy(camera.liveness_attempts)
        .run(cancel, ScannerError::is_transient, |attempt| async move {
            match stream.track_state() {
                TrackState::Live => Ok(()),
                TrackState::Pending => {
                    log::debug!("Track not live yet (check {})", attempt);
                    Err(ScannerError::TrackInterrupted("track not live".to_string()))
                }
                TrackState::Ended => Err(ScannerError::Backend(
                    "track ended during acquisition".to_string(),
                )),
            }
        })
        .await?;

    let refreshes = camera.dimension_refresh_attempts;
    recovery
        .retry_policy(refreshes + 1)
        .run(cancel, ScannerError::is_transient, |attempt| async move {
            let (width, height) = stream.dimensions();
            if width > 0 && height > 0 {
                log::debug!("Stream rendering at {}x{}", width, height);
                return Ok(());
            }
            if attempt <= refreshes {
                shared.publish(
                    "Video has no dimensions - refreshing...",
                    Severity::Warning,
                );
                stream.refresh()?;
            }
            Err(ScannerError::RenderFault(
                "video surface has zero dimensions".to_string(),
            ))
        })
        .await
}
