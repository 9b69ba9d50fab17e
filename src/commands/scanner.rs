use crate::commands::config::current_config;
use crate::decode::{DecodeEngineFactory, DefaultEngineFactory, EngineMode};
use crate::platform::{MediaBackend, NokhwaBackend};
use crate::selector::DeviceSelector;
use crate::session::{default_feedback, ScanFeedback, ScannerSession, SessionState};
use crate::types::{DeviceDescriptor, ScanEvent, StatusUpdate};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};
use tauri::command;
use tokio::sync::broadcast::{self, error::TryRecvError};
use tokio::sync::{Mutex, RwLock};

lazy_static::lazy_static! {
    static ref SCANNER_REGISTRY: Arc<RwLock<HashMap<String, Arc<ScannerHandle>>>> = Arc::new(RwLock::new(HashMap::new()));
}

/// A scanner opened from the host: its session, the device selector that fed
/// it, and the receivers the host polls.
pub struct ScannerHandle {
    pub(crate) session: ScannerSession,
    pub(crate) selector: Mutex<DeviceSelector>,
    events: SyncMutex<broadcast::Receiver<ScanEvent>>,
    status: SyncMutex<broadcast::Receiver<StatusUpdate>>,
}

impl ScannerHandle {
    fn new(
        backend: Arc<dyn MediaBackend>,
        engines: Arc<dyn DecodeEngineFactory>,
        feedback: Arc<dyn ScanFeedback>,
    ) -> Self {
        let session =
            ScannerSession::with_feedback(backend.clone(), engines, current_config(), feedback);
        let events = SyncMutex::new(session.subscribe_events());
        let status = SyncMutex::new(session.subscribe_status());
        Self {
            session,
            selector: Mutex::new(DeviceSelector::new(backend)),
            events,
            status,
        }
    }

    fn next_event(&self) -> Result<Option<ScanEvent>, String> {
        let mut rx = self.events.lock().map_err(|_| "Mutex poisoned".to_string())?;
        loop {
            match rx.try_recv() {
                Ok(event) => return Ok(Some(event)),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("Host fell behind, {} scan events dropped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(None),
            }
        }
    }

    fn drain_status(&self) -> Result<Vec<StatusUpdate>, String> {
        let mut rx = self.status.lock().map_err(|_| "Mutex poisoned".to_string())?;
        let mut updates = Vec::new();
        loop {
            match rx.try_recv() {
                Ok(update) => updates.push(update),
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return Ok(updates),
            }
        }
    }

    async fn info(&self, session_id: &str) -> ScannerInfo {
        let devices = self.selector.lock().await.devices().to_vec();
        ScannerInfo {
            session_id: session_id.to_string(),
            state: self.session.state(),
            device_id: self.session.current_device(),
            target_field: self.session.target_field(),
            engine_mode: self.session.engine_mode(),
            continuous_mode: self.session.continuous_mode(),
            devices,
        }
    }
}

/// Scanner state as reported to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScannerInfo {
    pub session_id: String,
    pub state: SessionState,
    pub device_id: Option<String>,
    pub target_field: Option<String>,
    pub engine_mode: Option<EngineMode>,
    pub continuous_mode: bool,
    pub devices: Vec<DeviceDescriptor>,
}

pub(crate) async fn get_handle(session_id: &str) -> Result<Arc<ScannerHandle>, String> {
    let registry = SCANNER_REGISTRY.read().await;
    registry
        .get(session_id)
        .cloned()
        .ok_or_else(|| format!("No scanner session {}", session_id))
}

/// Open a scanner on `backend`: enumerate, pick the device (explicit id or the
/// default), start capturing, and register the session.
pub async fn open_scanner_with(
    backend: Arc<dyn MediaBackend>,
    engines: Arc<dyn DecodeEngineFactory>,
    feedback: Arc<dyn ScanFeedback>,
    target_field: Option<String>,
    device_id: Option<String>,
) -> Result<ScannerInfo, String> {
    let handle = Arc::new(ScannerHandle::new(backend, engines, feedback));

    let device = {
        let mut selector = handle.selector.lock().await;
        selector
            .list_video_inputs()
            .await
            .map_err(|e| e.user_message())?;
        if let Some(id) = &device_id {
            selector.select(id).map_err(|e| e.user_message())?;
        }
        selector
            .current()
            .map(|d| d.id.clone())
            .ok_or_else(|| "No camera available".to_string())?
    };

    handle
        .session
        .start(&device, target_field)
        .await
        .map_err(|e| e.user_message())?;

    let session_id = uuid::Uuid::new_v4().to_string();
    SCANNER_REGISTRY
        .write()
        .await
        .insert(session_id.clone(), handle.clone());
    log::info!("Scanner session {} opened on device {}", session_id, device);
    Ok(handle.info(&session_id).await)
}

/// Open the scanner modal: request access, pick a camera and start scanning.
#[command]
pub async fn open_scanner(
    target_field: Option<String>,
    device_id: Option<String>,
) -> Result<ScannerInfo, String> {
    open_scanner_with(
        Arc::new(NokhwaBackend::new()),
        Arc::new(DefaultEngineFactory),
        default_feedback(),
        target_field,
        device_id,
    )
    .await
}

/// (Re)start capture on an open session, optionally on another device.
#[command]
pub async fn start_scanner(
    session_id: String,
    device_id: Option<String>,
    target_field: Option<String>,
) -> Result<ScannerInfo, String> {
    let handle = get_handle(&session_id).await?;
    let device = {
        let mut selector = handle.selector.lock().await;
        if let Some(id) = &device_id {
            selector.select(id).map_err(|e| e.user_message())?;
        }
        selector
            .current()
            .map(|d| d.id.clone())
            .ok_or_else(|| "No camera available".to_string())?
    };
    let target = target_field.or_else(|| handle.session.target_field());
    handle
        .session
        .start(&device, target)
        .await
        .map_err(|e| e.user_message())?;
    Ok(handle.info(&session_id).await)
}

/// Stop capture but keep the session registered.
#[command]
pub async fn stop_scanner(session_id: String) -> Result<ScannerInfo, String> {
    let handle = get_handle(&session_id).await?;
    handle.session.stop();
    Ok(handle.info(&session_id).await)
}

/// Stop capture and forget the session.
#[command]
pub async fn close_scanner(session_id: String) -> Result<(), String> {
    let handle = SCANNER_REGISTRY.write().await.remove(&session_id);
    match handle {
        Some(handle) => {
            handle.session.stop();
            log::info!("Scanner session {} closed", session_id);
            Ok(())
        }
        // Closing twice is not an error.
        None => Ok(()),
    }
}

#[command]
pub async fn toggle_continuous_mode(session_id: String) -> Result<bool, String> {
    let handle = get_handle(&session_id).await?;
    Ok(handle.session.toggle_continuous_mode())
}

#[command]
pub async fn toggle_torch(session_id: String) -> Result<bool, String> {
    let handle = get_handle(&session_id).await?;
    handle.session.toggle_torch().map_err(|e| e.to_string())
}

#[command]
pub async fn get_scanner_state(session_id: String) -> Result<ScannerInfo, String> {
    let handle = get_handle(&session_id).await?;
    Ok(handle.info(&session_id).await)
}

/// Next unread scan event, if any.
#[command]
pub async fn poll_scan_event(session_id: String) -> Result<Option<ScanEvent>, String> {
    get_handle(&session_id).await?.next_event()
}

/// All status updates since the last poll.
#[command]
pub async fn poll_scanner_status(session_id: String) -> Result<Vec<StatusUpdate>, String> {
    get_handle(&session_id).await?.drain_status()
}

/// Number of registered sessions.
pub async fn open_session_count() -> usize {
    SCANNER_REGISTRY.read().await.len()
}
