use crate::commands::scanner::get_handle;
use crate::permissions::{check_permission, PermissionInfo};
use crate::platform::{MediaBackend, NokhwaBackend};
use crate::selector::{default_selection, DeviceSelector};
use crate::types::{DeviceCategory, DeviceDescriptor};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tauri::command;

/// Picker entry for one camera.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeviceInfo {
    pub id: String,
    pub label: String,
    pub display_label: String,
    pub category: DeviceCategory,
    pub is_default: bool,
    pub is_selected: bool,
}

fn device_infos(devices: &[DeviceDescriptor], selected: Option<&str>) -> Vec<DeviceInfo> {
    let default_id = default_selection(devices).map(|d| d.id.clone());
    devices
        .iter()
        .enumerate()
        .map(|(i, d)| DeviceInfo {
            id: d.id.clone(),
            label: d.label.clone(),
            display_label: d.display_label(i),
            category: d.category,
            is_default: default_id.as_deref() == Some(d.id.as_str()),
            is_selected: selected == Some(d.id.as_str()),
        })
        .collect()
}

/// Enumerate cameras through `backend` without opening a session.
pub async fn list_devices_with(backend: Arc<dyn MediaBackend>) -> Result<Vec<DeviceInfo>, String> {
    let mut selector = DeviceSelector::new(backend);
    let devices = selector
        .list_video_inputs()
        .await
        .map_err(|e| e.user_message())?;
    let selected = selector.current().map(|d| d.id.clone());
    Ok(device_infos(&devices, selected.as_deref()))
}

/// List cameras. With a session id, re-enumerates through that session's
/// selector so its override is kept.
#[command]
pub async fn list_scanner_devices(session_id: Option<String>) -> Result<Vec<DeviceInfo>, String> {
    match session_id {
        Some(id) => {
            let handle = get_handle(&id).await?;
            let mut selector = handle.selector.lock().await;
            let devices = selector
                .list_video_inputs()
                .await
                .map_err(|e| e.user_message())?;
            let selected = selector.current().map(|d| d.id.clone());
            Ok(device_infos(&devices, selected.as_deref()))
        }
        None => list_devices_with(Arc::new(NokhwaBackend::new())).await,
    }
}

/// Pick a camera for a session; a running capture restarts on it.
#[command]
pub async fn select_scanner_device(session_id: String, device_id: String) -> Result<(), String> {
    let handle = get_handle(&session_id).await?;
    {
        let mut selector = handle.selector.lock().await;
        selector.select(&device_id).map_err(|e| e.user_message())?;
    }
    handle
        .session
        .switch_device(&device_id)
        .await
        .map_err(|e| e.user_message())
}

/// Check camera permission on the native backend.
#[command]
pub async fn check_camera_permission() -> Result<PermissionInfo, String> {
    let backend = NokhwaBackend::new();
    let info = check_permission(&backend).await;
    log::info!("Camera permission: {}", info.status);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[tokio::test]
    async fn test_device_infos_flags() {
        let backend = Arc::new(MockBackend::with_devices(&[
            ("0", "Front Camera"),
            ("1", "Back Camera"),
            ("2", "USB 2.0 Camera"),
        ]));
        let infos = list_devices_with(backend).await.unwrap();
        assert_eq!(infos.len(), 3);
        assert!(infos[1].is_default && infos[1].is_selected);
        assert_eq!(infos[2].display_label, "USB 2.0 Camera (USB reader)");
        assert!(!infos[0].is_default);
    }

    #[tokio::test]
    async fn test_denied_listing_is_user_message() {
        let backend = MockBackend::with_devices(&[("0", "Back Camera")]);
        backend.deny_permission();
        let err = list_devices_with(Arc::new(backend)).await.unwrap_err();
        assert!(err.contains("Permission denied"));
    }
}
