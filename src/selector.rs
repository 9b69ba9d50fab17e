//! Device selection
//!
//! Lists video inputs after an access check and picks the default: a rear
//! facing camera when one can be identified by label, otherwise the first
//! device. A user override is held in memory only and is lost with the
//! selector.

use crate::errors::ScannerError;
use crate::platform::MediaBackend;
use crate::types::DeviceDescriptor;
use std::sync::Arc;

pub struct DeviceSelector {
    backend: Arc<dyn MediaBackend>,
    devices: Vec<DeviceDescriptor>,
    selected: Option<String>,
}

impl DeviceSelector {
    pub fn new(backend: Arc<dyn MediaBackend>) -> Self {
        Self {
            backend,
            devices: Vec::new(),
            selected: None,
        }
    }

    /// Check access, then enumerate. Never returns an empty list: a denied
    /// check is `PermissionDenied` and no devices is `NoDeviceFound`.
    pub async fn list_video_inputs(&mut self) -> Result<Vec<DeviceDescriptor>, ScannerError> {
        self.backend.request_permission().await.map_err(|e| match e {
            ScannerError::PermissionDenied(_) | ScannerError::NoDeviceFound(_) => e,
            other => ScannerError::PermissionDenied(other.to_string()),
        })?;

        let devices = self.backend.enumerate_video_inputs().await?;
        if devices.is_empty() {
            return Err(ScannerError::NoDeviceFound(
                "no video inputs attached".to_string(),
            ));
        }
        log::info!("Found {} video input(s)", devices.len());
        for (i, device) in devices.iter().enumerate() {
            log::debug!("  [{}] {} ({:?})", device.id, device.display_label(i), device.category);
        }

        // An override for a device that disappeared no longer applies.
        if let Some(selected) = &self.selected {
            if !devices.iter().any(|d| &d.id == selected) {
                log::warn!("Selected device {} is gone, reverting to default", selected);
                self.selected = None;
            }
        }
        self.devices = devices.clone();
        Ok(devices)
    }

    /// Devices from the most recent enumeration.
    pub fn devices(&self) -> &[DeviceDescriptor] {
        &self.devices
    }

    /// User override; the id must come from the last enumeration.
    pub fn select(&mut self, device_id: &str) -> Result<&DeviceDescriptor, ScannerError> {
        let device = self
            .devices
            .iter()
            .find(|d| d.id == device_id)
            .ok_or_else(|| ScannerError::NoDeviceFound(format!("unknown device {device_id}")))?;
        log::info!("Device override: {} ({})", device.id, device.label);
        self.selected = Some(device.id.clone());
        Ok(device)
    }

    pub fn clear_selection(&mut self) {
        self.selected = None;
    }

    /// Override if set, otherwise the default choice.
    pub fn current(&self) -> Option<&DeviceDescriptor> {
        self.selected
            .as_ref()
            .and_then(|id| self.devices.iter().find(|d| &d.id == id))
            .or_else(|| default_selection(&self.devices))
    }
}

/// Rear-facing by label, else the first device.
pub fn default_selection(devices: &[DeviceDescriptor]) -> Option<&DeviceDescriptor> {
    devices
        .iter()
        .find(|d| d.is_rear_facing())
        .or_else(|| devices.first())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockBackend;

    #[tokio::test]
    async fn test_prefers_back_camera() {
        let backend = Arc::new(MockBackend::with_devices(&[
            ("cam2", "Front Camera"),
            ("cam1", "Back Camera"),
        ]));
        let mut selector = DeviceSelector::new(backend);
        let devices = selector.list_video_inputs().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert_eq!(selector.current().unwrap().id, "cam1");
    }

    #[tokio::test]
    async fn test_falls_back_to_first() {
        let backend = Arc::new(MockBackend::with_devices(&[
            ("a", "Integrated Webcam"),
            ("b", "Front Camera"),
        ]));
        let mut selector = DeviceSelector::new(backend);
        selector.list_video_inputs().await.unwrap();
        assert_eq!(selector.current().unwrap().id, "a");
    }

    #[tokio::test]
    async fn test_denied_is_an_error_not_an_empty_list() {
        let backend = Arc::new(MockBackend::with_devices(&[("cam1", "Back Camera")]));
        backend.deny_permission();
        let mut selector = DeviceSelector::new(backend);
        let err = selector.list_video_inputs().await.unwrap_err();
        assert!(matches!(err, ScannerError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn test_no_devices() {
        let backend = Arc::new(MockBackend::with_devices(&[]));
        let mut selector = DeviceSelector::new(backend);
        let err = selector.list_video_inputs().await.unwrap_err();
        assert!(matches!(err, ScannerError::NoDeviceFound(_)));
    }

    #[tokio::test]
    async fn test_override_and_unknown_id() {
        let backend = Arc::new(MockBackend::with_devices(&[
            ("cam1", "Back Camera"),
            ("cam2", "Front Camera"),
        ]));
        let mut selector = DeviceSelector::new(backend.clone());
        selector.list_video_inputs().await.unwrap();

        selector.select("cam2").unwrap();
        assert_eq!(selector.current().unwrap().id, "cam2");
        assert!(selector.select("nope").is_err());
        assert_eq!(selector.current().unwrap().id, "cam2");

        // Device unplugged between enumerations
        backend.set_devices(&[("cam1", "Back Camera")]);
        selector.list_video_inputs().await.unwrap();
        assert_eq!(selector.current().unwrap().id, "cam1");
    }
}
