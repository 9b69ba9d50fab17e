//! Shared value types: devices, frames, scan events and status updates.

use serde::{Deserialize, Serialize};

/// Coarse device category derived from the label, used for default selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceCategory {
    Front,
    Back,
    External,
    Other,
}

impl DeviceCategory {
    pub fn from_label(label: &str) -> Self {
        let lower = label.to_lowercase();
        if lower.contains("usb") || lower.contains("external") {
            DeviceCategory::External
        } else if lower.contains("front") || lower.contains("user") {
            DeviceCategory::Front
        } else if lower.contains("back") || lower.contains("environment") {
            DeviceCategory::Back
        } else {
            DeviceCategory::Other
        }
    }
}

/// Snapshot of one video input, refreshed on every enumeration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    pub id: String,
    pub label: String,
    pub category: DeviceCategory,
}

impl DeviceDescriptor {
    pub fn new(id: impl Into<String>, label: impl Into<String>) -> Self {
        let label = label.into();
        Self {
            id: id.into(),
            category: DeviceCategory::from_label(&label),
            label,
        }
    }

    /// Label shown in the device picker. `index` is the enumeration position.
    pub fn display_label(&self, index: usize) -> String {
        if self.label.trim().is_empty() {
            return format!("Camera {}", index + 1);
        }
        match self.category {
            DeviceCategory::External => format!("{} (USB reader)", self.label),
            DeviceCategory::Front => "Front camera".to_string(),
            DeviceCategory::Back => "Back camera (recommended)".to_string(),
            DeviceCategory::Other => self.label.clone(),
        }
    }

    /// Rear camera heuristic used for the default selection.
    pub fn is_rear_facing(&self) -> bool {
        let lower = self.label.to_lowercase();
        lower.contains("back") || lower.contains("environment")
    }
}

/// Input modality that produced a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanSource {
    Camera,
    Usb,
}

/// Normalized "code scanned" event delivered to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanEvent {
    pub code: String,
    pub source: ScanSource,
    /// Milliseconds since the Unix epoch
    pub timestamp: i64,
    pub target_field: Option<String>,
}

impl ScanEvent {
    pub fn camera(code: impl Into<String>, target_field: Option<String>) -> Self {
        Self {
            code: code.into(),
            source: ScanSource::Camera,
            timestamp: chrono::Utc::now().timestamp_millis(),
            target_field,
        }
    }

    pub fn usb(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            source: ScanSource::Usb,
            timestamp: chrono::Utc::now().timestamp_millis(),
            target_field: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Progress,
    Success,
    Warning,
    Error,
}

/// Progressive UX feedback; not an error channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusUpdate {
    pub message: String,
    pub severity: Severity,
    pub timestamp: i64,
}

impl StatusUpdate {
    pub fn new(message: impl Into<String>, severity: Severity) -> Self {
        Self {
            message: message.into(),
            severity,
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Readiness of the hardware track behind a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackState {
    /// Acquired but not yet delivering (some platforms report this transiently)
    Pending,
    Live,
    Ended,
}

/// One decoded RGB8 frame grabbed from a stream.
#[derive(Debug, Clone)]
pub struct VideoFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub device_id: String,
}

impl VideoFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, device_id: impl Into<String>) -> Self {
        Self {
            data,
            width,
            height,
            device_id: device_id.into(),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.width > 0
            && self.height > 0
            && self.data.len() == (self.width as usize) * (self.height as usize) * 3
    }
}
