use crate::errors::ScannerError;
use crate::platform::MediaBackend;

/// Permission status enum
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum PermissionStatus {
    /// Permission granted
    Granted,
    /// Permission denied
    Denied,
    /// Could not be determined (no device to open, backend failure)
    NotDetermined,
}

impl std::fmt::Display for PermissionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PermissionStatus::Granted => write!(f, "granted"),
            PermissionStatus::Denied => write!(f, "denied"),
            PermissionStatus::NotDetermined => write!(f, "not_determined"),
        }
    }
}

/// Detailed permission information
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PermissionInfo {
    pub status: PermissionStatus,
    pub message: String,
    pub can_request: bool,
}

/// Check camera access by opening and releasing a throwaway stream.
pub async fn check_permission(backend: &dyn MediaBackend) -> PermissionInfo {
    match backend.request_permission().await {
        Ok(()) => PermissionInfo {
            status: PermissionStatus::Granted,
            message: "Camera access granted".to_string(),
            can_request: false,
        },
        Err(ScannerError::PermissionDenied(reason)) => PermissionInfo {
            status: PermissionStatus::Denied,
            message: format!("Camera access denied: {}", reason),
            can_request: true,
        },
        Err(e) => PermissionInfo {
            status: PermissionStatus::NotDetermined,
            message: format!("Camera permission could not be determined: {}", e),
            can_request: true,
        },
    }
}
