use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScannerError {
    #[error("Permission denied error: {0}")]
    PermissionDenied(String),
    #[error("No camera found: {0}")]
    NoDeviceFound(String),
    #[error("Constraints unsatisfiable: {0}")]
    ConstraintUnsatisfiable(String),
    #[error("Track interrupted: {0}")]
    TrackInterrupted(String),
    #[error("Render fault: {0}")]
    RenderFault(String),
    #[error("Decode engine unavailable: {0}")]
    DecodeEngineUnavailable(String),
    #[error("Invalid scan input: {0}")]
    InvalidScanInput(String),
    #[error("Decode error: {0}")]
    Decode(String),
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Unsupported: {0}")]
    Unsupported(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl ScannerError {
    /// Errors that end a session immediately and must be shown to the user.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScannerError::PermissionDenied(_)
                | ScannerError::NoDeviceFound(_)
                | ScannerError::ConstraintUnsatisfiable(_)
        )
    }

    /// Faults retried locally before they escalate.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ScannerError::TrackInterrupted(_) | ScannerError::RenderFault(_)
        )
    }

    /// Actionable text for the status channel.
    pub fn user_message(&self) -> String {
        match self {
            ScannerError::PermissionDenied(_) => {
                "Permission denied - allow camera access".to_string()
            }
            ScannerError::NoDeviceFound(_) => "Camera not found - check the connection".to_string(),
            ScannerError::ConstraintUnsatisfiable(_) => {
                "Camera not compatible - try another camera".to_string()
            }
            ScannerError::TrackInterrupted(_) => {
                "Reconnect failed - restart the scanner manually".to_string()
            }
            ScannerError::RenderFault(_) => "Video not rendering - try another camera".to_string(),
            ScannerError::DecodeEngineUnavailable(_) => "Critical scanner error".to_string(),
            ScannerError::Cancelled => "Scanner closed".to_string(),
            other => format!("Error accessing the camera: {}", other),
        }
    }
}
