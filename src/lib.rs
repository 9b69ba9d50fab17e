//! dulcescan: barcode scanning core for the DulcePOS admin
//!
//! Turns either a live camera feed or a USB keyboard-wedge reader into one
//! normalized "code scanned" event.
//!
//! # Components
//! - Device selection with permission probing and rear-camera preference
//! - Capture session state machine with tiered constraint negotiation,
//!   stream validation and one-shot recovery
//! - Decode adapter running continuous and contrast-enhanced snapshot
//!   strategies with shared duplicate suppression
//! - USB keystroke decoder that tells scanner bursts from human typing
//!
//! # Usage
//! Add this to your `Cargo.toml`:
//! ```toml
//! [dependencies]
//! dulcescan = "0.3"
//! tauri = { version = "2.0", features = ["protocol-asset"] }
//! ```
//!
//! Then in your Tauri app:
//! ```rust,ignore
//! fn main() {
//!     tauri::Builder::default()
//!         .plugin(dulcescan::init())
//!         .run(tauri::generate_context!())
//!         .expect("error while running tauri application");
//! }
//! ```
//!
//! Without Tauri, drive a [`ScannerSession`] directly:
//! ```rust,ignore
//! let backend = Arc::new(dulcescan::platform::NokhwaBackend::new());
//! let session = ScannerSession::new(backend, Arc::new(DefaultEngineFactory), ScannerConfig::default());
//! let mut events = session.subscribe_events();
//! session.start("0", None).await?;
//! let event = events.recv().await?;
//! ```
pub mod commands;
pub mod config;
pub mod decode;
pub mod errors;
pub mod negotiation;
pub mod permissions;
pub mod platform;
pub mod selector;
pub mod session;
pub mod timing;
pub mod types;
pub mod usb;

// Testing utilities - scripted backends for offline testing
pub mod testing;

// Re-exports for convenience
pub use config::ScannerConfig;
pub use decode::{DecodeEngine, DecodeEngineFactory, DefaultEngineFactory, EngineMode};
pub use errors::ScannerError;
pub use negotiation::{ConstraintProfile, NegotiationTable};
pub use platform::{MediaBackend, VideoStream};
pub use selector::DeviceSelector;
pub use session::{ScanFeedback, ScannerSession, SessionState};
pub use types::{DeviceDescriptor, ScanEvent, ScanSource, Severity, StatusUpdate};
pub use usb::{KeyInput, UsbListener};

use tauri::{
    plugin::{Builder, TauriPlugin},
    Runtime,
};

/// Initialize the dulcescan plugin with all commands
pub fn init<R: Runtime>() -> TauriPlugin<R> {
    Builder::new("dulcescan")
        .invoke_handler(tauri::generate_handler![
            // Scanner session commands
            commands::scanner::open_scanner,
            commands::scanner::start_scanner,
            commands::scanner::stop_scanner,
            commands::scanner::close_scanner,
            commands::scanner::toggle_continuous_mode,
            commands::scanner::toggle_torch,
            commands::scanner::get_scanner_state,
            commands::scanner::poll_scan_event,
            commands::scanner::poll_scanner_status,
            // Device commands
            commands::devices::list_scanner_devices,
            commands::devices::select_scanner_device,
            commands::devices::check_camera_permission,
            // USB reader commands
            commands::usb::start_usb_listener,
            commands::usb::stop_usb_listener,
            commands::usb::push_usb_key,
            commands::usb::poll_usb_scan_event,
            // Configuration commands
            commands::config::get_config,
            commands::config::update_config,
            commands::config::reset_config,
        ])
        .build()
}

/// Initialize logging for the scanner
pub fn init_logging() {
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "dulcescan=info");
    }
    let _ = env_logger::try_init();
}

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Get crate information
pub fn get_info() -> CrateInfo {
    CrateInfo {
        name: NAME.to_string(),
        version: VERSION.to_string(),
        description: DESCRIPTION.to_string(),
        os: std::env::consts::OS.to_string(),
    }
}

/// Crate information structure
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct CrateInfo {
    pub name: String,
    pub version: String,
    pub description: String,
    pub os: String,
}

#[cfg(test)]
mod lib_tests {
    use super::*;

    #[test]
    fn test_crate_info() {
        let info = get_info();
        assert_eq!(info.name, "dulcescan");
        assert!(!info.version.is_empty());
        assert!(!info.description.is_empty());
        assert!(!info.os.is_empty());
    }

    #[test]
    fn test_init_logging_is_repeatable() {
        init_logging();
        init_logging();
    }
}
