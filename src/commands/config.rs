use crate::commands::usb::reconfigure_usb;
use crate::config::ScannerConfig;
use std::sync::{Arc, RwLock};
use tauri::command;

lazy_static::lazy_static! {
    static ref GLOBAL_CONFIG: Arc<RwLock<ScannerConfig>> = Arc::new(RwLock::new(ScannerConfig::load_or_default()));
}

/// Snapshot of the active configuration, used when a session is opened.
pub(crate) fn current_config() -> ScannerConfig {
    GLOBAL_CONFIG
        .read()
        .map(|c| c.clone())
        .unwrap_or_else(|e| e.into_inner().clone())
}

/// Get the current configuration
#[command]
pub async fn get_config() -> Result<ScannerConfig, String> {
    let config = GLOBAL_CONFIG.read().map_err(|e| e.to_string())?;
    Ok(config.clone())
}

/// Update configuration. Camera settings apply to sessions opened afterwards;
/// USB thresholds reach a running listener immediately.
#[command]
pub async fn update_config(new_config: ScannerConfig) -> Result<(), String> {
    new_config.validate().map_err(|e| e.to_string())?;

    {
        let mut config = GLOBAL_CONFIG.write().map_err(|e| e.to_string())?;
        *config = new_config.clone();
    }
    reconfigure_usb(&new_config.usb)?;

    new_config
        .save_to_file(ScannerConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(())
}

/// Reset configuration to defaults
#[command]
pub async fn reset_config() -> Result<ScannerConfig, String> {
    let default_config = ScannerConfig::default();

    {
        let mut config = GLOBAL_CONFIG
            .write()
            .map_err(|e| format!("Failed to write config: {}", e))?;
        *config = default_config.clone();
    }
    reconfigure_usb(&default_config.usb)?;

    default_config
        .save_to_file(ScannerConfig::default_path())
        .map_err(|e| e.to_string())?;

    Ok(default_config)
}
