//! Configuration management for dulcescan
//!
//! Every empirically tuned threshold (dedup cooldown, keystroke burst timing,
//! retry counts) lives here so it can be calibrated against real hardware
//! instead of being baked into the state machines.

use crate::errors::ScannerError;
use crate::negotiation::NegotiationTable;
use crate::timing::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ScannerConfig {
    pub camera: CameraConfig,
    pub decode: DecodeConfig,
    pub usb: UsbConfig,
    pub recovery: RecoveryConfig,
}

/// Stream acquisition and validation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Liveness checks before a non-live track is fatal
    pub liveness_attempts: u32,
    /// Forced refreshes of a zero-dimension surface before a render fault
    pub dimension_refresh_attempts: u32,
    /// After this long without a hit the status nudges the user
    pub watchdog_ms: u64,
    /// Ordered constraint profiles, most demanding first
    pub negotiation: NegotiationTable,
}

/// Decode strategies and duplicate suppression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecodeConfig {
    /// Same code is re-emitted only after this cooldown
    pub dedup_cooldown_ms: u64,
    /// Continuous strategy frame interval
    pub continuous_interval_ms: u64,
    /// Snapshot strategy interval
    pub snapshot_interval_ms: u64,
    /// Contrast stretch pivot (0-255)
    pub contrast_midpoint: u8,
    /// Contrast stretch delta applied on each side of the pivot
    pub contrast_delta: u8,
    /// Hard decode errors counted for progressive feedback
    pub max_attempts: u32,
    /// Snapshot ticks between stream health checks
    pub health_check_every: u32,
    /// Pause between a hit and close/resume
    pub success_delay_ms: u64,
    /// Keep scanning after a hit instead of closing
    pub continuous_mode: bool,
}

/// USB keyboard-wedge decoder thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsbConfig {
    /// Gap above which the buffer is treated as human typing and cleared
    pub reset_threshold_ms: u64,
    /// Gap below which a keystroke counts towards a burst
    pub burst_gap_ms: u64,
    /// Consecutive fast keystrokes that arm the burst trigger
    pub burst_consecutive: u32,
    /// Quiet period after an armed burst before interpreting
    pub burst_settle_ms: u64,
    pub min_length: usize,
    pub max_length: usize,
    /// How often the capture surface re-claims focus
    pub focus_check_ms: u64,
}

/// Retry and recovery timing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoveryConfig {
    /// Delay before the one-shot reacquisition after a track ends
    pub recovery_delay_ms: u64,
    /// Settle time between tearing down and restarting a session
    pub restart_delay_ms: u64,
    /// Longest wait for a stopped stream to hand its device back
    pub release_timeout_ms: u64,
    pub initial_backoff_ms: u64,
    pub backoff_multiplier: f32,
    pub max_backoff_ms: u64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            liveness_attempts: 5,
            dimension_refresh_attempts: 3,
            watchdog_ms: 10_000,
            negotiation: NegotiationTable::default(),
        }
    }
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            dedup_cooldown_ms: 2000,
            continuous_interval_ms: 33,
            snapshot_interval_ms: 200,
            contrast_midpoint: 128,
            contrast_delta: 30,
            max_attempts: 5,
            health_check_every: 10,
            success_delay_ms: 800,
            continuous_mode: false,
        }
    }
}

impl Default for UsbConfig {
    fn default() -> Self {
        Self {
            reset_threshold_ms: 50,
            burst_gap_ms: 20,
            burst_consecutive: 3,
            burst_settle_ms: 30,
            min_length: 3,
            max_length: 30,
            focus_check_ms: 3000,
        }
    }
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            recovery_delay_ms: 1000,
            restart_delay_ms: 300,
            release_timeout_ms: 2000,
            initial_backoff_ms: 200,
            backoff_multiplier: 2.0,
            max_backoff_ms: 2000,
        }
    }
}

impl DecodeConfig {
    pub fn cooldown(&self) -> Duration {
        Duration::from_millis(self.dedup_cooldown_ms)
    }
}

impl RecoveryConfig {
    pub fn release_timeout(&self) -> Duration {
        Duration::from_millis(self.release_timeout_ms)
    }

    /// Backoff schedule for a given attempt budget.
    pub fn retry_policy(&self, max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(self.initial_backoff_ms),
            multiplier: self.backoff_multiplier,
            max_delay: Duration::from_millis(self.max_backoff_ms),
        }
    }
}

impl ScannerConfig {
    /// Load configuration from TOML file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ScannerError> {
        let path = path.as_ref();

        if !path.exists() {
            log::info!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| ScannerError::Config(format!("Failed to read config file: {}", e)))?;

        let config: ScannerConfig = toml::from_str(&contents)
            .map_err(|e| ScannerError::Config(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;
        log::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ScannerError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    ScannerError::Config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let toml_string = toml::to_string_pretty(self)
            .map_err(|e| ScannerError::Config(format!("Failed to serialize config: {}", e)))?;

        fs::write(path, toml_string)
            .map_err(|e| ScannerError::Config(format!("Failed to write config file: {}", e)))?;

        log::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Get default config file path
    pub fn default_path() -> PathBuf {
        PathBuf::from("dulcescan.toml")
    }

    /// Load from default location or fall back to defaults
    pub fn load_or_default() -> Self {
        Self::load_from_file(Self::default_path()).unwrap_or_else(|e| {
            log::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ScannerError> {
        self.camera.negotiation.validate()?;
        if self.camera.liveness_attempts == 0 {
            return Err(ScannerError::Config(
                "liveness_attempts must be at least 1".to_string(),
            ));
        }

        if self.decode.snapshot_interval_ms == 0 || self.decode.continuous_interval_ms == 0 {
            return Err(ScannerError::Config(
                "Decode intervals must be non-zero".to_string(),
            ));
        }
        if self.decode.health_check_every == 0 {
            return Err(ScannerError::Config(
                "health_check_every must be at least 1".to_string(),
            ));
        }

        let usb = &self.usb;
        if usb.min_length == 0 || usb.min_length > usb.max_length {
            return Err(ScannerError::Config(
                "USB length window must satisfy 1 <= min_length <= max_length".to_string(),
            ));
        }
        if usb.burst_gap_ms > usb.reset_threshold_ms {
            return Err(ScannerError::Config(
                "burst_gap_ms must not exceed reset_threshold_ms".to_string(),
            ));
        }
        if usb.focus_check_ms == 0 {
            return Err(ScannerError::Config(
                "focus_check_ms must be non-zero".to_string(),
            ));
        }

        if self.recovery.backoff_multiplier < 1.0 {
            return Err(ScannerError::Config(
                "backoff_multiplier must be >= 1.0".to_string(),
            ));
        }

        Ok(())
    }
}
