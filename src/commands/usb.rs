use crate::commands::config::current_config;
use crate::config::UsbConfig;
use crate::types::ScanEvent;
use crate::usb::{KeyInput, UsbListener};
use std::sync::{Arc, Mutex as SyncMutex};
use tauri::command;
use tokio::sync::broadcast::{self, error::TryRecvError};

struct UsbState {
    listener: Arc<UsbListener>,
    events: broadcast::Receiver<ScanEvent>,
}

lazy_static::lazy_static! {
    static ref USB_STATE: SyncMutex<Option<UsbState>> = SyncMutex::new(None);
}

fn with_state<T>(f: impl FnOnce(&mut Option<UsbState>) -> T) -> Result<T, String> {
    let mut state = USB_STATE.lock().map_err(|_| "Mutex poisoned".to_string())?;
    Ok(f(&mut state))
}

/// Start the keyboard-wedge listener on the current thresholds. Idempotent.
#[command]
pub async fn start_usb_listener() -> Result<bool, String> {
    let config = current_config().usb;
    with_state(|state| {
        let usb = state.get_or_insert_with(|| {
            let listener = Arc::new(UsbListener::new(config.clone(), None));
            let events = listener.subscribe();
            UsbState { listener, events }
        });
        usb.listener.reconfigure(config);
        usb.listener.start_listening()
    })
}

/// Push new thresholds to an existing listener; a running one restarts on them.
pub(crate) fn reconfigure_usb(config: &UsbConfig) -> Result<(), String> {
    with_state(|state| {
        if let Some(usb) = state.as_ref() {
            usb.listener.reconfigure(config.clone());
        }
    })
}

/// Stop the listener. Safe when it is not running.
#[command]
pub async fn stop_usb_listener() -> Result<(), String> {
    with_state(|state| {
        if let Some(usb) = state.as_ref() {
            usb.listener.stop_listening();
        }
    })
}

/// Forward one keydown from the host. `key` uses DOM key names
/// ("4", "A", "Enter", "Shift"). `timestamp_ms` is the event's host timestamp
/// (`KeyboardEvent.timeStamp`); without it the key is stamped on arrival.
#[command]
pub async fn push_usb_key(key: String, timestamp_ms: Option<f64>) -> Result<(), String> {
    let listener = with_state(|state| state.as_ref().map(|usb| usb.listener.clone()))?
        .ok_or_else(|| "USB listener not started".to_string())?;
    let key = KeyInput::from_key_name(&key);
    match timestamp_ms {
        Some(host_ms) => listener.push_key_at_host_time(key, host_ms).await,
        None => listener.push_key(key).await,
    }
    .map_err(|e| e.to_string())
}

/// Next decoded USB scan, if any.
#[command]
pub async fn poll_usb_scan_event() -> Result<Option<ScanEvent>, String> {
    with_state(|state| {
        let usb = state.as_mut()?;
        loop {
            match usb.events.try_recv() {
                Ok(event) => return Some(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    log::warn!("{} USB scan events dropped", skipped);
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return None,
            }
        }
    })
}
