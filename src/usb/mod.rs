//! USB keyboard-wedge scanner input
//!
//! USB barcode readers present themselves as keyboards. [`UsbListener`] runs a
//! [`KeystrokeBuffer`] on a tokio task, fed key by key from the host, and
//! publishes recognised codes as [`ScanEvent`]s with `source = usb`.

mod buffer;
mod focus;

pub use buffer::{is_code_char, KeyInput, KeystrokeBuffer};
pub use focus::{maintain_focus, FocusSurface, FocusTarget};

use crate::config::UsbConfig;
use crate::errors::ScannerError;
use crate::types::ScanEvent;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const KEY_QUEUE: usize = 256;

/// Key event stamped with its arrival time.
#[derive(Debug, Clone, Copy)]
pub struct KeyStroke {
    pub key: KeyInput,
    pub at: Instant,
}

struct Running {
    keys: mpsc::Sender<KeyStroke>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// How far ahead of arrival a host-derived stamp may run before the clock
/// is re-anchored.
const HOST_CLOCK_MAX_LEAD: Duration = Duration::from_secs(1);

/// Maps host keydown timestamps (milliseconds on the host's monotonic clock)
/// onto local instants, so the decoder sees the gaps the user produced rather
/// than the gaps the IPC bridge delivered them with.
#[derive(Debug, Clone, Copy)]
struct HostClock {
    origin_ms: f64,
    base: Instant,
}

impl HostClock {
    fn new(host_ms: f64, now: Instant) -> Self {
        Self {
            origin_ms: host_ms,
            base: now,
        }
    }

    fn instant(&mut self, host_ms: f64, now: Instant) -> Instant {
        if host_ms.is_finite() && host_ms >= self.origin_ms {
            let offset = Duration::from_micros(((host_ms - self.origin_ms) * 1000.0).round() as u64);
            if let Some(at) = self.base.checked_add(offset) {
                if at <= now + HOST_CLOCK_MAX_LEAD {
                    return at;
                }
            }
        }
        // Host clock went backwards, jumped, or sent garbage.
        *self = Self::new(host_ms, now);
        now
    }
}

pub struct UsbListener {
    config: Mutex<UsbConfig>,
    focus: Option<Arc<dyn FocusSurface>>,
    events: broadcast::Sender<ScanEvent>,
    running: Mutex<Option<Running>>,
    host_clock: Mutex<Option<HostClock>>,
}

impl UsbListener {
    pub fn new(config: UsbConfig, focus: Option<Arc<dyn FocusSurface>>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self::with_sender(config, focus, events)
    }

    /// Publish on an existing channel, e.g. the camera session's.
    pub fn with_sender(
        config: UsbConfig,
        focus: Option<Arc<dyn FocusSurface>>,
        events: broadcast::Sender<ScanEvent>,
    ) -> Self {
        Self {
            config: Mutex::new(config),
            focus,
            events,
            running: Mutex::new(None),
            host_clock: Mutex::new(None),
        }
    }

    /// Thresholds the decoder runs with.
    pub fn config(&self) -> UsbConfig {
        self.config
            .lock()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Swap the thresholds. A running decoder is restarted on the new ones;
    /// a partially typed code is discarded. Returns true if anything changed.
    pub fn reconfigure(&self, config: UsbConfig) -> bool {
        {
            let mut current = self.config.lock().unwrap_or_else(|e| e.into_inner());
            if *current == config {
                return false;
            }
            *current = config;
        }
        if self.is_listening() {
            self.stop_listening();
            self.start_listening();
            log::info!("USB/keyboard scanner restarted with new thresholds");
        }
        true
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScanEvent> {
        self.events.subscribe()
    }

    pub fn is_listening(&self) -> bool {
        self.running
            .lock()
            .map(|r| r.as_ref().is_some_and(|r| !r.task.is_finished()))
            .unwrap_or(false)
    }

    /// Start the decoder task. Returns false if it was already running.
    /// Must be called from within a tokio runtime.
    pub fn start_listening(&self) -> bool {
        let Ok(mut running) = self.running.lock() else {
            return false;
        };
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return false;
        }

        let config = self.config();
        let (keys, rx) = mpsc::channel(KEY_QUEUE);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_decoder(
            rx,
            KeystrokeBuffer::new(&config),
            self.events.clone(),
            self.focus.clone(),
            Duration::from_millis(config.focus_check_ms.max(1)),
            cancel.clone(),
        ));
        if let Ok(mut clock) = self.host_clock.lock() {
            *clock = None;
        }
        *running = Some(Running { keys, cancel, task });
        log::info!("USB/keyboard scanner listening");
        true
    }

    /// Stop the decoder task. Safe to call when not listening.
    pub fn stop_listening(&self) {
        let Ok(mut running) = self.running.lock() else {
            return;
        };
        if let Some(r) = running.take() {
            r.cancel.cancel();
            r.task.abort();
            log::info!("USB/keyboard scanner stopped");
        }
    }

    /// Queue a key, stamped now.
    pub async fn push_key(&self, key: KeyInput) -> Result<(), ScannerError> {
        let keys = self.sender()?;
        keys.send(KeyStroke {
            key,
            at: Instant::now(),
        })
        .await
        .map_err(|_| ScannerError::Unsupported("USB listener stopped".to_string()))
    }

    /// Queue a key stamped from the host's keydown timestamp in milliseconds.
    pub async fn push_key_at_host_time(
        &self,
        key: KeyInput,
        host_ms: f64,
    ) -> Result<(), ScannerError> {
        let keys = self.sender()?;
        let at = self.host_instant(host_ms);
        keys.send(KeyStroke { key, at })
            .await
            .map_err(|_| ScannerError::Unsupported("USB listener stopped".to_string()))
    }

    fn host_instant(&self, host_ms: f64) -> Instant {
        let now = Instant::now();
        let Ok(mut clock) = self.host_clock.lock() else {
            return now;
        };
        clock
            .get_or_insert_with(|| HostClock::new(host_ms, now))
            .instant(host_ms, now)
    }

    /// Non-blocking variant for synchronous hosts (terminal readers).
    pub fn try_push_key(&self, key: KeyInput) -> Result<(), ScannerError> {
        self.sender()?
            .try_send(KeyStroke {
                key,
                at: Instant::now(),
            })
            .map_err(|e| ScannerError::InvalidScanInput(format!("key dropped: {e}")))
    }

    fn sender(&self) -> Result<mpsc::Sender<KeyStroke>, ScannerError> {
        self.running
            .lock()
            .ok()
            .and_then(|r| r.as_ref().map(|r| r.keys.clone()))
            .ok_or_else(|| ScannerError::Unsupported("USB listener not started".to_string()))
    }
}

impl Drop for UsbListener {
    fn drop(&mut self) {
        self.stop_listening();
    }
}

async fn run_decoder(
    mut rx: mpsc::Receiver<KeyStroke>,
    mut buffer: KeystrokeBuffer,
    events: broadcast::Sender<ScanEvent>,
    focus: Option<Arc<dyn FocusSurface>>,
    focus_every: Duration,
    cancel: CancellationToken,
) {
    let mut focus_ticker = tokio::time::interval(focus_every);
    let emit = |code: String| {
        // No subscribers is fine; the host may poll later or not at all.
        let _ = events.send(ScanEvent::usb(code));
    };

    // How far the last stroke's stamp trails its arrival. The settle window
    // runs on arrival time so delivery delay can't cut a burst short.
    let mut lag = Duration::ZERO;
    loop {
        let deadline = buffer.settle_deadline();
        tokio::select! {
            _ = cancel.cancelled() => break,
            stroke = rx.recv() => match stroke {
                Some(stroke) => {
                    log::trace!("key {:?}", stroke.key);
                    lag = Instant::now().saturating_duration_since(stroke.at);
                    if let Some(code) = buffer.push(stroke.key, stroke.at) {
                        emit(code);
                    }
                }
                None => break,
            },
            _ = tokio::time::sleep_until(deadline.map_or_else(Instant::now, |d| d + lag)), if deadline.is_some() => {
                if let Some(code) = deadline.and_then(|d| buffer.poll_idle(d)) {
                    emit(code);
                }
            }
            _ = focus_ticker.tick() => {
                if let Some(surface) = &focus {
                    maintain_focus(surface.as_ref());
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockFocusSurface;

    async fn type_keys(listener: &UsbListener, code: &str, gap_ms: u64) {
        for c in code.chars() {
            listener.push_key(KeyInput::Char(c)).await.unwrap();
            tokio::time::sleep(Duration::from_millis(gap_ms)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_then_enter_emits_once() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        assert!(listener.start_listening());
        assert!(!listener.start_listening());

        type_keys(&listener, "04912345", 8).await;
        listener.push_key(KeyInput::Enter).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let event = rx.try_recv().unwrap();
        assert_eq!(event.code, "04912345");
        assert_eq!(event.source, crate::types::ScanSource::Usb);
        assert!(event.target_field.is_none());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_human_typing_emits_nothing() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();

        type_keys(&listener, "04912345", 100).await;
        listener.push_key(KeyInput::Enter).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_without_enter_settles() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();

        type_keys(&listener, "ABC-123", 5).await;
        tokio::time::sleep(Duration::from_millis(60)).await;

        assert_eq!(rx.try_recv().unwrap().code, "ABC-123");
    }

    #[tokio::test(start_paused = true)]
    async fn test_focus_maintenance() {
        let surface = Arc::new(MockFocusSurface::new(FocusTarget::Input));
        let listener = UsbListener::new(UsbConfig::default(), Some(surface.clone()));
        listener.start_listening();

        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(surface.active_target(), FocusTarget::Input);

        surface.set_target(FocusTarget::Other);
        tokio::time::sleep(Duration::from_millis(3000)).await;
        assert_eq!(surface.active_target(), FocusTarget::Capture);
    }

    async fn type_at_host_time(
        listener: &UsbListener,
        code: &str,
        host_gap_ms: f64,
        arrival_gap_ms: u64,
    ) -> f64 {
        let mut host_ms = 1_000.0;
        for c in code.chars() {
            listener
                .push_key_at_host_time(KeyInput::Char(c), host_ms)
                .await
                .unwrap();
            host_ms += host_gap_ms;
            tokio::time::sleep(Duration::from_millis(arrival_gap_ms)).await;
        }
        host_ms
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_timestamps_survive_delivery_jitter() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();

        // Scanner speed on the host, delivered 25 ms apart: slower than the
        // burst gap, so arrival stamps alone would never arm.
        type_at_host_time(&listener, "04912345", 5.0, 25).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(rx.try_recv().unwrap().code, "04912345");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_timestamps_with_enter_after_slow_delivery() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();

        // 60 ms delivery gaps exceed the reset threshold. Keep the burst
        // unarmed so only Enter completes the code.
        listener.reconfigure(UsbConfig {
            burst_consecutive: 100,
            ..UsbConfig::default()
        });
        let host_ms = type_at_host_time(&listener, "7501234", 5.0, 60).await;
        listener
            .push_key_at_host_time(KeyInput::Enter, host_ms)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        assert_eq!(rx.try_recv().unwrap().code, "7501234");
    }

    #[tokio::test(start_paused = true)]
    async fn test_host_typing_gaps_win_over_batched_delivery() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();

        // Human typing on the host, flushed to us in one batch.
        let host_ms = type_at_host_time(&listener, "04912345", 120.0, 0).await;
        listener
            .push_key_at_host_time(KeyInput::Enter, host_ms)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_host_clock_follows_host_gaps() {
        let start = Instant::now();
        let mut clock = HostClock::new(500.0, start);

        // Arrived 40 ms late: stamped when the host saw it.
        let later = start + Duration::from_millis(50);
        assert_eq!(clock.instant(510.0, later), start + Duration::from_millis(10));

        // Delivered early relative to host gaps: host spacing is kept.
        let at = clock.instant(600.0, later + Duration::from_millis(10));
        assert_eq!(at, start + Duration::from_millis(100));

        // Host clock went backwards: re-anchor on arrival.
        let reset_at = later + Duration::from_millis(40);
        assert_eq!(clock.instant(10.0, reset_at), reset_at);
        assert_eq!(
            clock.instant(15.0, reset_at + Duration::from_millis(30)),
            reset_at + Duration::from_millis(5)
        );
        assert_eq!(clock.instant(f64::NAN, reset_at), reset_at);
    }

    #[test]
    fn test_host_clock_reanchors_on_large_jump() {
        let start = Instant::now();
        let mut clock = HostClock::new(0.0, start);

        let now = start + Duration::from_millis(10);
        assert_eq!(clock.instant(5_000.0, now), now);
        assert_eq!(
            clock.instant(5_005.0, now + Duration::from_millis(10)),
            now + Duration::from_millis(5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_reconfigure_restarts_decoder() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        let mut rx = listener.subscribe();
        listener.start_listening();
        assert!(!listener.reconfigure(UsbConfig::default()));

        let strict = UsbConfig {
            min_length: 8,
            ..UsbConfig::default()
        };
        assert!(listener.reconfigure(strict.clone()));
        assert!(listener.is_listening());
        assert_eq!(listener.config(), strict);

        type_keys(&listener, "7501234", 5).await;
        listener.push_key(KeyInput::Enter).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(rx.try_recv().is_err());

        type_keys(&listener, "75012345", 5).await;
        listener.push_key(KeyInput::Enter).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(rx.try_recv().unwrap().code, "75012345");
    }

    #[tokio::test]
    async fn test_reconfigure_while_stopped_stays_stopped() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        assert!(listener.reconfigure(UsbConfig {
            max_length: 12,
            ..UsbConfig::default()
        }));
        assert!(!listener.is_listening());
        assert_eq!(listener.config().max_length, 12);
    }

    #[tokio::test]
    async fn test_push_requires_listening() {
        let listener = UsbListener::new(UsbConfig::default(), None);
        assert!(listener.push_key(KeyInput::Enter).await.is_err());
        listener.start_listening();
        assert!(listener.is_listening());
        listener.stop_listening();
        listener.stop_listening();
        assert!(!listener.is_listening());
        assert!(listener.try_push_key(KeyInput::Enter).is_err());
    }
}
