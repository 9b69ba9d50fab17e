//! Decode engine adapter
//!
//! Wraps an injectable [`DecodeEngine`] in two concurrent strategies over the
//! same stream: a continuous per-frame pass and a periodic snapshot pass on a
//! contrast-enhanced frame. Both report into a [`DetectionSink`], which owns
//! duplicate suppression and the session reaction to a hit.

pub mod dedup;
pub mod enhance;
mod rqrr_engine;
mod rxing_engine;

pub use dedup::Deduplicator;
pub use enhance::ContrastStretch;
pub use rqrr_engine::RqrrEngine;
pub use rxing_engine::RxingEngine;

use crate::config::DecodeConfig;
use crate::errors::ScannerError;
use crate::platform::VideoStream;
use crate::types::VideoFrame;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Barcode/QR decoder operating on a single frame.
pub trait DecodeEngine: Send + Sync {
    fn name(&self) -> &str;

    /// `Ok(None)` when nothing is in view; `Err` for a hard decode failure
    /// (something was found but could not be read).
    fn decode(&self, frame: &VideoFrame) -> Result<Option<String>, ScannerError>;
}

/// Builds engines for a session.
pub trait DecodeEngineFactory: Send + Sync {
    /// Primary engine, used for both strategies.
    fn create(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError>;

    /// Reduced-capability engine used when the primary cannot be built.
    fn create_legacy(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError> {
        self.create()
    }
}

/// Default factory: rxing for the full symbology set, rqrr (QR only) as the
/// legacy fallback.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultEngineFactory;

impl DecodeEngineFactory for DefaultEngineFactory {
    fn create(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError> {
        Ok(Arc::new(RxingEngine::new()))
    }

    fn create_legacy(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError> {
        Ok(Arc::new(RqrrEngine::new()))
    }
}

/// Which decode path a session ended up on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Continuous plus snapshot strategies, cooldown dedup
    Dual,
    /// Continuous only, consecutive-duplicate dedup
    Legacy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Continuous,
    Snapshot,
}

impl std::fmt::Display for Strategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Strategy::Continuous => write!(f, "continuous"),
            Strategy::Snapshot => write!(f, "snapshot"),
        }
    }
}

/// Receiver of strategy results. `generation` identifies the stream the
/// strategy was started for so late results from a torn-down stream are dropped.
pub trait DetectionSink: Send + Sync {
    /// True while a hit is being handled; strategies skip decoding.
    fn is_suppressed(&self, generation: u64) -> bool;

    fn on_detection(&self, generation: u64, code: String, strategy: Strategy);

    fn on_decode_error(&self, generation: u64, error: ScannerError);

    fn on_health_check(&self, generation: u64);
}

/// Strategy runner bound to one stream.
pub struct DecodeAdapter {
    engine: Arc<dyn DecodeEngine>,
    mode: EngineMode,
    stream: Arc<dyn VideoStream>,
    sink: Arc<dyn DetectionSink>,
    generation: u64,
    config: DecodeConfig,
}

impl DecodeAdapter {
    pub fn new(
        engine: Arc<dyn DecodeEngine>,
        mode: EngineMode,
        stream: Arc<dyn VideoStream>,
        sink: Arc<dyn DetectionSink>,
        generation: u64,
        config: DecodeConfig,
    ) -> Self {
        Self {
            engine,
            mode,
            stream,
            sink,
            generation,
            config,
        }
    }

    /// Spawn the strategy tasks. They exit when `cancel` fires.
    pub fn spawn(self, cancel: CancellationToken) -> Vec<JoinHandle<()>> {
        let adapter = Arc::new(self);
        let mut handles = vec![tokio::spawn(adapter.clone().run_continuous(cancel.clone()))];
        if adapter.mode == EngineMode::Dual {
            handles.push(tokio::spawn(adapter.run_snapshot(cancel)));
        }
        handles
    }

    async fn run_continuous(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config.continuous_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        log::debug!(
            "Continuous strategy started ({}, generation {})",
            self.engine.name(),
            self.generation
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            if self.sink.is_suppressed(self.generation) {
                continue;
            }
            let Some(frame) = self.next_frame() else {
                continue;
            };
            match self.decode(frame).await {
                Ok(Some(code)) => self.sink.on_detection(self.generation, code, Strategy::Continuous),
                Ok(None) => {}
                Err(e) => self.sink.on_decode_error(self.generation, e),
            }
        }
        log::debug!("Continuous strategy stopped (generation {})", self.generation);
    }

    async fn run_snapshot(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(Duration::from_millis(
            self.config.snapshot_interval_ms.max(1),
        ));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        let stretch = ContrastStretch::new(self.config.contrast_midpoint, self.config.contrast_delta);
        let every = self.config.health_check_every.max(1);
        let mut tick: u32 = 0;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tick = tick.wrapping_add(1);
            if tick % every == 0 {
                self.sink.on_health_check(self.generation);
            }
            if self.sink.is_suppressed(self.generation) {
                continue;
            }
            let Some(frame) = self.next_frame() else {
                continue;
            };
            let Some(enhanced) = stretch.enhance_frame(&frame) else {
                continue;
            };
            // Snapshot misses are expected; only hits are reported.
            if let Ok(Some(code)) = self.decode(enhanced).await {
                self.sink.on_detection(self.generation, code, Strategy::Snapshot);
            }
        }
        log::debug!("Snapshot strategy stopped (generation {})", self.generation);
    }

    fn next_frame(&self) -> Option<VideoFrame> {
        if self.stream.is_stopped() {
            return None;
        }
        match self.stream.grab_frame() {
            Ok(Some(frame)) if frame.is_valid() => Some(frame),
            Ok(_) => None,
            Err(e) => {
                log::debug!("Frame grab failed: {}", e);
                None
            }
        }
    }

    async fn decode(&self, frame: VideoFrame) -> Result<Option<String>, ScannerError> {
        let engine = self.engine.clone();
        tokio::task::spawn_blocking(move || engine.decode(&frame))
            .await
            .map_err(|e| ScannerError::Decode(format!("Task join error: {}", e)))?
    }
}
