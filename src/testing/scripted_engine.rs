use crate::decode::{DecodeEngine, DecodeEngineFactory};
use crate::errors::ScannerError;
use crate::types::VideoFrame;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone)]
enum Script {
    Nothing,
    Code(String),
    Fail(ScannerError),
}

/// Decode engine whose output is set by the test, not by frame content.
///
/// Models a physical code held in front of the camera: while `show`n, every
/// decode call from every strategy sees it.
#[derive(Debug)]
pub struct ScriptedEngine {
    script: Mutex<Script>,
    calls: AtomicU64,
}

impl ScriptedEngine {
    pub fn new() -> Self {
        Self {
            script: Mutex::new(Script::Nothing),
            calls: AtomicU64::new(0),
        }
    }

    pub fn show(&self, code: &str) {
        self.set(Script::Code(code.to_string()));
    }

    pub fn hide(&self) {
        self.set(Script::Nothing);
    }

    /// Every decode reports a hard error until changed.
    pub fn fail_with(&self, error: ScannerError) {
        self.set(Script::Fail(error));
    }

    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::SeqCst)
    }

    fn set(&self, script: Script) {
        *self.script.lock().unwrap_or_else(|e| e.into_inner()) = script;
    }
}

impl Default for ScriptedEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    fn decode(&self, _frame: &VideoFrame) -> Result<Option<String>, ScannerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match &*self.script.lock().unwrap_or_else(|e| e.into_inner()) {
            Script::Nothing => Ok(None),
            Script::Code(code) => Ok(Some(code.clone())),
            Script::Fail(e) => Err(e.clone()),
        }
    }
}

/// Factory handing out a shared [`ScriptedEngine`], with switchable
/// availability for the primary and legacy paths.
#[derive(Debug, Clone)]
pub struct ScriptedEngineFactory {
    engine: Arc<ScriptedEngine>,
    primary_available: bool,
    legacy_available: bool,
}

impl ScriptedEngineFactory {
    pub fn new(engine: Arc<ScriptedEngine>) -> Self {
        Self {
            engine,
            primary_available: true,
            legacy_available: true,
        }
    }

    pub fn without_primary(mut self) -> Self {
        self.primary_available = false;
        self
    }

    pub fn without_legacy(mut self) -> Self {
        self.legacy_available = false;
        self
    }

    pub fn engine(&self) -> Arc<ScriptedEngine> {
        self.engine.clone()
    }
}

impl DecodeEngineFactory for ScriptedEngineFactory {
    fn create(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError> {
        if !self.primary_available {
            return Err(ScannerError::DecodeEngineUnavailable(
                "primary engine failed to load".to_string(),
            ));
        }
        Ok(self.engine.clone())
    }

    fn create_legacy(&self) -> Result<Arc<dyn DecodeEngine>, ScannerError> {
        if !self.legacy_available {
            return Err(ScannerError::DecodeEngineUnavailable(
                "legacy engine failed to load".to_string(),
            ));
        }
        Ok(self.engine.clone())
    }
}
