use crate::config::UsbConfig;
use crate::errors::ScannerError;
use std::time::Duration;
use tokio::time::Instant;

/// One key event as seen by the keyboard-wedge decoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    /// Printable character
    Char(char),
    Enter,
    /// Modifier or navigation key; only affects timing
    Other,
}

impl KeyInput {
    /// Map a DOM-style key name ("a", "Enter", "Shift") to a key event.
    pub fn from_key_name(name: &str) -> Self {
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => KeyInput::Char(c),
            _ if name == "Enter" => KeyInput::Enter,
            _ => KeyInput::Other,
        }
    }
}

/// Allowed code characters: alphanumerics plus `-_.*+@#$%^&()[]`.
pub fn is_code_char(c: char) -> bool {
    c.is_ascii_alphanumeric()
        || matches!(
            c,
            '-' | '_' | '.' | '*' | '+' | '@' | '#' | '$' | '%' | '^' | '&' | '(' | ')' | '[' | ']'
        )
}

/// Reconstructs codes from keystroke timing.
///
/// Scanners type a whole code in a burst with a few milliseconds between
/// keys; people don't. Any gap above the reset threshold discards what was
/// typed so far.
#[derive(Debug, Clone)]
pub struct KeystrokeBuffer {
    buffer: String,
    last_key: Option<Instant>,
    consecutive_fast: u32,
    armed: bool,
    last_code: Option<String>,
    reset_threshold: Duration,
    burst_gap: Duration,
    burst_consecutive: u32,
    settle: Duration,
    min_length: usize,
    max_length: usize,
}

impl KeystrokeBuffer {
    pub fn new(config: &UsbConfig) -> Self {
        Self {
            buffer: String::new(),
            last_key: None,
            consecutive_fast: 0,
            armed: false,
            last_code: None,
            reset_threshold: Duration::from_millis(config.reset_threshold_ms),
            burst_gap: Duration::from_millis(config.burst_gap_ms),
            burst_consecutive: config.burst_consecutive,
            settle: Duration::from_millis(config.burst_settle_ms),
            min_length: config.min_length,
            max_length: config.max_length,
        }
    }

    /// Feed one key received at `now`. Returns a code when this key completes one.
    pub fn push(&mut self, key: KeyInput, now: Instant) -> Option<String> {
        let gap = self.last_key.map(|last| now.saturating_duration_since(last));
        if gap.map_or(true, |g| g > self.reset_threshold) {
            self.clear();
        }
        self.last_key = Some(now);

        match key {
            KeyInput::Enter => {
                if self.buffer.is_empty() {
                    return None;
                }
                self.take_code()
            }
            KeyInput::Char(c) => {
                self.buffer.push(c);
                if self.buffer.chars().count() >= self.max_length {
                    return self.take_code();
                }
                let fast = gap.is_some_and(|g| g < self.burst_gap);
                if fast && self.buffer.chars().count() >= self.min_length {
                    self.consecutive_fast += 1;
                    if self.consecutive_fast >= self.burst_consecutive {
                        self.armed = true;
                    }
                }
                None
            }
            KeyInput::Other => None,
        }
    }

    /// When an armed burst should be interpreted if no further key arrives.
    pub fn settle_deadline(&self) -> Option<Instant> {
        match (self.armed, self.last_key) {
            (true, Some(last)) => Some(last + self.settle),
            _ => None,
        }
    }

    /// Interpret an armed burst once keys have stopped for the settle window.
    pub fn poll_idle(&mut self, now: Instant) -> Option<String> {
        match self.settle_deadline() {
            Some(deadline) if now >= deadline => self.take_code(),
            _ => None,
        }
    }

    pub fn pending(&self) -> &str {
        &self.buffer
    }

    pub fn last_code(&self) -> Option<&str> {
        self.last_code.as_deref()
    }

    fn clear(&mut self) {
        self.buffer.clear();
        self.consecutive_fast = 0;
        self.armed = false;
    }

    fn take_code(&mut self) -> Option<String> {
        let raw = std::mem::take(&mut self.buffer);
        self.clear();
        match self.interpret(&raw) {
            Ok(code) => {
                log::info!("USB scanner detected code: {}", code);
                self.last_code = Some(code.clone());
                Some(code)
            }
            Err(e) => {
                log::debug!("Dropped keystroke buffer: {}", e);
                None
            }
        }
    }

    fn interpret(&self, raw: &str) -> Result<String, ScannerError> {
        let code = raw.trim();
        let len = code.chars().count();
        if len < self.min_length || len > self.max_length {
            return Err(ScannerError::InvalidScanInput(format!(
                "length {} outside [{}, {}]",
                len, self.min_length, self.max_length
            )));
        }
        if self.last_code.as_deref() == Some(code) {
            return Err(ScannerError::InvalidScanInput(format!(
                "duplicate of previous scan {code}"
            )));
        }
        if let Some(bad) = code.chars().find(|c| !is_code_char(*c)) {
            return Err(ScannerError::InvalidScanInput(format!(
                "unexpected character {bad:?}"
            )));
        }
        Ok(code.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn type_code(buf: &mut KeystrokeBuffer, start: Instant, code: &str, gap_ms: u64) -> (Instant, Option<String>) {
        let mut now = start;
        let mut out = None;
        for c in code.chars() {
            if let Some(code) = buf.push(KeyInput::Char(c), now) {
                out = Some(code);
            }
            now += Duration::from_millis(gap_ms);
        }
        (now, out)
    }

    #[test]
    fn test_scanner_burst_with_enter() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let (now, early) = type_code(&mut buf, Instant::now(), "04912345", 10);
        assert!(early.is_none());
        assert_eq!(buf.push(KeyInput::Enter, now).as_deref(), Some("04912345"));
        assert_eq!(buf.pending(), "");
    }

    #[test]
    fn test_human_typing_never_emits() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let (now, early) = type_code(&mut buf, Instant::now(), "04912345", 100);
        assert!(early.is_none());
        assert_eq!(buf.pending(), "5");
        assert!(buf.push(KeyInput::Enter, now).is_none());
    }

    #[test]
    fn test_burst_settles_without_enter() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let (now, _) = type_code(&mut buf, Instant::now(), "ABC123", 5);
        let deadline = buf.settle_deadline().expect("burst should be armed");
        assert!(buf.poll_idle(now).is_none());
        assert_eq!(buf.poll_idle(deadline).as_deref(), Some("ABC123"));
    }

    #[test]
    fn test_slow_burst_not_armed() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        type_code(&mut buf, Instant::now(), "ABC123", 30);
        assert!(buf.settle_deadline().is_none());
        assert_eq!(buf.pending(), "ABC123");
    }

    #[test]
    fn test_max_length_interprets() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let code: String = std::iter::repeat('7').take(30).collect();
        let (_, out) = type_code(&mut buf, Instant::now(), &code, 1);
        assert_eq!(out, Some(code));
    }

    #[test]
    fn test_duplicate_suppressed() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let t0 = Instant::now();
        let (now, _) = type_code(&mut buf, t0, "750100", 5);
        assert!(buf.push(KeyInput::Enter, now).is_some());

        let later = now + Duration::from_secs(5);
        let (now, _) = type_code(&mut buf, later, "750100", 5);
        assert!(buf.push(KeyInput::Enter, now).is_none());

        let later = now + Duration::from_secs(5);
        let (now, _) = type_code(&mut buf, later, "750101", 5);
        assert_eq!(buf.push(KeyInput::Enter, now).as_deref(), Some("750101"));
    }

    #[test]
    fn test_invalid_characters_dropped() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let (now, _) = type_code(&mut buf, Instant::now(), "12 34!", 5);
        assert!(buf.push(KeyInput::Enter, now).is_none());
        assert!(buf.last_code().is_none());
    }

    #[test]
    fn test_modifier_keys_keep_timing() {
        let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
        let mut now = Instant::now();
        for key in [
            KeyInput::Other,
            KeyInput::Char('A'),
            KeyInput::Char('b'),
            KeyInput::Other,
            KeyInput::Char('C'),
        ] {
            buf.push(key, now);
            now += Duration::from_millis(5);
        }
        assert_eq!(buf.push(KeyInput::Enter, now).as_deref(), Some("AbC"));
    }

    #[test]
    fn test_key_names() {
        assert_eq!(KeyInput::from_key_name("a"), KeyInput::Char('a'));
        assert_eq!(KeyInput::from_key_name("Enter"), KeyInput::Enter);
        assert_eq!(KeyInput::from_key_name("Shift"), KeyInput::Other);
    }

    proptest! {
        #[test]
        fn prop_slow_keys_never_emit(code in "[0-9A-Z]{3,20}", gap in 51u64..500) {
            let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
            let (now, early) = type_code(&mut buf, Instant::now(), &code, gap);
            prop_assert!(early.is_none());
            prop_assert!(buf.push(KeyInput::Enter, now).is_none());
        }

        #[test]
        fn prop_valid_burst_emits_exactly(code in "[0-9A-Za-z]{3,29}") {
            let mut buf = KeystrokeBuffer::new(&UsbConfig::default());
            let (now, early) = type_code(&mut buf, Instant::now(), &code, 4);
            prop_assert!(early.is_none());
            prop_assert_eq!(buf.push(KeyInput::Enter, now), Some(code));
        }
    }
}
