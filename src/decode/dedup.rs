use std::time::Duration;
use tokio::time::Instant;

/// Last-surfaced-code memory shared by both decode strategies.
///
/// `accept` is the single check-and-update step: callers hold the lock for
/// the whole decision so two strategies cannot both surface the same fresh code.
#[derive(Debug, Clone)]
pub struct Deduplicator {
    cooldown: Duration,
    last: Option<(String, Instant)>,
}

impl Deduplicator {
    pub fn new(cooldown: Duration) -> Self {
        Self {
            cooldown,
            last: None,
        }
    }

    /// Accept `code` if it differs from the last surfaced value or the cooldown
    /// has elapsed since that value was surfaced.
    pub fn accept(&mut self, code: &str, now: Instant) -> bool {
        let fresh = match &self.last {
            Some((last, at)) => last != code || now.saturating_duration_since(*at) > self.cooldown,
            None => true,
        };
        if fresh {
            self.last = Some((code.to_string(), now));
        }
        fresh
    }

    /// Legacy-mode rule: only consecutive identical values are suppressed.
    pub fn accept_distinct(&mut self, code: &str, now: Instant) -> bool {
        let fresh = self.last.as_ref().map_or(true, |(last, _)| last != code);
        if fresh {
            self.last = Some((code.to_string(), now));
        }
        fresh
    }

    pub fn last_code(&self) -> Option<&str> {
        self.last.as_ref().map(|(code, _)| code.as_str())
    }

    pub fn reset(&mut self) {
        self.last = None;
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }
}
