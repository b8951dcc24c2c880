use std::time::{SystemTime, UNIX_EPOCH};

/// Source of "now" in unix milliseconds. Injected everywhere a staleness
/// threshold or lease expiry is evaluated so tests can move time by hand.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

#[cfg(test)]
pub use manual::ManualClock;
