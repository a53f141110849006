use std::collections::HashMap;
use std::time::{Duration, Instant};

pub mod logging;

fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

/// Lets a log line through at most once per window for each key.
///
/// The packager drops and re-accepts the proxy socket on every app reload,
/// so open/close notices would otherwise flood the output.
#[derive(Debug)]
pub struct LogLimiter {
    window: Duration,
    last: HashMap<&'static str, Instant>,
}

impl LogLimiter {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last: HashMap::new(),
        }
    }

    pub fn allow(&mut self, key: &'static str) -> bool {
        self.allow_at(key, Instant::now())
    }

    fn allow_at(&mut self, key: &'static str, now: Instant) -> bool {
        match self.last.get(key) {
            Some(previous) if now.saturating_duration_since(*previous) < self.window => false,
            _ => {
                self.last.insert(key, now);
                true
            }
        }
    }
}
