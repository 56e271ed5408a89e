//! Time source abstraction so expiry logic can be driven by tests.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};

/// Abstracts "now" for nonce expiry and message validity windows.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests.
///
/// Clones share the same instant, so a clone handed to the service can be
/// advanced from the test body.
#[derive(Debug, Clone)]
pub struct FakeClock {
    t: Arc<Mutex<DateTime<Utc>>>,
}

impl FakeClock {
    pub fn new() -> Self {
        Self::new_set(Utc::now())
    }

    pub fn new_set(t: DateTime<Utc>) -> Self {
        Self {
            t: Arc::new(Mutex::new(t)),
        }
    }

    pub fn set(&self, t: DateTime<Utc>) {
        let mut guard = self.t.lock().unwrap_or_else(|e| e.into_inner());
        *guard = t;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.t.lock().unwrap_or_else(|e| e.into_inner());
        *guard += by;
    }
}

impl Default for FakeClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for FakeClock {
    fn now(&self) -> DateTime<Utc> {
        *self.t.lock().unwrap_or_else(|e| e.into_inner())
    }
}
