//! Time sources.
//!
//! The orchestrator, the stores and the cleanup scheduler read wall-clock time
//! through [`Clock`] so tests can pin "now" to a known instant.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex, PoisonError};

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// System clock implementation using `Utc::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Controllable clock for tests.
///
/// All clones share the same underlying time value, so advancing one clone
/// advances every store and service holding another.
#[derive(Debug, Clone)]
pub struct MockClock {
    current_time: Arc<Mutex<DateTime<Utc>>>,
}

impl MockClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    pub fn advance(&self, duration: Duration) {
        let mut time = self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *time += duration;
    }

    pub fn set(&self, instant: DateTime<Utc>) {
        let mut time = self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *time = instant;
    }
}

impl Clock for MockClock {
    fn now(&self) -> DateTime<Utc> {
        *self
            .current_time
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
