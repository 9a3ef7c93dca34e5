//! Wall-clock abstraction used for operation timestamps and expiry checks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a manual one.
/// The default implementation ([`SystemClock`]) delegates to `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    // A clock before the epoch reads as 0; u64 millis outlasts the process.
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_millis() as u64)
    }
}

/// A clock whose time only moves when told to.
///
/// Clones share the same underlying time, so a test can keep one handle and
/// hand another to the component under test.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<AtomicU64>,
}

impl ManualClock {
    /// Creates a clock reading `initial_ms`.
    #[must_use]
    pub fn new(initial_ms: u64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new(initial_ms)),
        }
    }

    /// Sets the current time.
    pub fn set(&self, ms: u64) {
        self.time.store(ms, Ordering::SeqCst);
    }

    /// Moves the clock forward by `ms`.
    pub fn advance(&self, ms: u64) {
        self.time.fetch_add(ms, Ordering::SeqCst);
    }

    /// Moves the clock forward by whole seconds.
    pub fn advance_secs(&self, secs: u64) {
        self.advance(secs.saturating_mul(1000));
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}
