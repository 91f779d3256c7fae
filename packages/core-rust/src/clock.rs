//! Wall-clock abstraction and the snapshot save clock.
//!
//! Persisted snapshots carry a `savedAt` in milliseconds since the Unix
//! epoch. Conflict detection compares these across execution contexts, so the
//! timestamps a context issues must never go backwards and must move past any
//! remote timestamp it has adopted, even when its own wall clock lags.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Abstraction over the system clock for dependency injection.
///
/// Allows deterministic testing by replacing the real clock with a
/// [`ManualClock`]. The default implementation ([`SystemClock`]) delegates
/// to `std::time::SystemTime`.
pub trait ClockSource: Send + Sync {
    /// Returns the current time as milliseconds since Unix epoch.
    fn now(&self) -> u64;
}

/// Default clock source that reads the real system time.
#[derive(Debug, Clone, Default)]
pub struct SystemClock;

impl ClockSource for SystemClock {
    #[allow(clippy::cast_possible_truncation)]
    fn now(&self) -> u64 {
        // A clock set before 1970 reads as 0; the save clock still moves forward.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}

/// Clock whose time only changes when told to. Shared by cloning.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    time: Arc<AtomicU64>,
}

impl ManualClock {
    #[must_use]
    pub fn new(initial: u64) -> Self {
        Self {
            time: Arc::new(AtomicU64::new(initial)),
        }
    }

    pub fn set(&self, millis: u64) {
        self.time.store(millis, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.time.fetch_add(millis, Ordering::SeqCst);
    }
}

impl ClockSource for ManualClock {
    fn now(&self) -> u64 {
        self.time.load(Ordering::SeqCst)
    }
}

/// Issues `savedAt` timestamps for one execution context.
///
/// Every [`tick`](SaveClock::tick) is strictly greater than the previous tick
/// and than every timestamp passed to [`observe`](SaveClock::observe).
pub struct SaveClock {
    source: Arc<dyn ClockSource>,
    last: u64,
}

impl SaveClock {
    #[must_use]
    pub fn new(source: Arc<dyn ClockSource>) -> Self {
        Self { source, last: 0 }
    }

    /// Folds in a timestamp seen elsewhere (restored or adopted snapshot).
    pub fn observe(&mut self, saved_at: u64) {
        self.last = self.last.max(saved_at);
    }

    /// Next timestamp: wall-clock time, bumped past everything seen so far.
    pub fn tick(&mut self) -> u64 {
        let next = self.source.now().max(self.last.saturating_add(1));
        self.last = next;
        next
    }

    /// Largest timestamp issued or observed.
    #[must_use]
    pub fn last(&self) -> u64 {
        self.last
    }
}

impl std::fmt::Debug for SaveClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SaveClock").field("last", &self.last).finish_non_exhaustive()
    }
}
