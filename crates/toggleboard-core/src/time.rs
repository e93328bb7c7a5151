//! Injectable time sources.
//!
//! Rules that depend on time (freeze eligibility, snapshot timestamps, audit
//! day keys) read the clock through [`TimeProvider`] so tests can drive it.
//!
//! # Tiger Style
//!
//! - No `.expect()` or `.unwrap()`: a clock before the epoch reads as 0
//! - Simulated time only moves when told to

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::time::SystemTime;
use std::time::UNIX_EPOCH;

/// Current Unix time in milliseconds, 0 if the clock is before the epoch.
#[inline]
pub fn current_time_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_millis() as u64).unwrap_or(0)
}

/// Source of wall-clock time.
pub trait TimeProvider: Send + Sync {
    /// Current Unix timestamp in milliseconds.
    fn now_unix_ms(&self) -> u64;
}

impl<T: TimeProvider + ?Sized> TimeProvider for Arc<T> {
    fn now_unix_ms(&self) -> u64 {
        (**self).now_unix_ms()
    }
}

/// Production time provider backed by the system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeProvider;

impl TimeProvider for SystemTimeProvider {
    #[inline]
    fn now_unix_ms(&self) -> u64 {
        current_time_ms()
    }
}

/// Manually driven clock for deterministic tests.
///
/// Clones share the same underlying time.
///
/// ```
/// use toggleboard_core::{SimulatedTimeProvider, TimeProvider};
///
/// let clock = SimulatedTimeProvider::new(1_000);
/// clock.advance_ms(500);
/// assert_eq!(clock.now_unix_ms(), 1_500);
/// ```
#[derive(Debug, Clone)]
pub struct SimulatedTimeProvider {
    current_time_ms: Arc<AtomicU64>,
}

impl SimulatedTimeProvider {
    /// Start the clock at `initial_time_ms`.
    pub fn new(initial_time_ms: u64) -> Self {
        Self {
            current_time_ms: Arc::new(AtomicU64::new(initial_time_ms)),
        }
    }

    /// Move the clock forward.
    pub fn advance_ms(&self, delta_ms: u64) {
        let _ = self
            .current_time_ms
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |t| Some(t.saturating_add(delta_ms)));
    }

    /// Jump to an absolute time.
    pub fn set_ms(&self, time_ms: u64) {
        self.current_time_ms.store(time_ms, Ordering::SeqCst);
    }
}

impl Default for SimulatedTimeProvider {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TimeProvider for SimulatedTimeProvider {
    fn now_unix_ms(&self) -> u64 {
        self.current_time_ms.load(Ordering::SeqCst)
    }
}
