//! Time Sources
//!
//! The engine never calls `Instant::now()` directly; all window arithmetic
//! and retention checks go through an injected [`Clock`]. This keeps expiry
//! behavior deterministic in tests, where [`ManualClock`] can be advanced
//! by arbitrary durations.

use chrono::{DateTime, Utc};
use std::fmt::Debug;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Monotonic + wall-clock time provider.
///
/// `now()` drives all window math and expiry comparisons; `now_utc()` is
/// only used for operator-facing timestamps (abuse patterns, block reports).
pub trait Clock: Send + Sync + Debug {
    /// Current monotonic instant.
    fn now(&self) -> Instant;

    /// Current wall-clock time.
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Production clock backed by the system time sources.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Test clock that only moves when told to.
///
/// Both time sources advance together, so sliding-window counts and the
/// 24-hour abuse-log horizon stay consistent with each other.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    origin_utc: DateTime<Utc>,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current time.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            origin_utc: Utc::now(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Advance the clock by `delta`.
    pub fn advance(&self, delta: Duration) {
        let mut offset = self.offset.lock().unwrap();
        *offset += delta;
    }

    /// Total time advanced since creation.
    pub fn elapsed(&self) -> Duration {
        *self.offset.lock().unwrap()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + *self.offset.lock().unwrap()
    }

    fn now_utc(&self) -> DateTime<Utc> {
        self.origin_utc
            + chrono::Duration::from_std(*self.offset.lock().unwrap())
                .unwrap_or_else(|_| chrono::Duration::zero())
    }
}
