//! Logical time for signal updates
//!
//! Provides the discrete time model shared by every signal:
//! - `Time` - Logical instant of an update
//! - `Delay` - Non-negative logical shift
//! - `Watermark` - Stability horizon certifying that history is final
//! - `Clock` - Source of monotonic readings for mapping real time onto `Time`

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A logical instant
pub type Time = u64;

/// A logical shift applied to update times
pub type Delay = u64;

/// Stability horizon of a signal
///
/// A watermark certifies that no further update will arrive at or before it.
/// Watermarks are totally ordered: `Origin < At(t) < Final`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum Watermark {
    /// Nothing is stable yet
    #[default]
    Origin,
    /// Everything at or before this instant is final
    At(Time),
    /// The signal is complete; no update will ever arrive
    Final,
}

impl Watermark {
    /// Check whether the instant `t` is at or before this watermark
    pub fn covers(&self, t: Time) -> bool {
        match self {
            Watermark::Origin => false,
            Watermark::At(w) => t <= *w,
            Watermark::Final => true,
        }
    }

    /// Shift the watermark forward by `delay`
    ///
    /// `Origin` and `Final` are fixed points.
    pub fn shift(self, delay: Delay) -> Self {
        match self {
            Watermark::At(w) => Watermark::At(w.saturating_add(delay)),
            other => other,
        }
    }

    /// The instant this watermark names, if any
    pub fn time(&self) -> Option<Time> {
        match self {
            Watermark::At(w) => Some(*w),
            _ => None,
        }
    }

    /// Check if the signal is complete
    pub fn is_final(&self) -> bool {
        matches!(self, Watermark::Final)
    }

    /// The smaller of two watermarks
    pub fn meet(self, other: Watermark) -> Watermark {
        self.min(other)
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Watermark::Origin => write!(f, "origin"),
            Watermark::At(t) => write!(f, "{}", t),
            Watermark::Final => write!(f, "final"),
        }
    }
}

/// Source of monotonic logical readings
///
/// Used to map external real time onto signal time, e.g. for heartbeats.
pub trait Clock: Send + Sync {
    /// Current logical time; never decreases between calls
    fn now(&self) -> Time;
}

/// Wall-clock backed by [`Instant`], counting ticks of a fixed resolution
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    origin: Instant,
    resolution: Duration,
}

impl MonotonicClock {
    /// Create a clock whose tick is one millisecond
    pub fn new() -> Self {
        Self::with_resolution(Duration::from_millis(1))
    }

    /// Create a clock with a custom tick length
    ///
    /// # Panics
    ///
    /// Panics if `resolution` is zero
    pub fn with_resolution(resolution: Duration) -> Self {
        assert!(!resolution.is_zero(), "resolution must be positive");
        Self {
            origin: Instant::now(),
            resolution,
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Time {
        (self.origin.elapsed().as_nanos() / self.resolution.as_nanos()) as Time
    }
}

/// Manually advanced clock for tests and simulations
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start`
    pub fn starting_at(start: Time) -> Self {
        Self {
            now: AtomicU64::new(start),
        }
    }

    /// Move the clock forward by `delay`
    pub fn advance(&self, delay: Delay) {
        self.now.fetch_add(delay, Ordering::SeqCst);
    }

    /// Move the clock to `t`; earlier values are ignored
    pub fn set(&self, t: Time) {
        self.now.fetch_max(t, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Time {
        self.now.load(Ordering::SeqCst)
    }
}
