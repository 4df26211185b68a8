// Single-slot debounce cell for edit auto-save.
//
// Each new edit overwrites the pending value and restarts the quiet period
// (default 2s, range 250ms–10s). Only the latest value is ever drained.

use std::time::Duration;

use tokio::time::Instant;

/// Default quiet period.
const DEFAULT_QUIET_MS: u64 = 2_000;
/// Minimum allowed quiet period.
const MIN_QUIET_MS: u64 = 250;
/// Maximum allowed quiet period.
const MAX_QUIET_MS: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietPeriod {
    pub window: Duration,
}

impl Default for QuietPeriod {
    fn default() -> Self {
        Self { window: Duration::from_millis(DEFAULT_QUIET_MS) }
    }
}

impl QuietPeriod {
    /// Create a quiet period in milliseconds, clamped to [250, 10000].
    pub fn with_millis(ms: u64) -> Self {
        Self { window: Duration::from_millis(ms.clamp(MIN_QUIET_MS, MAX_QUIET_MS)) }
    }

    pub fn from_duration(window: Duration) -> Self {
        Self::with_millis(u64::try_from(window.as_millis()).unwrap_or(u64::MAX))
    }
}

struct Pending<T> {
    value: T,
    last_seen: Instant,
}

/// Holds at most one pending value.
///
/// Call `push()` for every edit, then `take_ready()` once `next_deadline()`
/// has passed.
pub struct PendingSlot<T> {
    quiet: QuietPeriod,
    pending: Option<Pending<T>>,
}

impl<T> PendingSlot<T> {
    pub fn new(quiet: QuietPeriod) -> Self {
        Self { quiet, pending: None }
    }

    /// Replace the pending value and restart the quiet period. Returns the
    /// value that was superseded, if any.
    pub fn push(&mut self, value: T) -> Option<T> {
        self.push_at(value, Instant::now())
    }

    pub(crate) fn push_at(&mut self, value: T, now: Instant) -> Option<T> {
        self.pending.replace(Pending { value, last_seen: now }).map(|p| p.value)
    }

    /// Take the pending value if its quiet period has elapsed.
    pub fn take_ready(&mut self) -> Option<T> {
        self.take_ready_at(Instant::now())
    }

    pub(crate) fn take_ready_at(&mut self, now: Instant) -> Option<T> {
        let elapsed = now.duration_since(self.pending.as_ref()?.last_seen) >= self.quiet.window;
        if elapsed {
            self.take()
        } else {
            None
        }
    }

    /// Take the pending value regardless of the quiet period.
    pub fn take(&mut self) -> Option<T> {
        self.pending.take().map(|p| p.value)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// When the pending value becomes ready, or None if empty.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.as_ref().map(|p| p.last_seen + self.quiet.window)
    }
}
