//! Wall-clock and monotonic time sources.
//!
//! Events are stamped with wall-clock UTC while the observers measure elapsed
//! time monotonically. Both come from one [`Clock`] so the driver can replay
//! recorded interactions and tests can move time by hand.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use time::OffsetDateTime;

pub trait Clock: Send + Sync {
    /// Capture-time reading used for `client_timestamp`.
    fn now_utc(&self) -> OffsetDateTime;
    /// Time elapsed since the clock was created; never goes backwards.
    fn monotonic(&self) -> Duration;
}

pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_utc(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn monotonic(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Clock advanced explicitly by the caller.
pub struct ManualClock {
    start: OffsetDateTime,
    elapsed_ms: AtomicU64,
}

impl ManualClock {
    pub fn new(start: OffsetDateTime) -> Self {
        Self {
            start,
            elapsed_ms: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.elapsed_ms
            .fetch_add(by.as_millis() as u64, Ordering::SeqCst);
    }

    /// Move to an absolute offset from the start. Earlier offsets are ignored.
    pub fn set_elapsed(&self, to: Duration) {
        self.elapsed_ms
            .fetch_max(to.as_millis() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_utc(&self) -> OffsetDateTime {
        self.start + self.monotonic()
    }

    fn monotonic(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    #[test]
    fn manual_clock_only_moves_forward() {
        let clock = ManualClock::new(datetime!(2026-03-01 09:00 UTC));
        clock.advance(Duration::from_secs(30));
        clock.set_elapsed(Duration::from_secs(10));
        assert_eq!(clock.monotonic(), Duration::from_secs(30));
        assert_eq!(clock.now_utc(), datetime!(2026-03-01 09:00:30 UTC));
    }
}
