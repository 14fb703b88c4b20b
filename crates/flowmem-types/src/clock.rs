//! Monotonic nanosecond clock and time ranges (spec §4.1).

use std::fmt;
use std::time::{Duration, Instant};

/// A monotonic timestamp in nanoseconds, relative to an arbitrary epoch fixed
/// at process start. Only comparable to other `Timestamp`s taken in the same
/// process; never serialized across processes as wall-clock time.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct Timestamp(u64);

impl Timestamp {
    pub const ZERO: Self = Self(0);

    #[inline]
    #[must_use]
    pub const fn from_nanos(nanos: u64) -> Self {
        Self(nanos)
    }

    #[inline]
    #[must_use]
    pub const fn as_nanos(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_micros(self) -> u64 {
        self.0 / 1_000
    }

    #[inline]
    #[must_use]
    pub const fn as_millis(self) -> u64 {
        self.0 / 1_000_000
    }

    #[inline]
    #[must_use]
    pub const fn as_secs(self) -> u64 {
        self.0 / 1_000_000_000
    }

    #[must_use]
    pub fn now() -> Self {
        CLOCK.now()
    }

    #[must_use]
    pub fn checked_sub(self, rhs: Self) -> Option<Duration> {
        self.0.checked_sub(rhs.0).map(Duration::from_nanos)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}ns", self.0)
    }
}

/// A half-open `[start, end)` interval of timestamps, attached to a buffer to
/// describe the payload's validity window (e.g. a batch of samples).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[repr(C)]
pub struct TimeRange {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl TimeRange {
    #[must_use]
    pub const fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub fn duration(self) -> Option<Duration> {
        self.end.checked_sub(self.start)
    }
}

/// Process-wide monotonic clock, anchored at first use.
///
/// `Instant` has no stable representation we can store in shared memory, so
/// every process anchors its own `Instant::now()` at first touch and derives
/// nanosecond offsets from it. This means `Timestamp` values are only
/// meaningful for ordering and duration math *within* the process that
/// produced them unless all participating processes start close enough
/// together that the drift is immaterial (true for a single host, which is
/// this spec's stated assumption).
struct MonotonicClock {
    epoch: std::sync::OnceLock<Instant>,
}

impl MonotonicClock {
    const fn new() -> Self {
        Self { epoch: std::sync::OnceLock::new() }
    }

    fn now(&self) -> Timestamp {
        let epoch = self.epoch.get_or_init(Instant::now);
        Timestamp(epoch.elapsed().as_nanos() as u64)
    }
}

static CLOCK: MonotonicClock = MonotonicClock::new();

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_is_monotonic() {
        let a = Timestamp::now();
        let b = Timestamp::now();
        assert!(b >= a);
    }

    #[test]
    fn time_range_duration() {
        let r = TimeRange::new(Timestamp::from_nanos(100), Timestamp::from_nanos(350));
        assert_eq!(r.duration(), Some(Duration::from_nanos(250)));
    }
}
