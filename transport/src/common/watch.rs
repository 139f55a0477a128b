//! Monotonic stopwatch and wall-clock epoch conversions.
//!
//! Grounded on the original's `watch_t`: a `steady_clock`-backed stopwatch
//! plus static helpers that convert to/from the system/UTC/TAI/GPS epochs.

use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;

/// 12 years (1958->1970) + 3 leap years + 10s initial offset.
const TAI_UTC_OFFSET_SEC: i64 = 378_691_210;
/// 10 years (1970->1980) + 5 day offset to Jan 6 + 2 leap years + 9 leap seconds, negated.
const GPS_UTC_OFFSET_SEC: i64 = -315_964_809;

/// Resolution tag for [`Watch`] durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    Nanos,
    Micros,
    Millis,
    Seconds,
}

impl Resolution {
    fn from_nanos(self, nanos: i64) -> i64 {
        match self {
            Resolution::Nanos => nanos,
            Resolution::Micros => nanos / 1_000,
            Resolution::Millis => nanos / 1_000_000,
            Resolution::Seconds => nanos / 1_000_000_000,
        }
    }

    fn to_nanos(self, value: i64) -> i64 {
        match self {
            Resolution::Nanos => value,
            Resolution::Micros => value * 1_000,
            Resolution::Millis => value * 1_000_000,
            Resolution::Seconds => value * 1_000_000_000,
        }
    }
}

/// Which wall-clock epoch [`Watch::elapsed_since_epoch`] measures from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EpochClock {
    System,
    Utc,
    Tai,
    Gps,
}

/// A stopwatch backed by the steady (monotonic) clock.
///
/// `reset` rebases the reference point; `elapsed` reports time since the
/// last reset (or construction) in the requested resolution.
#[derive(Debug, Clone)]
pub struct Watch {
    start: Instant,
}

impl Default for Watch {
    fn default() -> Self {
        Self::new()
    }
}

impl Watch {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn reset(&mut self) {
        self.start = Instant::now();
    }

    #[must_use]
    pub fn elapsed(&self, res: Resolution) -> i64 {
        let elapsed = self.start.elapsed();
        res.from_nanos(
            i64::try_from(elapsed.as_nanos()).unwrap_or(i64::MAX),
        )
    }

    #[must_use]
    pub fn is_elapsed(&self, target: i64, res: Resolution) -> bool {
        self.elapsed(res) >= target
    }

    /// Elapsed time since a fixed epoch, in the requested resolution.
    ///
    /// `System` and `Utc` are the same instant here (no leap-second table is
    /// carried); `Tai` and `Gps` apply the fixed historical offsets.
    #[must_use]
    pub fn elapsed_since_epoch(res: Resolution, clock: EpochClock) -> i64 {
        let now = Utc::now();
        let unix_nanos = now.timestamp_nanos_opt().unwrap_or(0);
        let offset_sec = match clock {
            EpochClock::System | EpochClock::Utc => 0,
            EpochClock::Tai => TAI_UTC_OFFSET_SEC,
            EpochClock::Gps => GPS_UTC_OFFSET_SEC,
        };
        res.from_nanos(unix_nanos + offset_sec * 1_000_000_000)
    }

    /// Sleeps for `target` in the requested resolution, resuming after
    /// spurious wakeups until the full interval has elapsed.
    pub fn sleep(target: i64, res: Resolution) {
        if target <= 0 {
            return;
        }
        let nanos = res.to_nanos(target).max(0) as u64;
        let wanted = Duration::from_nanos(nanos);
        let started = Instant::now();
        loop {
            let remaining = wanted.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }
            thread::sleep(remaining);
        }
    }

    /// Sleeps until wall-clock `target` (in `res` since `clock`'s epoch).
    /// Returns `true` if a sleep was actually performed.
    pub fn sleep_until(target: i64, res: Resolution, clock: EpochClock) -> bool {
        let elapsed = Self::elapsed_since_epoch(res, clock);
        if target <= elapsed {
            return false;
        }
        Self::sleep(target - elapsed, res);
        true
    }

    /// Busy-polls the monotonic clock, burning a few iterations per poll to
    /// limit the clock-read rate. Only appropriate where a sleep would
    /// overshoot (sub-millisecond deadlines); production code should prefer
    /// [`Self::sleep`] wherever the deadline tolerates it.
    pub fn busywait(target: i64, res: Resolution) {
        if target <= 0 {
            return;
        }
        let nanos = res.to_nanos(target).max(0) as u64;
        let wanted = Duration::from_nanos(nanos);
        let started = Instant::now();
        while started.elapsed() < wanted {
            burn_cycles_locally();
        }
    }

    /// Busywaits until wall-clock `target`. Returns `true` if it busywaited.
    pub fn busywait_until(target: i64, res: Resolution, clock: EpochClock) -> bool {
        let elapsed = Self::elapsed_since_epoch(res, clock);
        if target <= elapsed {
            return false;
        }
        Self::busywait(target - elapsed, res);
        true
    }
}

/// Burns a handful of cycles so a tight busywait loop doesn't hammer the
/// clock source harder than necessary.
#[inline]
fn burn_cycles_locally() {
    let mut acc: u64 = 0;
    for i in 0..999_u64 {
        acc = acc.wrapping_add(i);
    }
    std::hint::black_box(acc);
}
