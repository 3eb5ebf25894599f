//! Time views for the scheduler.
//!
//! Three clocks are exposed through [`TimeSource::now`]:
//!
//! - **Realtime**: a raw wall-clock sample. The most recent sample is cached
//!   and can be read back with [`TimeSource::recent_realtime`].
//! - **Monotonic**: relative time since the source was created. It never goes
//!   backwards, even when the wall clock is stepped.
//! - **StabilizedRealtime**: the wall-clock value captured at creation plus
//!   the monotonic elapsed time. Looks like an absolute timestamp but never
//!   regresses; after a backward step it drifts from true wall time.
//!
//! All arithmetic is done on [`TimeVal`], a (seconds, microseconds) pair that
//! is kept normalized and never negative.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Microseconds in one second.
pub const MICROS_PER_SEC: i64 = 1_000_000;

// ============================================================================
// TimeVal
// ============================================================================

/// A (seconds, microseconds) timestamp or interval.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct TimeVal {
    /// Whole seconds.
    pub sec: i64,
    /// Microseconds, in `[0, 1_000_000)` once normalized.
    pub usec: i64,
}

impl TimeVal {
    /// The zero timestamp.
    pub const ZERO: TimeVal = TimeVal { sec: 0, usec: 0 };

    /// Build a value without normalizing it.
    pub const fn new(sec: i64, usec: i64) -> Self {
        Self { sec, usec }
    }

    /// Whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        Self { sec: secs, usec: 0 }
    }

    /// Split a millisecond count into seconds and microseconds.
    pub const fn from_millis(millis: i64) -> Self {
        Self {
            sec: millis / 1000,
            usec: 1000 * (millis % 1000),
        }
    }

    /// Convert a `Duration`, saturating at `i64::MAX` seconds.
    pub fn from_duration(d: Duration) -> Self {
        Self {
            sec: i64::try_from(d.as_secs()).unwrap_or(i64::MAX),
            usec: i64::from(d.subsec_micros()),
        }
    }

    /// Carry microsecond overflow and underflow into the seconds field.
    ///
    /// A negative result is clamped to zero.
    pub fn normalize(self) -> Self {
        let mut sec = self.sec + self.usec.div_euclid(MICROS_PER_SEC);
        let mut usec = self.usec.rem_euclid(MICROS_PER_SEC);
        if sec < 0 {
            sec = 0;
            usec = 0;
        }
        Self { sec, usec }
    }

    /// Field-wise sum, normalized.
    pub fn plus(self, other: TimeVal) -> Self {
        Self {
            sec: self.sec.saturating_add(other.sec),
            usec: self.usec + other.usec,
        }
        .normalize()
    }

    /// `self - other`, normalized (so never negative).
    pub fn minus(self, other: TimeVal) -> Self {
        Self {
            sec: self.sec - other.sec,
            usec: self.usec - other.usec,
        }
        .normalize()
    }

    /// Signed microseconds from `earlier` to `self`.
    pub fn elapsed_micros(self, earlier: TimeVal) -> i64 {
        (self.sec - earlier.sec) * MICROS_PER_SEC + (self.usec - earlier.usec)
    }

    /// Total microseconds of a normalized value.
    pub fn as_micros(self) -> i64 {
        self.sec.saturating_mul(MICROS_PER_SEC).saturating_add(self.usec)
    }

    /// Convert to a `Duration`; negative values become zero.
    pub fn to_duration(self) -> Duration {
        let tv = self.normalize();
        Duration::new(tv.sec as u64, (tv.usec * 1000) as u32)
    }
}

impl Ord for TimeVal {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sec
            .cmp(&other.sec)
            .then_with(|| self.usec.cmp(&other.usec))
    }
}

impl PartialOrd for TimeVal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

// ============================================================================
// Wall clock
// ============================================================================

/// Source of raw wall-clock samples.
pub trait WallClock {
    /// Current wall-clock time.
    fn now(&self) -> TimeVal;
}

/// Wall clock backed by `SystemTime`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemWallClock;

impl WallClock for SystemWallClock {
    fn now(&self) -> TimeVal {
        match SystemTime::now().duration_since(UNIX_EPOCH) {
            Ok(d) => TimeVal::from_duration(d),
            // Clock set before 1970.
            Err(_) => TimeVal::ZERO,
        }
    }
}

// ============================================================================
// TimeSource
// ============================================================================

/// Which time view to sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClockKind {
    /// Raw wall clock.
    Realtime,
    /// Non-decreasing time since the source was created.
    Monotonic,
    /// Creation-time wall clock plus monotonic elapsed time.
    StabilizedRealtime,
}

/// How monotonic time is produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonotonicMode {
    /// Use the platform monotonic clock (`Instant`).
    #[default]
    Native,
    /// Accumulate deltas between wall-clock samples. A backward step counts
    /// as exactly one second.
    Derived,
}

/// Wall-clock, monotonic and stabilized time sampling.
pub struct TimeSource {
    wall: Box<dyn WallClock>,
    mode: MonotonicMode,
    origin: Instant,
    /// Last wall-clock sample.
    recent: TimeVal,
    /// Wall-clock sample the derived clock last diffed against.
    last_recent: TimeVal,
    /// Last monotonic value.
    relative: TimeVal,
    /// Wall clock at creation.
    base: TimeVal,
}

impl TimeSource {
    /// Time source over the system wall clock.
    pub fn new(mode: MonotonicMode) -> Self {
        Self::with_wall_clock(mode, Box::new(SystemWallClock))
    }

    /// Time source over an arbitrary wall clock.
    pub fn with_wall_clock(mode: MonotonicMode, wall: Box<dyn WallClock>) -> Self {
        let first = wall.now();
        Self {
            wall,
            mode,
            origin: Instant::now(),
            recent: first,
            last_recent: first,
            relative: TimeVal::ZERO,
            base: first,
        }
    }

    /// Monotonic mode in use.
    pub fn mode(&self) -> MonotonicMode {
        self.mode
    }

    /// Sample the requested clock.
    pub fn now(&mut self, kind: ClockKind) -> TimeVal {
        match kind {
            ClockKind::Realtime => self.realtime(),
            ClockKind::Monotonic => self.monotonic(),
            ClockKind::StabilizedRealtime => self.stabilized(),
        }
    }

    /// Sample the wall clock and cache the result.
    pub fn realtime(&mut self) -> TimeVal {
        self.recent = self.wall.now();
        self.recent
    }

    /// Sample monotonic time.
    pub fn monotonic(&mut self) -> TimeVal {
        match self.mode {
            MonotonicMode::Native => {
                self.relative = TimeVal::from_duration(self.origin.elapsed());
            }
            MonotonicMode::Derived => {
                self.realtime();
                self.advance_derived();
            }
        }
        self.relative
    }

    /// Stabilized absolute time: creation wall clock plus the last monotonic
    /// value. Does not resample the monotonic clock.
    pub fn stabilized(&self) -> TimeVal {
        self.base.plus(self.relative)
    }

    /// Seconds field of [`stabilized`](Self::stabilized).
    pub fn stabilized_secs(&self) -> i64 {
        self.stabilized().sec
    }

    /// Most recent wall-clock sample, without resampling.
    pub fn recent_realtime(&self) -> TimeVal {
        self.recent
    }

    /// Most recent monotonic value, without resampling.
    pub fn recent_monotonic(&self) -> TimeVal {
        self.relative
    }

    fn advance_derived(&mut self) {
        if self.recent < self.last_recent {
            self.relative.sec += 1;
            self.relative.usec = 0;
        } else {
            let diff = self.recent.minus(self.last_recent);
            self.relative = self.relative.plus(diff);
        }
        self.last_recent = self.recent;
    }
}

impl Default for TimeSource {
    fn default() -> Self {
        Self::new(MonotonicMode::Native)
    }
}

impl std::fmt::Debug for TimeSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeSource")
            .field("mode", &self.mode)
            .field("recent", &self.recent)
            .field("relative", &self.relative)
            .field("base", &self.base)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    /// Wall clock the test moves by hand.
    #[derive(Clone, Default)]
    pub(crate) struct ManualClock(pub(crate) Rc<Cell<TimeVal>>);

    impl ManualClock {
        pub(crate) fn set(&self, tv: TimeVal) {
            self.0.set(tv);
        }
    }

    impl WallClock for ManualClock {
        fn now(&self) -> TimeVal {
            self.0.get()
        }
    }

    #[test]
    fn test_normalize_borrows_from_seconds() {
        assert_eq!(TimeVal::new(5, -500_000).normalize(), TimeVal::new(4, 500_000));
    }

    #[test]
    fn test_normalize_clamps_negative() {
        assert_eq!(TimeVal::new(-1, -1).normalize(), TimeVal::ZERO);
        assert_eq!(TimeVal::new(0, -1).normalize(), TimeVal::ZERO);
    }

    #[test]
    fn test_normalize_carries_overflow() {
        assert_eq!(TimeVal::new(1, 2_500_000).normalize(), TimeVal::new(3, 500_000));
    }

    #[test]
    fn test_elapsed_micros() {
        let a = TimeVal::new(10, 100);
        let b = TimeVal::new(8, 900_100);
        assert_eq!(a.elapsed_micros(b), 1_100_000);
        assert_eq!(b.elapsed_micros(a), -1_100_000);
    }

    #[test]
    fn test_minus_never_negative() {
        assert_eq!(TimeVal::new(1, 0).minus(TimeVal::new(2, 0)), TimeVal::ZERO);
        assert_eq!(TimeVal::new(3, 0).minus(TimeVal::new(1, 250_000)), TimeVal::new(1, 750_000));
    }

    #[test]
    fn test_from_millis_split() {
        assert_eq!(TimeVal::from_millis(2_345), TimeVal::new(2, 345_000));
        assert_eq!(TimeVal::from_millis(0), TimeVal::ZERO);
    }

    #[test]
    fn test_ordering() {
        assert!(TimeVal::new(1, 999_999) < TimeVal::new(2, 0));
        assert!(TimeVal::new(2, 1) > TimeVal::new(2, 0));
    }

    #[test]
    fn test_derived_monotonic_tracks_wall_delta() {
        let clock = ManualClock::default();
        clock.set(TimeVal::new(1_000, 0));
        let mut ts = TimeSource::with_wall_clock(MonotonicMode::Derived, Box::new(clock.clone()));

        clock.set(TimeVal::new(1_002, 250_000));
        assert_eq!(ts.monotonic(), TimeVal::new(2, 250_000));
    }

    #[test]
    fn test_derived_monotonic_backward_step_adds_one_second() {
        let clock = ManualClock::default();
        clock.set(TimeVal::new(1_000, 0));
        let mut ts = TimeSource::with_wall_clock(MonotonicMode::Derived, Box::new(clock.clone()));

        clock.set(TimeVal::new(1_003, 400_000));
        assert_eq!(ts.monotonic(), TimeVal::new(3, 400_000));

        // Wall clock stepped back by a minute and a half.
        clock.set(TimeVal::new(910, 0));
        assert_eq!(ts.monotonic(), TimeVal::new(4, 0));

        // Deltas resume from the new wall-clock position.
        clock.set(TimeVal::new(910, 500_000));
        assert_eq!(ts.monotonic(), TimeVal::new(4, 500_000));
    }

    #[test]
    fn test_stabilized_never_regresses() {
        let clock = ManualClock::default();
        clock.set(TimeVal::new(5_000, 0));
        let mut ts = TimeSource::with_wall_clock(MonotonicMode::Derived, Box::new(clock.clone()));

        clock.set(TimeVal::new(5_010, 0));
        ts.monotonic();
        let before = ts.now(ClockKind::StabilizedRealtime);
        assert_eq!(before, TimeVal::new(5_010, 0));

        clock.set(TimeVal::new(4_000, 0));
        ts.monotonic();
        let after = ts.now(ClockKind::StabilizedRealtime);
        assert!(after >= before);
        assert_eq!(after, TimeVal::new(5_011, 0));
        assert_eq!(ts.stabilized_secs(), 5_011);
    }

    #[test]
    fn test_realtime_is_cached() {
        let clock = ManualClock::default();
        clock.set(TimeVal::new(42, 7));
        let mut ts = TimeSource::with_wall_clock(MonotonicMode::Native, Box::new(clock.clone()));

        clock.set(TimeVal::new(43, 0));
        assert_eq!(ts.recent_realtime(), TimeVal::new(42, 7));
        assert_eq!(ts.now(ClockKind::Realtime), TimeVal::new(43, 0));
        assert_eq!(ts.recent_realtime(), TimeVal::new(43, 0));
    }

    #[test]
    fn test_native_monotonic_non_decreasing() {
        let mut ts = TimeSource::default();
        let a = ts.monotonic();
        let b = ts.monotonic();
        assert!(b >= a);
    }
}
