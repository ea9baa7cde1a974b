//! Instants and spans for due-time arithmetic.
//!
//! The scheduler needs signed time arithmetic, a total order, and sentinel
//! instants (removal from the priority queue sifts an entry to the root by
//! rewriting its key to [`Timestamp::INFINITE_PAST`]). `std::time` offers
//! neither signed spans nor sentinels, so this module carries its own
//! nanosecond-resolution types.

use std::ops::{Add, Neg, Sub};

/// An absolute instant, stored as signed nanoseconds since the Unix epoch.
///
/// The two extreme representable values are reserved as sentinels and are
/// absorbing under arithmetic: adding any span to [`Timestamp::INFINITE_PAST`]
/// or [`Timestamp::INFINITE_FUTURE`] yields the sentinel unchanged. Finite
/// arithmetic saturates at the sentinels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(i64);

impl Timestamp {
    /// The Unix epoch. [`crate::MockClock`] starts here.
    pub const EPOCH: Timestamp = Timestamp(0);

    /// An instant earlier than every finite instant.
    pub const INFINITE_PAST: Timestamp = Timestamp(i64::MIN);

    /// An instant later than every finite instant.
    pub const INFINITE_FUTURE: Timestamp = Timestamp(i64::MAX);

    /// Creates a timestamp from nanoseconds since the Unix epoch.
    pub const fn from_unix_nanos(nanos: i64) -> Self {
        Timestamp(nanos)
    }

    /// Nanoseconds since the Unix epoch.
    pub const fn as_unix_nanos(self) -> i64 {
        self.0
    }

    /// Whether this timestamp is neither of the two sentinels.
    pub const fn is_finite(self) -> bool {
        self.0 != i64::MIN && self.0 != i64::MAX
    }
}

impl Add<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: TimeDelta) -> Timestamp {
        if !self.is_finite() {
            return self;
        }
        Timestamp(self.0.saturating_add(rhs.0))
    }
}

impl Sub<TimeDelta> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: TimeDelta) -> Timestamp {
        if !self.is_finite() {
            return self;
        }
        Timestamp(self.0.saturating_sub(rhs.0))
    }
}

impl Sub for Timestamp {
    type Output = TimeDelta;

    fn sub(self, rhs: Timestamp) -> TimeDelta {
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

/// A signed span of time with nanosecond resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct TimeDelta(i64);

impl TimeDelta {
    /// The empty span.
    pub const ZERO: TimeDelta = TimeDelta(0);

    /// The largest representable span.
    pub const MAX: TimeDelta = TimeDelta(i64::MAX);

    /// The smallest (most negative) representable span.
    pub const MIN: TimeDelta = TimeDelta(i64::MIN);

    /// Creates a span from whole seconds.
    pub const fn from_secs(secs: i64) -> Self {
        TimeDelta(secs.saturating_mul(1_000_000_000))
    }

    /// Creates a span from whole milliseconds.
    pub const fn from_millis(millis: i64) -> Self {
        TimeDelta(millis.saturating_mul(1_000_000))
    }

    /// Creates a span from whole microseconds.
    pub const fn from_micros(micros: i64) -> Self {
        TimeDelta(micros.saturating_mul(1_000))
    }

    /// Creates a span from nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        TimeDelta(nanos)
    }

    /// Whole seconds, truncated toward zero.
    pub const fn as_secs(self) -> i64 {
        self.0 / 1_000_000_000
    }

    /// Whole milliseconds, truncated toward zero.
    pub const fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }

    /// Total nanoseconds.
    pub const fn as_nanos(self) -> i64 {
        self.0
    }

    /// Whether this span is zero.
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Whether this span is strictly negative.
    pub const fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// Whether this span is strictly positive.
    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Saturating multiplication by a scalar.
    pub const fn saturating_mul(self, rhs: i64) -> TimeDelta {
        TimeDelta(self.0.saturating_mul(rhs))
    }

    /// Quotient of two spans, rounded toward positive infinity.
    ///
    /// Used by the periodic re-arm rule to count the whole periods elapsed
    /// since a task's previous due time.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` is zero.
    pub fn ceil_div(self, rhs: TimeDelta) -> i64 {
        assert!(!rhs.is_zero(), "ceil_div by a zero span");
        let q = self.0 / rhs.0;
        let r = self.0 % rhs.0;
        if r != 0 && (r < 0) == (rhs.0 < 0) {
            q + 1
        } else {
            q
        }
    }

    /// Converts to a `std::time::Duration`, clamping negative spans to zero.
    pub const fn to_std(self) -> std::time::Duration {
        if self.0 < 0 {
            std::time::Duration::ZERO
        } else {
            std::time::Duration::from_nanos(self.0 as u64)
        }
    }
}

impl Add for TimeDelta {
    type Output = TimeDelta;

    fn add(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0.saturating_add(rhs.0))
    }
}

impl Sub for TimeDelta {
    type Output = TimeDelta;

    fn sub(self, rhs: TimeDelta) -> TimeDelta {
        TimeDelta(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for TimeDelta {
    type Output = TimeDelta;

    fn neg(self) -> TimeDelta {
        TimeDelta(self.0.saturating_neg())
    }
}
