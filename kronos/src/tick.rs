//! Tick-space coordinate types.
//!
//! A wheel quantizes physical time into a discrete lattice: one tick per
//! `tick_duration`. The types here keep the dimensional roles apart — a
//! [`TickInstant`] is a point on that lattice (an absolute deadline or the
//! wheel's current position), a [`TickSpan`] is a distance (a delay or a
//! period), even though both are plain `u64` counts underneath.

use core::ops::Add;
use std::time::Duration;

/// A point on the discrete tick lattice.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TickInstant(u64);

impl TickInstant {
    /// Creates a tick instant from a raw tick count.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying tick count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    /// Ticks remaining until this instant, seen from `now`.
    ///
    /// The result wraps: a deadline already behind `now` comes back as a
    /// huge unsigned distance, which `as i64` exposes as negative — the same
    /// trick bucket selection uses to detect a driver that fell behind.
    #[inline]
    #[must_use]
    pub const fn distance_from(self, now: u64) -> u64 {
        self.0.wrapping_sub(now)
    }
}

/// A span in tick space.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[repr(transparent)]
pub struct TickSpan(u64);

impl TickSpan {
    /// The zero span; marks a timer as one-shot when used as its period.
    pub const ZERO: Self = Self(0);

    /// Creates a tick span from a raw tick count.
    #[inline]
    #[must_use]
    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying tick count.
    #[inline]
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// Quantizes a physical duration onto a lattice with the given tick.
    ///
    /// Truncating division: anything shorter than one tick becomes zero
    /// ticks, which the wheel then fires on the next tick. Saturates at
    /// the largest forward span — distance from `now` is sign-split at
    /// `2^63`, and a span past that would read as behind-now.
    #[must_use]
    pub fn quantize(d: Duration, tick: Duration) -> Self {
        debug_assert!(!tick.is_zero());
        Self((d.as_nanos() / tick.as_nanos()).min(i64::MAX as u128) as u64)
    }
}

impl Add<TickSpan> for TickInstant {
    type Output = Self;

    #[inline]
    fn add(self, rhs: TickSpan) -> Self::Output {
        Self(self.0.wrapping_add(rhs.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantize_truncates() {
        let tick = Duration::from_millis(1);
        assert_eq!(TickSpan::quantize(Duration::from_millis(10), tick).get(), 10);
        assert_eq!(TickSpan::quantize(Duration::from_micros(900), tick).get(), 0);
        assert_eq!(TickSpan::quantize(Duration::from_micros(1900), tick).get(), 1);
    }

    #[test]
    fn quantize_saturates_on_absurd_spans() {
        let tick = Duration::from_nanos(1);
        let span = TickSpan::quantize(Duration::MAX, tick);
        assert_eq!(span.get(), i64::MAX as u64);
        // Saturated spans still read as forward distances, never behind.
        let deadline = TickInstant::new(5) + span;
        assert!((deadline.distance_from(5) as i64) > 0);
    }

    #[test]
    fn distance_wraps_negative() {
        let deadline = TickInstant::new(5);
        assert_eq!(deadline.distance_from(3), 2);
        // Deadline behind `now`: wraps, reads negative as i64.
        assert!((deadline.distance_from(9) as i64) < 0);
    }

    #[test]
    fn add_span() {
        assert_eq!(TickInstant::new(7) + TickSpan::new(3), TickInstant::new(10));
    }
}
