//! Half-open time intervals and overlap counting.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// A half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeInterval {
    /// Creates an interval. Returns `None` unless `end > start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Option<Self> {
        (end > start).then_some(Self { start, end })
    }

    /// Builds an interval without checking ordering.
    ///
    /// Degenerate intervals never overlap anything, so this is safe for
    /// stored data that predates validation.
    pub const fn unchecked(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    /// `self.start < other.end && self.end > other.start`
    pub fn overlaps(&self, other: &Self) -> bool {
        self.start < other.end && self.end > other.start
    }

    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }

    /// Shifts the interval so it starts at `start`, keeping its duration.
    pub fn moved_to(&self, start: DateTime<Utc>) -> Self {
        Self {
            start,
            end: start + self.duration(),
        }
    }
}

/// Counts the committed intervals that overlap `candidate`.
///
/// No ordering is assumed; callers may pre-filter with an index on start
/// time, but the count does not depend on it.
pub fn count_overlapping(committed: &[TimeInterval], candidate: &TimeInterval) -> usize {
    committed
        .iter()
        .filter(|interval| interval.overlaps(candidate))
        .count()
}
