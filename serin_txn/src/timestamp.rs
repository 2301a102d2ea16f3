use serde::{Deserialize, Serialize};
use std::fmt;

/// Hybrid logical timestamp: wall time in nanoseconds plus a logical counter
/// breaking ties between events at the same wall time.
///
/// Ordering compares `wall_time` first, then `logical`.
#[derive(
    Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// Nanoseconds since the Unix epoch.
    pub wall_time: i64,
    /// Logical tick within `wall_time`.
    pub logical: i32,
}

impl Timestamp {
    /// Zero value; used for inline, unversioned records.
    pub const ZERO: Timestamp = Timestamp { wall_time: 0, logical: 0 };
    /// Smallest timestamp a versioned write may carry.
    pub const MIN: Timestamp = Timestamp { wall_time: 0, logical: 1 };
    /// Largest representable timestamp; reads at `MAX` see every version.
    pub const MAX: Timestamp = Timestamp { wall_time: i64::MAX, logical: i32::MAX };

    /// Constructs a timestamp.
    pub const fn new(wall_time: i64, logical: i32) -> Self {
        Self { wall_time, logical }
    }

    /// The smallest timestamp strictly greater than `self`.
    pub fn next(self) -> Self {
        if self.logical == i32::MAX {
            Self { wall_time: self.wall_time.saturating_add(1), logical: 0 }
        } else {
            Self { wall_time: self.wall_time, logical: self.logical + 1 }
        }
    }

    /// The largest timestamp strictly smaller than `self`.
    pub fn prev(self) -> Self {
        if self.logical > 0 {
            Self { wall_time: self.wall_time, logical: self.logical - 1 }
        } else {
            Self { wall_time: self.wall_time.saturating_sub(1), logical: i32::MAX }
        }
    }

    /// Raises `self` to `other` if `other` is later.
    pub fn forward(&mut self, other: Timestamp) {
        if *self < other {
            *self = other;
        }
    }

    /// Returns a copy with `nanos` added to the wall time.
    pub fn add_nanos(self, nanos: i64) -> Self {
        Self { wall_time: self.wall_time.saturating_add(nanos), logical: self.logical }
    }

    /// True for [`Timestamp::ZERO`].
    pub fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.wall_time / 1_000_000_000;
        let nanos = (self.wall_time % 1_000_000_000).abs();
        write!(f, "{secs}.{nanos:09},{}", self.logical)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}
