use serde::{Deserialize, Serialize};
use std::fmt;

use serin_raft::RangeId;
use serin_txn::{Key, KeySpan};

/// Boundaries of a range: the keys `[start_key, end_key)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RangeDescriptor {
    /// Replication group id.
    pub range_id: RangeId,
    /// First key of the range.
    pub start_key: Key,
    /// First key after the range.
    pub end_key: Key,
}

impl RangeDescriptor {
    /// Describes range `range_id` over `[start_key, end_key)`.
    pub fn new(range_id: RangeId, start_key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self { range_id, start_key: start_key.into(), end_key: end_key.into() }
    }

    /// The range's key span.
    pub fn span(&self) -> KeySpan {
        KeySpan { start: self.start_key.clone(), end: self.end_key.clone() }
    }

    /// True if `key` falls within the range.
    pub fn contains_key(&self, key: &Key) -> bool {
        self.span().contains_key(key)
    }

    /// True if the request span `[start, end)` falls within the range; an empty
    /// `end` addresses the single key `start`.
    pub fn contains_key_range(&self, start: &Key, end: &Key) -> bool {
        self.contains_span(&KeySpan::from_bounds(start, end))
    }

    /// True if `span` falls within the range.
    pub fn contains_span(&self, span: &KeySpan) -> bool {
        self.span().contains(span)
    }
}

impl fmt::Display for RangeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "range {} {}", self.range_id, self.span())
    }
}
