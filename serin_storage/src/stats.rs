use serde::{Deserialize, Serialize};
use std::ops::{AddAssign, SubAssign};

/// Bytes charged per stored version on top of the key itself (the encoded
/// timestamp).
pub const VERSION_OVERHEAD: i64 = 12;

/// Aggregate size counters for a span of the keyspace.
///
/// Engines report per-write deltas into a caller supplied `MvccStats`; ranges
/// fold those deltas into their running totals.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MvccStats {
    /// Key and value bytes of the newest, non-deleted version of every key.
    pub live_bytes: i64,
    /// Key bytes over all versions.
    pub key_bytes: i64,
    /// Value bytes over all versions.
    pub val_bytes: i64,
    /// Key and value bytes of unresolved intents.
    pub intent_bytes: i64,
    /// Keys whose newest version is not a deletion.
    pub live_count: i64,
    /// Distinct keys.
    pub key_count: i64,
    /// Versions, including intents and deletions.
    pub val_count: i64,
    /// Unresolved intents.
    pub intent_count: i64,
}

impl MvccStats {
    /// Total stored bytes.
    pub fn total_bytes(&self) -> i64 {
        self.key_bytes + self.val_bytes
    }

    /// True if every counter is zero.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl AddAssign for MvccStats {
    fn add_assign(&mut self, o: Self) {
        self.live_bytes += o.live_bytes;
        self.key_bytes += o.key_bytes;
        self.val_bytes += o.val_bytes;
        self.intent_bytes += o.intent_bytes;
        self.live_count += o.live_count;
        self.key_count += o.key_count;
        self.val_count += o.val_count;
        self.intent_count += o.intent_count;
    }
}

impl SubAssign for MvccStats {
    fn sub_assign(&mut self, o: Self) {
        self.live_bytes -= o.live_bytes;
        self.key_bytes -= o.key_bytes;
        self.val_bytes -= o.val_bytes;
        self.intent_bytes -= o.intent_bytes;
        self.live_count -= o.live_count;
        self.key_count -= o.key_count;
        self.val_count -= o.val_count;
        self.intent_count -= o.intent_count;
    }
}
