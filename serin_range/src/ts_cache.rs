//! Timestamp cache: the latest read and write timestamps seen per key span.
//!
//! A write that arrives with a timestamp at or below a cached read or write
//! over an overlapping span would rewrite history other commands have already
//! observed, so the range moves it forward or rejects it. Entries carry the id
//! of the transaction that produced them; a transaction never conflicts with
//! itself. Keys without an entry report the low water mark, which rises as
//! entries are evicted so eviction only ever costs spurious pushes.

use std::collections::BTreeMap;
use std::time::Duration;

use serin_txn::{Key, KeySpan, Timestamp, TxnId};

use crate::interval::IntervalMap;

#[derive(Debug, Clone)]
struct CacheEntry {
    timestamp: Timestamp,
    txn: Option<TxnId>,
    read: bool,
}

/// Interval cache of maximum read and write timestamps.
#[derive(Debug)]
pub struct TimestampCache {
    /// Entries by (start key, insertion sequence).
    entries: IntervalMap<CacheEntry>,
    /// Insertion order for eviction: sequence to start key.
    order: BTreeMap<u64, Key>,
    next_seq: u64,
    low_water: Timestamp,
    latest: Timestamp,
    max_entries: usize,
    min_window: Duration,
}

impl TimestampCache {
    /// Creates a cache whose untracked keys report `low_water`. It holds at
    /// most `max_entries` entries and, beyond that, keeps only entries within
    /// `min_window` of the latest timestamp added.
    pub fn new(low_water: Timestamp, max_entries: usize, min_window: Duration) -> Self {
        Self {
            entries: IntervalMap::default(),
            order: BTreeMap::new(),
            next_seq: 0,
            low_water,
            latest: low_water,
            max_entries: max_entries.max(1),
            min_window,
        }
    }

    /// Floor reported for every key.
    pub fn low_water(&self) -> Timestamp {
        self.low_water
    }

    /// Number of cached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records that `txn` read (or wrote) `span` at `timestamp`.
    ///
    /// An entry already covering the span at an equal or later timestamp makes
    /// the addition redundant; entries the new one covers at an equal or
    /// earlier timestamp are dropped. Entries of different transactions never
    /// subsume each other, except that entries without a transaction apply to
    /// everybody.
    pub fn add(&mut self, span: &KeySpan, timestamp: Timestamp, txn: Option<TxnId>, read: bool) {
        if timestamp <= self.low_water || span.start >= span.end {
            return;
        }
        self.latest.forward(timestamp);

        let mut superseded = Vec::new();
        for iv in self.entries.overlapping(span) {
            let e = iv.value;
            if e.read != read {
                continue;
            }
            let contains = *iv.start <= span.start && span.end <= *iv.end;
            if contains && e.timestamp >= timestamp && (e.txn.is_none() || e.txn == txn) {
                return;
            }
            let covered = span.start <= *iv.start && *iv.end <= span.end;
            if covered && timestamp >= e.timestamp && (txn.is_none() || e.txn == txn) {
                superseded.push((iv.start.clone(), iv.seq));
            }
        }
        for (start, seq) in superseded {
            self.entries.remove(&start, seq);
            self.order.remove(&seq);
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(span.start.clone(), seq, span.end.clone(), CacheEntry { timestamp, txn, read });
        self.order.insert(seq, span.start.clone());
        self.evict();
    }

    /// Maximum read and write timestamps over `span`, ignoring entries of
    /// `txn` itself. Never below the low water mark.
    pub fn get_max(&self, span: &KeySpan, txn: Option<TxnId>) -> (Timestamp, Timestamp) {
        let mut read = self.low_water;
        let mut write = self.low_water;
        for iv in self.entries.overlapping(span) {
            let e = iv.value;
            if txn.is_some() && e.txn == txn {
                continue;
            }
            if e.read {
                read.forward(e.timestamp);
            } else {
                write.forward(e.timestamp);
            }
        }
        (read, write)
    }

    /// Drops every entry and sets a new floor.
    pub fn clear(&mut self, low_water: Timestamp) {
        self.entries.clear();
        self.order.clear();
        self.low_water = low_water;
        self.latest = low_water;
    }

    /// Evicts the oldest entries while over capacity or outside the window.
    fn evict(&mut self) {
        let window = self.min_window.as_nanos() as i64;
        while let Some((seq, start)) = self.order.first_key_value().map(|(&seq, start)| (seq, start.clone())) {
            let Some(oldest) = self.entries.get(&start, seq).map(|iv| iv.value.timestamp) else {
                self.order.remove(&seq);
                continue;
            };
            let expired = self.latest.wall_time.saturating_sub(oldest.wall_time) > window;
            if self.entries.len() <= self.max_entries && !expired {
                break;
            }
            self.low_water.forward(oldest);
            self.entries.remove(&start, seq);
            self.order.remove(&seq);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(10);

    fn ts(wall: i64) -> Timestamp {
        Timestamp::new(wall, 0)
    }

    fn cache() -> TimestampCache {
        TimestampCache::new(Timestamp::ZERO, 1024, WINDOW)
    }

    #[test]
    fn untracked_keys_report_low_water() {
        let tc = TimestampCache::new(ts(7), 16, WINDOW);
        assert_eq!(tc.get_max(&KeySpan::point("a"), None), (ts(7), ts(7)));
    }

    #[test]
    fn read_and_write_marks_are_separate() {
        let mut tc = cache();
        tc.add(&KeySpan::point("a"), ts(1), None, true);
        tc.add(&KeySpan::point("b"), ts(2), None, false);
        assert_eq!(tc.get_max(&KeySpan::point("a"), None), (ts(1), Timestamp::ZERO));
        assert_eq!(tc.get_max(&KeySpan::point("b"), None), (Timestamp::ZERO, ts(2)));
        assert_eq!(tc.get_max(&KeySpan::new("a", "c"), None), (ts(1), ts(2)));
        assert_eq!(tc.get_max(&KeySpan::point("c"), None), (Timestamp::ZERO, Timestamp::ZERO));
    }

    #[test]
    fn partial_overlap() {
        let mut tc = cache();
        tc.add(&KeySpan::new("b", "d"), ts(5), None, true);
        assert_eq!(tc.get_max(&KeySpan::new("a", "c"), None).0, ts(5));
        assert_eq!(tc.get_max(&KeySpan::point("c"), None).0, ts(5));
        assert_eq!(tc.get_max(&KeySpan::new("d", "e"), None).0, Timestamp::ZERO);
        assert_eq!(tc.get_max(&KeySpan::new("a", "b"), None).0, Timestamp::ZERO);
    }

    #[test]
    fn own_entries_are_ignored() {
        let mut tc = cache();
        let (t1, t2) = (TxnId(1), TxnId(2));
        tc.add(&KeySpan::point("a"), ts(3), Some(t1), true);
        assert_eq!(tc.get_max(&KeySpan::point("a"), Some(t1)).0, Timestamp::ZERO);
        assert_eq!(tc.get_max(&KeySpan::point("a"), Some(t2)).0, ts(3));
        assert_eq!(tc.get_max(&KeySpan::point("a"), None).0, ts(3));
    }

    #[test]
    fn other_txns_are_not_subsumed() {
        let mut tc = cache();
        let (t1, t2) = (TxnId(1), TxnId(2));
        tc.add(&KeySpan::new("a", "c"), ts(5), Some(t1), true);
        tc.add(&KeySpan::point("b"), ts(4), Some(t2), true);
        assert_eq!(tc.len(), 2);
        assert_eq!(tc.get_max(&KeySpan::point("b"), Some(t1)).0, ts(4));

        tc.add(&KeySpan::new("a", "z"), ts(9), Some(t1), true);
        assert_eq!(tc.len(), 2, "t1's own narrower entry is replaced");
        tc.add(&KeySpan::new("a", "z"), ts(9), None, true);
        assert_eq!(tc.len(), 1, "a non-transactional entry subsumes everything it covers");
    }

    #[test]
    fn redundant_adds_are_skipped() {
        let mut tc = cache();
        tc.add(&KeySpan::new("a", "c"), ts(5), None, false);
        tc.add(&KeySpan::point("b"), ts(4), Some(TxnId(1)), false);
        tc.add(&KeySpan::point("b"), ts(5), None, false);
        assert_eq!(tc.len(), 1);
        tc.add(&KeySpan::point("b"), ts(6), None, false);
        assert_eq!(tc.len(), 2);
        assert_eq!(tc.get_max(&KeySpan::point("b"), None).1, ts(6));
    }

    #[test]
    fn eviction_raises_low_water() {
        let mut tc = TimestampCache::new(Timestamp::ZERO, 2, WINDOW);
        for (i, k) in ["a", "b", "c"].into_iter().enumerate() {
            tc.add(&KeySpan::point(k), ts(i as i64 + 1), None, true);
        }
        assert_eq!(tc.len(), 2);
        assert_eq!(tc.low_water(), ts(1));
        assert_eq!(tc.get_max(&KeySpan::point("a"), None).0, ts(1));
        assert_eq!(tc.get_max(&KeySpan::point("zz"), None), (ts(1), ts(1)));
        tc.add(&KeySpan::point("d"), ts(1), None, true);
        assert_eq!(tc.len(), 2, "adds at or below the low water mark are dropped");
    }

    #[test]
    fn entries_outside_window_are_evicted() {
        let mut tc = cache();
        let window = WINDOW.as_nanos() as i64;
        tc.add(&KeySpan::point("a"), ts(1), None, true);
        tc.add(&KeySpan::point("b"), ts(window + 1), None, true);
        assert_eq!(tc.len(), 2);
        tc.add(&KeySpan::point("c"), ts(window + 2), None, true);
        assert_eq!(tc.len(), 2);
        assert_eq!(tc.low_water(), ts(1));
        tc.clear(ts(100));
        assert!(tc.is_empty());
        assert_eq!(tc.get_max(&KeySpan::point("b"), None), (ts(100), ts(100)));
    }
}
