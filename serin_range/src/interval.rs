//! Interval map over half-open key spans.
//!
//! A treap ordered by `(start, seq)` where every node also tracks the largest
//! end key in its subtree. Overlap queries skip any subtree whose largest end
//! does not reach the query's start, and everything right of a node that
//! starts at or after the query's end.

use std::cmp::Ordering;
use std::fmt;

use serin_txn::{Key, KeySpan};

type Link<V> = Option<Box<Node<V>>>;

struct Node<V> {
    start: Key,
    seq: u64,
    end: Key,
    /// Largest `end` in this subtree.
    max_end: Key,
    priority: u64,
    value: V,
    left: Link<V>,
    right: Link<V>,
}

impl<V> Node<V> {
    fn cmp_to(&self, start: &Key, seq: u64) -> Ordering {
        (&self.start, self.seq).cmp(&(start, seq))
    }

    fn refresh(&mut self) {
        let mut max_end = &self.end;
        for child in [&self.left, &self.right].into_iter().flatten() {
            if child.max_end > *max_end {
                max_end = &child.max_end;
            }
        }
        let max_end = max_end.clone();
        self.max_end = max_end;
    }
}

/// An entry returned by [`IntervalMap`] lookups.
#[derive(Debug)]
pub(crate) struct Interval<'a, V> {
    pub start: &'a Key,
    pub seq: u64,
    pub end: &'a Key,
    pub value: &'a V,
}

/// Values keyed by `(start key, sequence)` with a span `[start, end)` each.
pub(crate) struct IntervalMap<V> {
    root: Link<V>,
    len: usize,
}

impl<V> Default for IntervalMap<V> {
    fn default() -> Self {
        Self { root: None, len: 0 }
    }
}

impl<V: fmt::Debug> fmt::Debug for IntervalMap<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = Vec::with_capacity(self.len);
        collect_all(&self.root, &mut out);
        f.debug_list().entries(out).finish()
    }
}

impl<V> IntervalMap<V> {
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn clear(&mut self) {
        self.root = None;
        self.len = 0;
    }

    /// Inserts `value` over `[start, end)`. `(start, seq)` must not be present.
    pub fn insert(&mut self, start: Key, seq: u64, end: Key, value: V) {
        let (left, right) = split(self.root.take(), &start, seq);
        let node = Box::new(Node {
            max_end: end.clone(),
            priority: priority(seq),
            start,
            seq,
            end,
            value,
            left: None,
            right: None,
        });
        self.root = merge(merge(left, Some(node)), right);
        self.len += 1;
    }

    pub fn remove(&mut self, start: &Key, seq: u64) -> Option<V> {
        let value = remove(&mut self.root, start, seq)?;
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, start: &Key, seq: u64) -> Option<Interval<'_, V>> {
        let mut link = &self.root;
        while let Some(node) = link {
            link = match node.cmp_to(start, seq) {
                Ordering::Less => &node.right,
                Ordering::Greater => &node.left,
                Ordering::Equal => return Some(interval(node)),
            };
        }
        None
    }

    /// Every entry sharing at least one key with `span`, in `(start, seq)`
    /// order.
    pub fn overlapping(&self, span: &KeySpan) -> Vec<Interval<'_, V>> {
        let mut out = Vec::new();
        if span.start < span.end {
            collect_overlapping(&self.root, span, &mut out);
        }
        out
    }
}

fn interval<V>(node: &Node<V>) -> Interval<'_, V> {
    Interval { start: &node.start, seq: node.seq, end: &node.end, value: &node.value }
}

/// Treap priority: a hash of the sequence number.
fn priority(seq: u64) -> u64 {
    let mut z = seq.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

/// Splits into entries below `(start, seq)` and the rest.
fn split<V>(link: Link<V>, start: &Key, seq: u64) -> (Link<V>, Link<V>) {
    let Some(mut node) = link else { return (None, None) };
    if node.cmp_to(start, seq) == Ordering::Less {
        let (left, right) = split(node.right.take(), start, seq);
        node.right = left;
        node.refresh();
        (Some(node), right)
    } else {
        let (left, right) = split(node.left.take(), start, seq);
        node.left = right;
        node.refresh();
        (left, Some(node))
    }
}

/// Joins two treaps where every entry of `a` orders before every entry of `b`.
fn merge<V>(a: Link<V>, b: Link<V>) -> Link<V> {
    match (a, b) {
        (None, b) => b,
        (a, None) => a,
        (Some(mut a), Some(mut b)) => {
            if a.priority >= b.priority {
                a.right = merge(a.right.take(), Some(b));
                a.refresh();
                Some(a)
            } else {
                b.left = merge(Some(a), b.left.take());
                b.refresh();
                Some(b)
            }
        }
    }
}

fn remove<V>(link: &mut Link<V>, start: &Key, seq: u64) -> Option<V> {
    let ord = link.as_ref()?.cmp_to(start, seq);
    if ord == Ordering::Equal {
        let mut node = link.take()?;
        *link = merge(node.left.take(), node.right.take());
        return Some(node.value);
    }
    let node = link.as_mut()?;
    let child = if ord == Ordering::Less { &mut node.right } else { &mut node.left };
    let value = remove(child, start, seq)?;
    node.refresh();
    Some(value)
}

fn collect_overlapping<'a, V>(link: &'a Link<V>, span: &KeySpan, out: &mut Vec<Interval<'a, V>>) {
    let Some(node) = link else { return };
    if node.max_end <= span.start {
        return;
    }
    collect_overlapping(&node.left, span, out);
    if node.start < span.end {
        if node.end > span.start {
            out.push(interval(node));
        }
        collect_overlapping(&node.right, span, out);
    }
}

fn collect_all<'a, V>(link: &'a Link<V>, out: &mut Vec<Interval<'a, V>>) {
    if let Some(node) = link {
        collect_all(&node.left, out);
        out.push(interval(node));
        collect_all(&node.right, out);
    }
}
