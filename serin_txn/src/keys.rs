use serde::{Deserialize, Serialize};
use std::fmt;

/// An ordered byte-string key.
#[derive(Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key(pub Vec<u8>);

/// The lowest possible key.
pub const KEY_MIN: Key = Key(Vec::new());

/// Byte prefix of the highest key; [`Key::max`] returns the key itself.
const KEY_MAX_BYTES: [u8; 2] = [0xff, 0xff];

impl Key {
    /// The highest key a range may end at.
    pub fn max() -> Self {
        Key(KEY_MAX_BYTES.to_vec())
    }

    /// Raw bytes of the key.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// True for the zero-length key.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The immediate successor: the key with a zero byte appended.
    pub fn next(&self) -> Key {
        let mut bytes = Vec::with_capacity(self.0.len() + 1);
        bytes.extend_from_slice(&self.0);
        bytes.push(0);
        Key(bytes)
    }

    /// The first key which does not have `self` as a prefix.
    ///
    /// Trailing `0xff` bytes are dropped before the last byte is incremented.
    /// An empty key or one made entirely of `0xff` has no such successor and
    /// maps to [`Key::max`].
    pub fn prefix_end(&self) -> Key {
        let mut bytes = self.0.clone();
        while let Some(last) = bytes.pop() {
            if last < 0xff {
                bytes.push(last + 1);
                return Key(bytes);
            }
        }
        Key::max()
    }

    /// True if `self` begins with `prefix`.
    pub fn has_prefix(&self, prefix: &[u8]) -> bool {
        self.0.starts_with(prefix)
    }

    /// Concatenates `suffix` onto this key.
    pub fn join(&self, suffix: &[u8]) -> Key {
        let mut bytes = self.0.clone();
        bytes.extend_from_slice(suffix);
        Key(bytes)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.as_bytes().to_vec())
    }
}

impl From<&[u8]> for Key {
    fn from(b: &[u8]) -> Self {
        Key(b.to_vec())
    }
}

impl From<Vec<u8>> for Key {
    fn from(b: Vec<u8>) -> Self {
        Key(b)
    }
}

impl AsRef<[u8]> for Key {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\"", self.0.escape_ascii())
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A half-open key interval `[start, end)`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeySpan {
    /// Inclusive lower bound.
    pub start: Key,
    /// Exclusive upper bound.
    pub end: Key,
}

impl KeySpan {
    /// Builds a span; `end` must sort after `start`.
    pub fn new(start: impl Into<Key>, end: impl Into<Key>) -> Self {
        Self { start: start.into(), end: end.into() }
    }

    /// The degenerate span `[key, key.next())`.
    pub fn point(key: impl Into<Key>) -> Self {
        let start = key.into();
        let end = start.next();
        Self { start, end }
    }

    /// Span of a request addressed with `key` and optional `end_key`: an empty
    /// end key addresses the single key.
    pub fn from_bounds(key: &Key, end_key: &Key) -> Self {
        if end_key.is_empty() {
            Self::point(key.clone())
        } else {
            Self { start: key.clone(), end: end_key.clone() }
        }
    }

    /// True if the two half-open spans share at least one key.
    pub fn overlaps(&self, other: &KeySpan) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// True if `other` lies entirely within this span.
    pub fn contains(&self, other: &KeySpan) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// True if `key` lies within this span.
    pub fn contains_key(&self, key: &Key) -> bool {
        &self.start <= key && key < &self.end
    }
}

impl fmt::Display for KeySpan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}
