use serin_txn::{Key, KeySpan, Timestamp, Transaction, TxnId};

use crate::{MvccStats, Value};

/// Result type alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Storage layer errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StorageError {
    /// Another transaction holds an unresolved intent on the key.
    #[error("conflicting intent on key {key} from txn {txn}")]
    WriteIntent {
        /// Conflicting key.
        key: Key,
        /// Owner of the intent.
        txn: Box<Transaction>,
    },
    /// A committed version at or after the write timestamp already exists.
    #[error("write at timestamp {timestamp} too old; existing version at {existing}")]
    WriteTooOld {
        /// Attempted write timestamp.
        timestamp: Timestamp,
        /// Timestamp of the newest committed version.
        existing: Timestamp,
    },
    /// A conditional put found a value different from the expected one.
    #[error("unexpected value: {actual:?}")]
    ConditionFailed {
        /// The value actually stored, `None` if the key is absent.
        actual: Option<Value>,
    },
    /// The stored value cannot take part in the operation.
    #[error("key {key}: {msg}")]
    ValueType {
        /// Offending key.
        key: Key,
        /// Description of the mismatch.
        msg: String,
    },
    /// IO or other underlying failure.
    #[error("storage backend: {0}")]
    Backend(String),
}

/// Multi-version key/value engine backing one or more ranges.
///
/// Reads observe the newest version at or below the read timestamp. Writes
/// by a transaction leave an intent, at most one per key, that blocks other
/// writers and readers at or above its timestamp until resolved. Every
/// mutating call adds its size delta to `ms`.
#[async_trait::async_trait]
pub trait MvccEngine: Send + Sync {
    /// Reads `key` as of `timestamp`. A transaction sees its own intent.
    async fn get(&self, key: &Key, timestamp: Timestamp, txn: Option<&Transaction>) -> Result<Option<Value>>;

    /// Reads up to `max_results` live keys within `span` (0 means unbounded).
    async fn scan(
        &self,
        span: &KeySpan,
        max_results: usize,
        timestamp: Timestamp,
        txn: Option<&Transaction>,
    ) -> Result<Vec<(Key, Value)>>;

    /// Writes `value` at `timestamp`, as an intent when `txn` is given.
    async fn put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        value: Value,
        txn: Option<&Transaction>,
    ) -> Result<()>;

    /// Writes `value` only if the current value equals `expected`
    /// (`None` expecting the key to be absent).
    async fn conditional_put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        value: Value,
        expected: Option<&Value>,
        txn: Option<&Transaction>,
    ) -> Result<()>;

    /// Adds `inc` to the integer at `key` (absent counts as 0) and returns
    /// the new value. An increment of zero only reads.
    async fn increment(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        inc: i64,
        txn: Option<&Transaction>,
    ) -> Result<i64>;

    /// Writes a deletion marker for `key`.
    async fn delete(&self, ms: &mut MvccStats, key: &Key, timestamp: Timestamp, txn: Option<&Transaction>)
        -> Result<()>;

    /// Deletes up to `max_entries` live keys within `span` (0 means
    /// unbounded) and returns how many were deleted.
    async fn delete_range(
        &self,
        ms: &mut MvccStats,
        span: &KeySpan,
        max_entries: usize,
        timestamp: Timestamp,
        txn: Option<&Transaction>,
    ) -> Result<u64>;

    /// Combines `value` into the unversioned value at `key`.
    async fn merge(&self, ms: &mut MvccStats, key: &Key, value: Value) -> Result<()>;

    /// Resolves the intents of `txn` within `span` according to its status:
    /// committed intents become versions at the transaction's timestamp,
    /// aborted ones (or ones from an older epoch) are removed, pending ones
    /// move to the transaction's timestamp.
    async fn resolve_intent(&self, ms: &mut MvccStats, span: &KeySpan, txn: &Transaction) -> Result<()>;

    /// Reads a persisted transaction record.
    async fn get_txn_record(&self, id: TxnId) -> Result<Option<Transaction>>;

    /// Persists a transaction record.
    async fn put_txn_record(&self, txn: &Transaction) -> Result<()>;
}
