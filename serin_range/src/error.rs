use thiserror::Error;

use serin_raft::ConsensusError;
use serin_storage::{StorageError, Value};
use serin_txn::{Key, KeySpan, Timestamp, Transaction, TxnError};

use crate::command::Method;
use crate::RangeDescriptor;

/// Result type alias for range commands.
pub type Result<T> = std::result::Result<T, RangeError>;

/// Failures of a range command.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RangeError {
    /// The request addresses keys outside the range; the caller must look up
    /// the range's current boundaries.
    #[error("key range {span} outside of bounds of {desc}")]
    OutOfRange {
        /// Addressed span.
        span: KeySpan,
        /// Descriptor of the range that rejected it.
        desc: Box<RangeDescriptor>,
    },
    /// A write at or below a newer write; retry at a later timestamp.
    #[error("write too old: timestamp {timestamp} <= {existing}")]
    WriteTooOld {
        /// Attempted timestamp.
        timestamp: Timestamp,
        /// Newest conflicting write.
        existing: Timestamp,
    },
    /// A SERIALIZABLE write at or below a newer read by another transaction.
    #[error("read timestamp conflict for txn {txn}: existing read at {existing}")]
    ReadTimestampConflict {
        /// The transaction with its timestamp pushed past the read.
        txn: Box<Transaction>,
        /// Newest conflicting read.
        existing: Timestamp,
    },
    /// A conditional put found an unexpected value.
    #[error("unexpected value: {actual:?}")]
    ConditionFailed {
        /// The current value, `None` if absent.
        actual: Option<Value>,
    },
    /// The request's end key does not sort after its start key.
    #[error("invalid key range: end key {end_key} must sort after {key}")]
    InvalidSpan {
        /// Start key of the request.
        key: Key,
        /// Offending end key.
        end_key: Key,
    },
    /// A transaction record command not addressed to the record's anchor key.
    #[error("request key {key} should match txn key {txn_key}")]
    KeyAddressingMismatch {
        /// Key the request was addressed to.
        key: Key,
        /// Anchor key of the transaction whose record is targeted.
        txn_key: Key,
    },
    /// Another transaction's intent is in the way; push it and retry.
    #[error("conflicting intent on key {key} from txn {txn}")]
    WriteIntent {
        /// Conflicting key.
        key: Key,
        /// Owner of the intent.
        txn: Box<Transaction>,
    },
    /// Transaction record failures.
    #[error(transparent)]
    Txn(#[from] TxnError),
    /// A transactional command sent without a transaction.
    #[error("{0} requires a transaction")]
    MissingTransaction(Method),
    /// The command could not be ordered.
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    /// Engine failure.
    #[error(transparent)]
    Storage(StorageError),
    /// The command could not be encoded for the log.
    #[error("encode command: {0}")]
    Serialization(String),
}

impl RangeError {
    /// True if the same command may succeed when retried, possibly at a later
    /// timestamp or after a transaction restart.
    pub fn is_retriable(&self) -> bool {
        match self {
            RangeError::WriteTooOld { .. }
            | RangeError::ReadTimestampConflict { .. }
            | RangeError::WriteIntent { .. } => true,
            RangeError::Txn(e) => e.is_retriable(),
            _ => false,
        }
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            RangeError::OutOfRange { .. } => "out_of_range",
            RangeError::WriteTooOld { .. } => "write_too_old",
            RangeError::ReadTimestampConflict { .. } => "read_ts_conflict",
            RangeError::ConditionFailed { .. } => "condition_failed",
            RangeError::InvalidSpan { .. } => "invalid_span",
            RangeError::KeyAddressingMismatch { .. } => "key_mismatch",
            RangeError::WriteIntent { .. } => "write_intent",
            RangeError::Txn(TxnError::AlreadyFinished { .. }) => "already_finished",
            RangeError::Txn(TxnError::EpochRegression { .. }) => "epoch_regression",
            RangeError::Txn(TxnError::TimestampRegression { .. }) => "timestamp_regression",
            RangeError::Txn(TxnError::Retry { .. }) => "txn_retry",
            RangeError::Txn(TxnError::PushConflict { .. }) => "push_conflict",
            RangeError::Txn(TxnError::Status { .. }) => "txn_status",
            RangeError::MissingTransaction(_) => "missing_txn",
            RangeError::Consensus(_) => "consensus",
            RangeError::Storage(_) => "storage",
            RangeError::Serialization(_) => "serialization",
        }
    }
}

impl From<StorageError> for RangeError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::WriteIntent { key, txn } => RangeError::WriteIntent { key, txn },
            StorageError::WriteTooOld { timestamp, existing } => RangeError::WriteTooOld { timestamp, existing },
            StorageError::ConditionFailed { actual } => RangeError::ConditionFailed { actual },
            other => RangeError::Storage(other),
        }
    }
}

impl From<serde_json::Error> for RangeError {
    fn from(e: serde_json::Error) -> Self {
        RangeError::Serialization(e.to_string())
    }
}
