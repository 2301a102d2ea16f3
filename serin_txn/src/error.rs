use thiserror::Error;

use crate::{Timestamp, Transaction, TxnStatus};

/// Result type alias for transaction record operations.
pub type Result<T> = std::result::Result<T, TxnError>;

/// Failures of the transaction record state machine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TxnError {
    /// The record is already COMMITTED or ABORTED.
    #[error("txn {txn}: already {}", status_word(txn.status))]
    AlreadyFinished {
        /// The persisted, terminal record.
        txn: Box<Transaction>,
    },
    /// The request's epoch is older than the persisted record's.
    #[error("txn {txn}: epoch regression: {epoch}")]
    EpochRegression {
        /// The persisted record.
        txn: Box<Transaction>,
        /// Epoch carried by the request.
        epoch: u32,
    },
    /// The persisted record's timestamp is behind the request's original
    /// timestamp at the same epoch.
    #[error("txn {txn}: timestamp regression: {timestamp}")]
    TimestampRegression {
        /// The persisted record.
        txn: Box<Transaction>,
        /// Original timestamp carried by the request.
        timestamp: Timestamp,
    },
    /// A SERIALIZABLE commit found its timestamp pushed; restart required.
    #[error("retry txn {txn}")]
    Retry {
        /// The record with its pushed timestamp.
        txn: Box<Transaction>,
    },
    /// The pusher lost arbitration against the pushee.
    #[error("failed to push txn {pushee}")]
    PushConflict {
        /// The pushing transaction, absent for non-transactional pushers.
        pusher: Option<Box<Transaction>>,
        /// Pushee state at the time of the failed push.
        pushee: Box<Transaction>,
    },
    /// The request described a transaction state inconsistent with what is
    /// persisted.
    #[error("txn {txn}: {msg}")]
    Status {
        /// Transaction in question.
        txn: Box<Transaction>,
        /// Description of the inconsistency.
        msg: String,
    },
}

impl TxnError {
    /// True if the caller may retry (possibly after restarting the txn).
    pub fn is_retriable(&self) -> bool {
        matches!(self, TxnError::Retry { .. } | TxnError::PushConflict { .. })
    }
}

fn status_word(status: TxnStatus) -> &'static str {
    match status {
        TxnStatus::Committed => "committed",
        TxnStatus::Aborted => "aborted",
        TxnStatus::Pending => "pending",
    }
}
