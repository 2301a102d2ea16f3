//! Transitions of a persisted transaction record.
//!
//! These functions are pure: they take the persisted record (if any) plus the
//! request and return the record to persist. Reading and writing the record is
//! left to the caller, which must hold exclusive access to the record's anchor
//! key for the duration of the read-modify-write.

use std::time::Duration;
use tracing::debug;

use crate::error::{Result, TxnError};
use crate::{make_priority, IsolationLevel, Timestamp, Transaction, TxnStatus};

/// Pushes win outright against a pushee silent for longer than this many
/// heartbeat intervals.
pub const HEARTBEAT_EXPIRY_MULTIPLIER: i64 = 2;

/// Outcome of a record transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordUpdate {
    /// The resulting record, returned to the caller.
    pub txn: Transaction,
    /// False when the transition was a no-op and nothing needs writing.
    pub persist: bool,
}

impl RecordUpdate {
    fn write(txn: Transaction) -> Self {
        Self { txn, persist: true }
    }

    fn noop(txn: Transaction) -> Self {
        Self { txn, persist: false }
    }
}

/// Records a heartbeat at `timestamp`.
///
/// A missing record is created from `txn`. Terminal records come back
/// unchanged, without a heartbeat being set.
pub fn heartbeat(existing: Option<Transaction>, txn: &Transaction, timestamp: Timestamp) -> RecordUpdate {
    let mut record = existing.unwrap_or_else(|| txn.clone());
    if record.status.is_finalized() {
        return RecordUpdate::noop(record);
    }
    let hb = record.last_heartbeat.get_or_insert(Timestamp::ZERO);
    hb.forward(timestamp);
    RecordUpdate::write(record)
}

/// Commits or aborts `txn` at `timestamp`.
///
/// The final timestamp is the later of the persisted record's (which pushes
/// may have moved) and `timestamp`. Epoch and priority only move forward; the
/// last heartbeat is preserved from the record.
pub fn end_transaction(
    existing: Option<Transaction>,
    txn: &Transaction,
    timestamp: Timestamp,
    commit: bool,
) -> Result<Transaction> {
    let mut record = match existing {
        Some(record) => {
            if record.status.is_finalized() {
                return Err(TxnError::AlreadyFinished { txn: Box::new(record) });
            }
            if txn.epoch < record.epoch {
                return Err(TxnError::EpochRegression { epoch: txn.epoch, txn: Box::new(record) });
            }
            if txn.epoch == record.epoch && record.timestamp < txn.orig_timestamp {
                return Err(TxnError::TimestampRegression {
                    timestamp: txn.orig_timestamp,
                    txn: Box::new(record),
                });
            }
            let mut record = record;
            record.epoch = record.epoch.max(txn.epoch);
            record.upgrade_priority(txn.priority);
            record
        }
        None => txn.clone(),
    };
    record.timestamp.forward(timestamp);

    if commit {
        if txn.isolation == IsolationLevel::Serializable && record.timestamp != txn.orig_timestamp {
            return Err(TxnError::Retry { txn: Box::new(record) });
        }
        record.status = TxnStatus::Committed;
    } else {
        record.status = TxnStatus::Aborted;
    }
    Ok(record)
}

/// Parameters of a push against a pushee's record.
#[derive(Debug, Clone, Copy)]
pub struct PushArgs<'a> {
    /// Pushing transaction; `None` for non-transactional requests.
    pub pusher: Option<&'a Transaction>,
    /// Pushee as known to the pusher (typically from a conflicting intent).
    pub pushee: &'a Transaction,
    /// The pusher's request timestamp.
    pub timestamp: Timestamp,
    /// Priority hint used when there is no pusher transaction.
    pub user_priority: i32,
    /// Abort the pushee rather than only moving its timestamp.
    pub abort: bool,
}

/// Arbitrates a push against the pushee's record.
///
/// The pusher prevails when the pushee's heartbeat has expired, when the
/// pushee's intent comes from an epoch older than its record, or on priority
/// (ties go to the transaction with the older timestamp). A winning abort push
/// marks the pushee ABORTED; a winning timestamp push moves the pushee's
/// timestamp just past the pusher's. Terminal pushees, and timestamp pushes
/// against a pushee already far enough ahead, succeed without change.
pub fn push_transaction(
    existing: Option<Transaction>,
    args: PushArgs<'_>,
    now: Timestamp,
    heartbeat_interval: Duration,
) -> Result<RecordUpdate> {
    let mut record = match existing {
        Some(record) => {
            if record.status.is_finalized() {
                return Ok(RecordUpdate::noop(record));
            }
            let mut record = record;
            record.epoch = record.epoch.max(args.pushee.epoch);
            record.timestamp.forward(args.pushee.timestamp);
            record.upgrade_priority(args.pushee.priority);
            record
        }
        None => {
            if args.pushee.last_heartbeat.is_some() {
                return Err(TxnError::Status {
                    txn: Box::new(args.pushee.clone()),
                    msg: "no txn persisted, yet intent has heartbeat".into(),
                });
            }
            if args.pushee.status != TxnStatus::Pending {
                return Err(TxnError::Status {
                    txn: Box::new(args.pushee.clone()),
                    msg: format!("no txn persisted, yet intent has status {}", args.pushee.status),
                });
            }
            args.pushee.clone()
        }
    };

    if !args.abort && args.timestamp < record.timestamp {
        return Ok(RecordUpdate::noop(record));
    }

    let priority = match args.pusher {
        Some(pusher) => pusher.priority,
        None => make_priority(args.user_priority),
    };
    let pusher_ts = args.pusher.map_or(args.timestamp, |p| p.timestamp);

    let last_active = record.last_heartbeat.map_or(record.timestamp, |hb| hb.max(record.timestamp));
    let expiry_nanos = HEARTBEAT_EXPIRY_MULTIPLIER * heartbeat_interval.as_nanos() as i64;

    let pusher_wins = if now.wall_time.saturating_sub(last_active.wall_time) > expiry_nanos {
        debug!(pushee = %record, "pushing expired txn");
        true
    } else if args.pushee.epoch < record.epoch {
        debug!(pushee = %record, "pushing intent from previous epoch");
        true
    } else if record.priority < priority || (record.priority == priority && pusher_ts < record.timestamp) {
        debug!(pushee = %record, priority, "pushing txn with lower priority");
        true
    } else {
        false
    };

    if !pusher_wins {
        debug!(pushee = %record, priority, "failed to push txn");
        return Err(TxnError::PushConflict {
            pusher: args.pusher.map(|p| Box::new(p.clone())),
            pushee: Box::new(record),
        });
    }

    record.upgrade_priority(priority.saturating_sub(1));
    if args.abort {
        record.status = TxnStatus::Aborted;
    } else {
        record.timestamp.forward(args.timestamp.next());
    }
    Ok(RecordUpdate::write(record))
}
