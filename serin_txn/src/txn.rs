use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::{Key, Timestamp};

/// Transaction identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl TxnId {
    /// Draws a random identifier.
    pub fn random() -> Self {
        TxnId(rand::thread_rng().gen())
    }
}

impl fmt::Display for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

impl fmt::Debug for TxnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TxnId({self})")
    }
}

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TxnStatus {
    /// Running; the only status from which a record may change.
    Pending,
    /// Committed (terminal).
    Committed,
    /// Aborted (terminal).
    Aborted,
}

impl TxnStatus {
    /// True for COMMITTED and ABORTED.
    pub fn is_finalized(self) -> bool {
        !matches!(self, TxnStatus::Pending)
    }
}

impl fmt::Display for TxnStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TxnStatus::Pending => "PENDING",
            TxnStatus::Committed => "COMMITTED",
            TxnStatus::Aborted => "ABORTED",
        })
    }
}

/// Isolation level requested by a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum IsolationLevel {
    /// Commit fails if the commit timestamp moved past the original timestamp.
    #[default]
    Serializable,
    /// Commit tolerates a forward-pushed timestamp.
    Snapshot,
}

impl fmt::Display for IsolationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            IsolationLevel::Serializable => "SERIALIZABLE",
            IsolationLevel::Snapshot => "SNAPSHOT",
        })
    }
}

/// Transaction record, both as carried on requests and as persisted on the
/// range holding the transaction's anchor key.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Human readable name, for logging.
    pub name: String,
    /// Anchor key; the record lives on the range containing it.
    pub key: Key,
    /// Unique identifier.
    pub id: TxnId,
    /// Conflict arbitration priority; higher wins.
    pub priority: i32,
    /// Requested isolation.
    pub isolation: IsolationLevel,
    /// Current status.
    pub status: TxnStatus,
    /// Incremented on every restart.
    pub epoch: u32,
    /// Time of the most recent heartbeat, if any.
    pub last_heartbeat: Option<Timestamp>,
    /// Current read/commit timestamp.
    pub timestamp: Timestamp,
    /// Timestamp at which the current epoch started.
    pub orig_timestamp: Timestamp,
    /// Upper bound of clock uncertainty for reads.
    pub max_timestamp: Timestamp,
}

impl Transaction {
    /// Starts a PENDING transaction at `now`.
    pub fn new(
        name: impl Into<String>,
        key: impl Into<Key>,
        user_priority: i32,
        isolation: IsolationLevel,
        now: Timestamp,
        max_offset: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            key: key.into(),
            id: TxnId::random(),
            priority: make_priority(user_priority),
            isolation,
            status: TxnStatus::Pending,
            epoch: 0,
            last_heartbeat: None,
            timestamp: now,
            orig_timestamp: now,
            max_timestamp: now.add_nanos(max_offset.as_nanos() as i64),
        }
    }

    /// Raises the priority to at least `min_priority`.
    pub fn upgrade_priority(&mut self, min_priority: i32) {
        if min_priority > self.priority {
            self.priority = min_priority;
        }
    }

    /// Prepares the transaction for another attempt after a retriable error:
    /// bumps the epoch, moves the timestamps forward to `timestamp` and raises
    /// the priority.
    pub fn restart(&mut self, user_priority: i32, upgrade_priority: i32, timestamp: Timestamp) {
        self.epoch += 1;
        self.timestamp.forward(timestamp);
        self.orig_timestamp = self.timestamp;
        self.upgrade_priority(make_priority(user_priority).max(upgrade_priority));
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "\"{}\" {{id={} key={} pri={} iso={} stat={} epo={} ts={} orig={} max={}}}",
            self.name,
            self.id,
            self.key,
            self.priority,
            self.isolation,
            self.status,
            self.epoch,
            self.timestamp,
            self.orig_timestamp,
            self.max_timestamp,
        )
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)?;
        if let Some(hb) = self.last_heartbeat {
            write!(f, " hb={hb}")?;
        }
        Ok(())
    }
}

/// Draws a random priority biased by `user_priority`.
///
/// A negative user priority selects the explicit priority `-user_priority`.
/// Otherwise higher user priorities map to proportionally narrower bands at
/// the top of the positive `i32` range: a user priority of 10 lands in the top
/// nine tenths, 100 in the top 99 hundredths, and so on.
pub fn make_priority(user_priority: i32) -> i32 {
    if user_priority < 0 {
        return user_priority.saturating_neg();
    }
    let user_priority = user_priority.max(1);
    let band = (i32::MAX / user_priority).max(1);
    i32::MAX - rand::thread_rng().gen_range(0..band)
}
