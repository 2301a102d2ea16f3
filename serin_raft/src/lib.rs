//! Consensus seam for SerinDB ranges.
//!
//! A range proposes every read-write command and applies it only once the
//! proposal returns, i.e. once the command holds a durable position in the
//! range's log. [`LocalProposer`] orders proposals for a single replica.
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Identifies a range's replication group.
pub type RangeId = u64;

/// Opaque command payload appended to a range's log.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct LogEntry(pub Vec<u8>);

/// Consensus failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConsensusError {
    /// The log has been shut down.
    #[error("range {0}: log stopped")]
    Stopped(RangeId),
}

/// Result type alias for consensus operations.
pub type Result<T> = std::result::Result<T, ConsensusError>;

/// Proposes entries and waits for their durable order.
#[async_trait]
pub trait Proposer: Send + Sync {
    /// Appends `entry` to the log of `range_id`, returning its log index once
    /// the entry is durably ordered.
    async fn propose(&self, range_id: RangeId, entry: LogEntry) -> Result<u64>;
}

/// Single-replica log kept in memory.
#[derive(Debug, Default)]
pub struct LocalProposer {
    state: Mutex<LocalLog>,
}

#[derive(Debug, Default)]
struct LocalLog {
    entries: Vec<(RangeId, LogEntry)>,
    stopped: bool,
}

impl LocalProposer {
    /// Creates an empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects all further proposals.
    pub fn stop(&self) {
        self.state.lock().stopped = true;
    }

    /// Number of entries ordered so far.
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// True if nothing has been proposed.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the ordered entries.
    pub fn entries(&self) -> Vec<(RangeId, LogEntry)> {
        self.state.lock().entries.clone()
    }
}

#[async_trait]
impl Proposer for LocalProposer {
    async fn propose(&self, range_id: RangeId, entry: LogEntry) -> Result<u64> {
        let mut log = self.state.lock();
        if log.stopped {
            return Err(ConsensusError::Stopped(range_id));
        }
        log.entries.push((range_id, entry));
        let index = log.entries.len() as u64;
        trace!(range_id, index, "entry ordered");
        Ok(index)
    }
}
