//! Commands a range executes and the responses they produce.

use serde::{Deserialize, Serialize};
use std::fmt;

use serin_storage::Value;
use serin_txn::{Key, KeySpan, Timestamp, Transaction};

use crate::resp_cache::ClientCmdId;

/// Fields common to every request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestHeader {
    /// First key addressed.
    pub key: Key,
    /// Exclusive end of the addressed span; empty for single-key commands.
    pub end_key: Key,
    /// Execution timestamp; zero lets the range assign one.
    pub timestamp: Timestamp,
    /// Replay protection id; zero disables it.
    pub cmd_id: ClientCmdId,
    /// Enclosing transaction, if any.
    pub txn: Option<Transaction>,
    /// Priority hint for non-transactional pushes.
    pub user_priority: i32,
}

impl RequestHeader {
    /// Header addressing the single key `key`.
    pub fn new(key: impl Into<Key>) -> Self {
        Self { key: key.into(), ..Default::default() }
    }

    /// Header addressing `[key, end_key)`.
    pub fn span(key: impl Into<Key>, end_key: impl Into<Key>) -> Self {
        Self { key: key.into(), end_key: end_key.into(), ..Default::default() }
    }

    /// Sets the timestamp.
    pub fn at(mut self, timestamp: Timestamp) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Sets the transaction.
    pub fn with_txn(mut self, txn: Transaction) -> Self {
        self.txn = Some(txn);
        self
    }

    /// Sets the client command id.
    pub fn with_cmd_id(mut self, cmd_id: ClientCmdId) -> Self {
        self.cmd_id = cmd_id;
        self
    }

    /// The key span the request covers.
    pub fn key_span(&self) -> KeySpan {
        KeySpan::from_bounds(&self.key, &self.end_key)
    }
}

/// Operation-specific request arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Command {
    /// Reads a key.
    Get,
    /// Writes a key.
    Put {
        /// New value.
        value: Value,
    },
    /// Writes a key if its current value matches.
    ConditionalPut {
        /// New value.
        value: Value,
        /// Required current value; `None` requires the key to be absent.
        expected: Option<Value>,
    },
    /// Adds to an integer key.
    Increment {
        /// Amount added.
        increment: i64,
    },
    /// Deletes a key.
    Delete,
    /// Deletes the live keys of a span.
    DeleteRange {
        /// Upper bound on deletions; 0 is unbounded.
        max_entries: usize,
    },
    /// Reads the live keys of a span.
    Scan {
        /// Upper bound on rows; 0 uses the range's limit.
        max_results: usize,
    },
    /// Combines a value into an unversioned key.
    Merge {
        /// Operand.
        value: Value,
    },
    /// Commits or aborts the header's transaction.
    EndTransaction {
        /// Commit rather than abort.
        commit: bool,
    },
    /// Records the header's transaction as alive.
    Heartbeat,
    /// Pushes a conflicting transaction; the header's key must be the
    /// pushee's anchor key.
    PushTransaction {
        /// Transaction being pushed.
        pushee: Transaction,
        /// Abort rather than only move the pushee's timestamp.
        abort: bool,
    },
    /// Resolves the header's transaction's intents within the header's span.
    ResolveIntent,
}

impl Command {
    /// The method tag of this command.
    pub fn method(&self) -> Method {
        match self {
            Command::Get => Method::Get,
            Command::Put { .. } => Method::Put,
            Command::ConditionalPut { .. } => Method::ConditionalPut,
            Command::Increment { .. } => Method::Increment,
            Command::Delete => Method::Delete,
            Command::DeleteRange { .. } => Method::DeleteRange,
            Command::Scan { .. } => Method::Scan,
            Command::Merge { .. } => Method::Merge,
            Command::EndTransaction { .. } => Method::EndTransaction,
            Command::Heartbeat => Method::Heartbeat,
            Command::PushTransaction { .. } => Method::PushTransaction,
            Command::ResolveIntent => Method::ResolveIntent,
        }
    }
}

/// A command addressed to a range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    /// Addressing, timing and transaction context.
    pub header: RequestHeader,
    /// What to do.
    pub cmd: Command,
}

impl Request {
    /// Pairs a header with a command.
    pub fn new(header: RequestHeader, cmd: Command) -> Self {
        Self { header, cmd }
    }

    /// The method tag of the command.
    pub fn method(&self) -> Method {
        self.cmd.method()
    }
}

/// Command kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Method {
    Get,
    Put,
    ConditionalPut,
    Increment,
    Delete,
    DeleteRange,
    Scan,
    Merge,
    EndTransaction,
    Heartbeat,
    PushTransaction,
    ResolveIntent,
}

impl Method {
    /// Name used in logs and metric labels.
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "Get",
            Method::Put => "Put",
            Method::ConditionalPut => "ConditionalPut",
            Method::Increment => "Increment",
            Method::Delete => "Delete",
            Method::DeleteRange => "DeleteRange",
            Method::Scan => "Scan",
            Method::Merge => "Merge",
            Method::EndTransaction => "EndTransaction",
            Method::Heartbeat => "Heartbeat",
            Method::PushTransaction => "PushTransaction",
            Method::ResolveIntent => "ResolveIntent",
        }
    }

    /// Read-only commands share the command queue with each other and are
    /// served without a proposal.
    pub fn is_read_only(self) -> bool {
        matches!(self, Method::Get | Method::Scan)
    }

    /// Commands whose timestamps are checked against, and recorded in, the
    /// timestamp cache.
    pub fn uses_ts_cache(self) -> bool {
        matches!(
            self,
            Method::Get
                | Method::Scan
                | Method::Put
                | Method::ConditionalPut
                | Method::Increment
                | Method::Delete
                | Method::DeleteRange
        )
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fields common to every response.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseHeader {
    /// Timestamp the command executed at, after any push.
    pub timestamp: Timestamp,
    /// The transaction as updated by the command.
    pub txn: Option<Transaction>,
}

/// Operation-specific response payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ResponseBody {
    /// Value read, if any.
    Get {
        value: Option<Value>,
    },
    Put,
    ConditionalPut,
    /// Counter after the increment.
    Increment {
        new_value: i64,
    },
    Delete,
    /// Number of keys deleted.
    DeleteRange {
        num_deleted: u64,
    },
    /// Rows read, in key order.
    Scan {
        rows: Vec<(Key, Value)>,
    },
    Merge,
    /// The final record is in the header's transaction.
    EndTransaction,
    /// The updated record is in the header's transaction.
    Heartbeat,
    /// The pushee's record after the push.
    PushTransaction {
        pushee: Transaction,
    },
    ResolveIntent,
}

/// Result of a successful command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Timing and transaction state.
    pub header: ResponseHeader,
    /// Payload.
    pub body: ResponseBody,
}

impl Response {
    /// The value of a Get response.
    pub fn value(&self) -> Option<&Value> {
        match &self.body {
            ResponseBody::Get { value } => value.as_ref(),
            _ => None,
        }
    }

    /// The counter of an Increment response.
    pub fn new_value(&self) -> Option<i64> {
        match self.body {
            ResponseBody::Increment { new_value } => Some(new_value),
            _ => None,
        }
    }

    /// The pushee of a PushTransaction response.
    pub fn pushee(&self) -> Option<&Transaction> {
        match &self.body {
            ResponseBody::PushTransaction { pushee } => Some(pushee),
            _ => None,
        }
    }
}
