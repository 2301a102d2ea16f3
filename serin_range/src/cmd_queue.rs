//! Admission queue ordering overlapping commands on a range.
//!
//! Every command registers its key span before executing. A command waits for
//! each command registered before it whose span overlaps its own, unless both
//! are read-only. Prerequisites are fixed at registration, so a waiting command
//! is never overtaken by commands registered after it.

use tokio::sync::watch;

use serin_txn::{Key, KeySpan};

use crate::interval::IntervalMap;

struct Cmd {
    read_only: bool,
    /// Dropped on removal, which wakes every waiter.
    done: watch::Sender<()>,
}

/// Identifies a registered command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CmdHandle {
    start: Key,
    id: u64,
}

/// Commands an admitted command must outlive.
#[derive(Debug, Default)]
pub struct Prerequisites(Vec<watch::Receiver<()>>);

impl Prerequisites {
    /// Number of commands to wait for.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if the command may run immediately.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolves once every prerequisite has been removed from the queue.
    pub async fn wait(self) {
        for mut rx in self.0 {
            // Nothing is ever sent; `changed` errors once the sender is dropped.
            while rx.changed().await.is_ok() {}
        }
    }
}

/// Live commands indexed by their key spans.
#[derive(Default)]
pub struct CommandQueue {
    cmds: IntervalMap<Cmd>,
    next_id: u64,
}

impl CommandQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Live commands that a new command over `span` would have to wait for.
    pub fn get_wait(&self, span: &KeySpan, read_only: bool) -> Prerequisites {
        let waits = self
            .cmds
            .overlapping(span)
            .into_iter()
            .filter(|iv| !(read_only && iv.value.read_only))
            .map(|iv| iv.value.done.subscribe())
            .collect();
        Prerequisites(waits)
    }

    /// Registers a command over `span` and returns its handle along with the
    /// commands it must wait for.
    pub fn add(&mut self, span: KeySpan, read_only: bool) -> (CmdHandle, Prerequisites) {
        let prereqs = self.get_wait(&span, read_only);
        let id = self.next_id;
        self.next_id += 1;
        let (done, _) = watch::channel(());
        self.cmds.insert(span.start.clone(), id, span.end, Cmd { read_only, done });
        (CmdHandle { start: span.start, id }, prereqs)
    }

    /// Deregisters a command, releasing every command waiting on it.
    pub fn remove(&mut self, handle: &CmdHandle) {
        self.cmds.remove(&handle.start, handle.id);
    }

    /// Number of live commands.
    pub fn len(&self) -> usize {
        self.cmds.len()
    }

    /// True if no command is live.
    pub fn is_empty(&self) -> bool {
        self.cmds.is_empty()
    }
}
