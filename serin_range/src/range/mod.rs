//! The range replica: admits, orders, timestamps and applies commands.

mod cmds;
#[cfg(test)]
mod tests;

use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

use serin_meta::{Gossip, KEY_FIRST_RANGE};
use serin_metrics::{CMD_QUEUE_WAIT_SECS, COMMANDS_TOTAL, TS_CACHE_PUSHES_TOTAL};
use serin_raft::{LogEntry, Proposer};
use serin_storage::{MvccEngine, MvccStats};
use serin_txn::{Clock, IsolationLevel, KeySpan, Timestamp, KEY_MIN};

use crate::cmd_queue::{CmdHandle, CommandQueue};
use crate::command::{Command, Request, RequestHeader, Response};
use crate::config::{ConfigFamily, RangeConfig, CONFIG_FAMILIES};
use crate::error::{RangeError, Result};
use crate::resp_cache::ResponseCache;
use crate::ts_cache::TimestampCache;
use crate::RangeDescriptor;

/// One replica of a contiguous span of the keyspace.
///
/// All coordination between concurrent commands goes through the command
/// queue and the timestamp cache. Both sit behind short, non-async critical
/// sections; commands only ever suspend waiting for their prerequisites, for
/// the proposal, or inside the engine.
pub struct Range {
    desc: RangeDescriptor,
    config: RangeConfig,
    clock: Arc<Clock>,
    engine: Arc<dyn MvccEngine>,
    proposer: Arc<dyn Proposer>,
    gossip: Option<Arc<dyn Gossip>>,
    cmd_queue: Mutex<CommandQueue>,
    ts_cache: Mutex<TimestampCache>,
    resp_cache: Mutex<ResponseCache>,
    stats: Mutex<MvccStats>,
}

/// Keeps a command registered in the queue until dropped.
struct CmdGuard<'a> {
    queue: &'a Mutex<CommandQueue>,
    handle: CmdHandle,
}

impl Drop for CmdGuard<'_> {
    fn drop(&mut self) {
        self.queue.lock().remove(&self.handle);
    }
}

impl Range {
    /// Creates a replica of `desc` storing into `engine` and ordering
    /// commands through `proposer`.
    ///
    /// The timestamp cache starts with a low water mark one maximum clock
    /// offset ahead of the clock, since reads served by a previous holder of
    /// the range are unknown.
    pub fn new(
        desc: RangeDescriptor,
        config: RangeConfig,
        clock: Arc<Clock>,
        engine: Arc<dyn MvccEngine>,
        proposer: Arc<dyn Proposer>,
    ) -> Self {
        let low_water = clock.now().add_nanos(clock.max_offset().as_nanos() as i64);
        let ts_cache = TimestampCache::new(low_water, config.ts_cache_max_entries, config.ts_cache_min_window());
        Self {
            desc,
            config,
            clock,
            engine,
            proposer,
            gossip: None,
            cmd_queue: Mutex::new(CommandQueue::new()),
            ts_cache: Mutex::new(ts_cache),
            resp_cache: Mutex::new(ResponseCache::default()),
            stats: Mutex::new(MvccStats::default()),
        }
    }

    /// Publishes the first range descriptor and config maps through `gossip`.
    pub fn with_gossip(mut self, gossip: Arc<dyn Gossip>) -> Self {
        self.gossip = Some(gossip);
        self
    }

    /// The range's boundaries.
    pub fn desc(&self) -> &RangeDescriptor {
        &self.desc
    }

    /// The range's tuning.
    pub fn config(&self) -> &RangeConfig {
        &self.config
    }

    /// Running totals of the range's stored data.
    pub fn stats(&self) -> MvccStats {
        *self.stats.lock()
    }

    /// Total bytes stored in the range.
    pub fn size(&self) -> i64 {
        self.stats.lock().total_bytes()
    }

    /// Gossips what this range is responsible for publishing: the first
    /// range's descriptor if this is it, and the config maps it holds.
    pub async fn start(&self) {
        if let (Some(gossip), true) = (&self.gossip, self.desc.start_key == KEY_MIN) {
            match serde_json::to_value(&self.desc) {
                Ok(v) => gossip.add_info(KEY_FIRST_RANGE, v),
                Err(e) => warn!(error = %e, "failed to encode first range descriptor"),
            }
        }
        for family in &CONFIG_FAMILIES {
            self.gossip_config_family(family).await;
        }
    }

    /// Executes `req` and returns its response.
    ///
    /// Commands over overlapping spans run one at a time in arrival order,
    /// unless all of them are reads. Failed commands leave the timestamp and
    /// response caches untouched.
    #[instrument(skip_all, fields(range_id = self.desc.range_id, method = %req.method()))]
    pub async fn execute(&self, req: Request) -> Result<Response> {
        let method = req.method();
        let res = self.execute_cmd(req).await;
        let outcome = match &res {
            Ok((_, true)) => "replayed",
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        COMMANDS_TOTAL.with_label_values(&[method.as_str(), outcome]).inc();
        if let Err(e) = &res {
            debug!(error = %e, "command failed");
        }
        res.map(|(resp, _)| resp)
    }

    /// Returns the response and whether it was replayed from the response
    /// cache.
    async fn execute_cmd(&self, mut req: Request) -> Result<(Response, bool)> {
        let header = &req.header;
        if !header.end_key.is_empty() && header.end_key <= header.key {
            return Err(RangeError::InvalidSpan { key: header.key.clone(), end_key: header.end_key.clone() });
        }
        let span = header.key_span();
        if !self.desc.contains_span(&span) {
            return Err(RangeError::OutOfRange { span, desc: Box::new(self.desc.clone()) });
        }
        check_record_key(&req)?;
        self.assign_timestamp(&mut req.header);

        let method = req.method();
        let read_only = method.is_read_only();
        let _guard = self.admit(span.clone(), read_only).await;

        if !read_only {
            let cached = self.resp_cache.lock().get(&req.header.cmd_id);
            if let Some(resp) = cached {
                debug!(cmd_id = ?req.header.cmd_id, "replaying cached response");
                return Ok((resp, true));
            }
        }
        if method.uses_ts_cache() && !read_only {
            self.apply_ts_cache(&span, &mut req.header)?;
        }
        if !read_only {
            let entry = LogEntry(serde_json::to_vec(&req)?);
            self.proposer.propose(self.desc.range_id, entry).await?;
        }

        let mut ms = MvccStats::default();
        let res = self.apply(&req, &mut ms).await;
        *self.stats.lock() += ms;
        let resp = res?;

        if method.uses_ts_cache() {
            let txn_id = req.header.txn.as_ref().map(|t| t.id);
            self.ts_cache.lock().add(&span, resp.header.timestamp, txn_id, read_only);
        }
        if !read_only {
            let horizon = self.clock.physical_now() - self.config.resp_cache_retention().as_nanos() as i64;
            let dropped = {
                let mut resp_cache = self.resp_cache.lock();
                resp_cache.put(req.header.cmd_id, &resp);
                resp_cache.gc(horizon)
            };
            if dropped > 0 {
                debug!(dropped, "expired cached responses");
            }
            for family in CONFIG_FAMILIES.iter().filter(|f| f.span().overlaps(&span)) {
                self.gossip_config_family(family).await;
            }
        }
        Ok((resp, false))
    }

    /// Requests without a timestamp execute at their transaction's timestamp,
    /// or at the current time. The clock absorbs whatever the request carries.
    fn assign_timestamp(&self, header: &mut RequestHeader) {
        if header.timestamp.is_zero() {
            header.timestamp = match &header.txn {
                Some(txn) => txn.timestamp,
                None => self.clock.now(),
            };
        }
        self.clock.update(header.timestamp);
    }

    async fn admit(&self, span: KeySpan, read_only: bool) -> CmdGuard<'_> {
        let (handle, prereqs) = self.cmd_queue.lock().add(span, read_only);
        let guard = CmdGuard { queue: &self.cmd_queue, handle };
        if !prereqs.is_empty() {
            let timer = CMD_QUEUE_WAIT_SECS.start_timer();
            prereqs.wait().await;
            timer.observe_duration();
        }
        guard
    }

    /// Moves a write's timestamp past every earlier read and write of its
    /// span by others.
    ///
    /// Non-transactional writes are simply moved. A transaction cannot write
    /// below a newer write and gets `WriteTooOld`. Below a newer read, a
    /// SNAPSHOT transaction is moved forward while a SERIALIZABLE one gets
    /// `ReadTimestampConflict` carrying its pushed timestamp.
    fn apply_ts_cache(&self, span: &KeySpan, header: &mut RequestHeader) -> Result<()> {
        let txn_id = header.txn.as_ref().map(|t| t.id);
        let (read, write) = self.ts_cache.lock().get_max(span, txn_id);
        let ts = header.timestamp;
        match header.txn.as_mut() {
            None => {
                let max = read.max(write);
                if ts <= max {
                    header.timestamp = max.next();
                    self.clock.update(header.timestamp);
                    TS_CACHE_PUSHES_TOTAL.inc();
                    debug!(from = %ts, to = %header.timestamp, "timestamp pushed by timestamp cache");
                }
            }
            Some(txn) => {
                if ts <= write {
                    return Err(RangeError::WriteTooOld { timestamp: ts, existing: write });
                }
                if ts <= read {
                    let pushed = read.next();
                    TS_CACHE_PUSHES_TOTAL.inc();
                    txn.timestamp.forward(pushed);
                    if txn.isolation == IsolationLevel::Serializable {
                        return Err(RangeError::ReadTimestampConflict { txn: Box::new(txn.clone()), existing: read });
                    }
                    header.timestamp = pushed;
                    debug!(from = %ts, to = %pushed, "snapshot txn pushed by timestamp cache");
                }
            }
        }
        Ok(())
    }

    /// Scans a config family and gossips its prefix map. Families this range
    /// holds no configs for are skipped.
    async fn gossip_config_family(&self, family: &ConfigFamily) {
        let Some(gossip) = &self.gossip else { return };
        let span = family.span();
        if !self.desc.span().overlaps(&span) {
            return;
        }
        let rows = match self.engine.scan(&span, 0, Timestamp::MAX, None).await {
            Ok(rows) if rows.is_empty() => return,
            Ok(rows) => rows,
            Err(e) => {
                warn!(error = %e, key = family.gossip_key, "failed to scan config family");
                return;
            }
        };
        match family.build_map(&rows) {
            Ok(map) => gossip.add_info(family.gossip_key, map),
            Err(e) => warn!(error = %e, key = family.gossip_key, "failed to build config map"),
        }
    }
}

/// Commands that read or rewrite a transaction record must be addressed to
/// the record's anchor key, so the command queue serializes them.
fn check_record_key(req: &Request) -> Result<()> {
    let txn_key = match (&req.cmd, &req.header.txn) {
        (Command::PushTransaction { pushee, .. }, _) => &pushee.key,
        (Command::Heartbeat | Command::EndTransaction { .. }, Some(txn)) => &txn.key,
        _ => return Ok(()),
    };
    if &req.header.key != txn_key {
        return Err(RangeError::KeyAddressingMismatch { key: req.header.key.clone(), txn_key: txn_key.clone() });
    }
    Ok(())
}
