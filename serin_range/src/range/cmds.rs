//! Application of admitted commands to the engine.

use serin_metrics::TXN_PUSH_TOTAL;
use serin_storage::MvccStats;
use serin_txn::record::{self, PushArgs};
use serin_txn::{Transaction, TxnError};

use super::Range;
use crate::command::{Command, Method, Request, RequestHeader, Response, ResponseBody, ResponseHeader};
use crate::error::{RangeError, Result};

impl Range {
    /// Runs an admitted, timestamped command against the engine, adding the
    /// size deltas of its writes to `ms`.
    pub(super) async fn apply(&self, req: &Request, ms: &mut MvccStats) -> Result<Response> {
        let h = &req.header;
        let ts = h.timestamp;
        let txn = h.txn.as_ref();
        let engine = &*self.engine;

        let body = match &req.cmd {
            Command::Get => ResponseBody::Get { value: engine.get(&h.key, ts, txn).await? },
            Command::Put { value } => {
                engine.put(ms, &h.key, ts, value.clone(), txn).await?;
                ResponseBody::Put
            }
            Command::ConditionalPut { value, expected } => {
                engine.conditional_put(ms, &h.key, ts, value.clone(), expected.as_ref(), txn).await?;
                ResponseBody::ConditionalPut
            }
            Command::Increment { increment } => {
                ResponseBody::Increment { new_value: engine.increment(ms, &h.key, ts, *increment, txn).await? }
            }
            Command::Delete => {
                engine.delete(ms, &h.key, ts, txn).await?;
                ResponseBody::Delete
            }
            Command::DeleteRange { max_entries } => {
                let num_deleted = engine.delete_range(ms, &h.key_span(), *max_entries, ts, txn).await?;
                ResponseBody::DeleteRange { num_deleted }
            }
            Command::Scan { max_results } => {
                let limit = match (*max_results, self.config.max_scan_results) {
                    (0, cap) => cap,
                    (n, 0) => n,
                    (n, cap) => n.min(cap),
                };
                ResponseBody::Scan { rows: engine.scan(&h.key_span(), limit, ts, txn).await? }
            }
            Command::Merge { value } => {
                engine.merge(ms, &h.key, value.clone()).await?;
                ResponseBody::Merge
            }
            Command::ResolveIntent => {
                let txn = require_txn(h, Method::ResolveIntent)?;
                engine.resolve_intent(ms, &h.key_span(), txn).await?;
                ResponseBody::ResolveIntent
            }
            Command::EndTransaction { commit } => return self.end_transaction(h, *commit).await,
            Command::Heartbeat => return self.heartbeat(h).await,
            Command::PushTransaction { pushee, abort } => return self.push_transaction(h, pushee, *abort).await,
        };
        Ok(Response { header: ResponseHeader { timestamp: ts, txn: h.txn.clone() }, body })
    }

    async fn end_transaction(&self, h: &RequestHeader, commit: bool) -> Result<Response> {
        let txn = require_txn(h, Method::EndTransaction)?;
        let existing = self.engine.get_txn_record(txn.id).await?;
        let record = record::end_transaction(existing, txn, h.timestamp, commit)?;
        self.engine.put_txn_record(&record).await?;
        Ok(Response {
            header: ResponseHeader { timestamp: record.timestamp, txn: Some(record) },
            body: ResponseBody::EndTransaction,
        })
    }

    async fn heartbeat(&self, h: &RequestHeader) -> Result<Response> {
        let txn = require_txn(h, Method::Heartbeat)?;
        let existing = self.engine.get_txn_record(txn.id).await?;
        let update = record::heartbeat(existing, txn, h.timestamp);
        if update.persist {
            self.engine.put_txn_record(&update.txn).await?;
        }
        Ok(Response {
            header: ResponseHeader { timestamp: h.timestamp, txn: Some(update.txn) },
            body: ResponseBody::Heartbeat,
        })
    }

    /// Pushes `pushee` on behalf of the request's transaction, or of a
    /// non-transactional request at the header's timestamp and priority.
    async fn push_transaction(&self, h: &RequestHeader, pushee: &Transaction, abort: bool) -> Result<Response> {
        let existing = self.engine.get_txn_record(pushee.id).await?;
        let args = PushArgs { pusher: h.txn.as_ref(), pushee, timestamp: h.timestamp, user_priority: h.user_priority, abort };
        let update = match record::push_transaction(existing, args, self.clock.now(), self.config.heartbeat_interval()) {
            Ok(update) => update,
            Err(e) => {
                let outcome = if matches!(e, TxnError::PushConflict { .. }) { "conflict" } else { "error" };
                TXN_PUSH_TOTAL.with_label_values(&[outcome]).inc();
                return Err(e.into());
            }
        };
        TXN_PUSH_TOTAL.with_label_values(&[if update.persist { "pushed" } else { "noop" }]).inc();
        if update.persist {
            self.engine.put_txn_record(&update.txn).await?;
        }
        Ok(Response {
            header: ResponseHeader { timestamp: h.timestamp, txn: h.txn.clone() },
            body: ResponseBody::PushTransaction { pushee: update.txn },
        })
    }
}

fn require_txn(h: &RequestHeader, method: Method) -> Result<&Transaction> {
    h.txn.as_ref().ok_or(RangeError::MissingTransaction(method))
}
