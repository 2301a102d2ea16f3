use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::time::timeout;

use serin_meta::{InfoStore, KEY_CONFIG_ACCOUNTING, KEY_FIRST_RANGE};
use serin_raft::{ConsensusError, LocalProposer};
use serin_storage::{MemEngine, MvccEngine, MvccStats, StorageError, Value};
use serin_txn::{
    Clock, IsolationLevel, Key, KeySpan, ManualClock, Timestamp, Transaction, TxnError, TxnId, TxnStatus, KEY_MIN,
};

use super::Range;
use crate::command::{Command, Method, Request, RequestHeader, Response, ResponseBody};
use crate::config::{AcctConfig, PrefixConfigMap, RangeConfig, KEY_CONFIG_ACCOUNTING_PREFIX};
use crate::error::RangeError;
use crate::resp_cache::ClientCmdId;
use crate::RangeDescriptor;

/// Heartbeat interval of test ranges, in nanoseconds.
const HEARTBEAT_NANOS: i64 = 1_000_000;
const WAIT: Duration = Duration::from_millis(500);

struct TestRange {
    range: Arc<Range>,
    manual: ManualClock,
    clock: Arc<Clock>,
    proposer: Arc<LocalProposer>,
    gossip: Arc<InfoStore>,
}

fn build(desc: RangeDescriptor, engine: Arc<dyn MvccEngine>) -> TestRange {
    let manual = ManualClock::new(0);
    let clock = Arc::new(Clock::new(manual.clone(), Duration::ZERO));
    let proposer = Arc::new(LocalProposer::new());
    let gossip = Arc::new(InfoStore::new());
    let config = RangeConfig { heartbeat_interval_ms: 1, ..Default::default() };
    let range = Range::new(desc, config, clock.clone(), engine, proposer.clone()).with_gossip(gossip.clone());
    TestRange { range: Arc::new(range), manual, clock, proposer, gossip }
}

fn setup_with(engine: Arc<dyn MvccEngine>) -> TestRange {
    build(RangeDescriptor::new(1, KEY_MIN, Key::max()), engine)
}

fn setup() -> (TestRange, MemEngine) {
    let engine = MemEngine::new();
    (setup_with(Arc::new(engine.clone())), engine)
}

fn req(header: RequestHeader, cmd: Command) -> Request {
    Request::new(header, cmd)
}

fn get(key: &str) -> Request {
    req(RequestHeader::new(key), Command::Get)
}

fn put(key: &str, value: &str) -> Request {
    req(RequestHeader::new(key), Command::Put { value: value.into() })
}

fn new_txn(tr: &TestRange, key: &str, priority: i32, isolation: IsolationLevel) -> Transaction {
    Transaction::new("test", key, -priority, isolation, tr.clock.now(), Duration::ZERO)
}

fn txn_req(txn: &Transaction, cmd: Command) -> Request {
    req(RequestHeader::new(txn.key.clone()).with_txn(txn.clone()), cmd)
}

fn push_req(pusher: &Transaction, pushee: &Transaction, abort: bool) -> Request {
    let header = RequestHeader::new(pushee.key.clone()).at(pusher.timestamp).with_txn(pusher.clone());
    req(header, Command::PushTransaction { pushee: pushee.clone(), abort })
}

async fn value_of(tr: &TestRange, key: &str) -> Option<Value> {
    tr.range.execute(get(key)).await.unwrap().value().cloned()
}

/// Delegates to a [`MemEngine`], parking the first `get` or `put` of a primed
/// key until released.
struct BlockingEngine {
    inner: MemEngine,
    primed: parking_lot::Mutex<Option<Key>>,
    released: watch::Sender<bool>,
    entered: Notify,
}

impl BlockingEngine {
    fn new() -> Self {
        let (released, _) = watch::channel(false);
        Self { inner: MemEngine::new(), primed: parking_lot::Mutex::new(None), released, entered: Notify::new() }
    }

    fn block(&self, key: &str) {
        self.released.send_replace(false);
        *self.primed.lock() = Some(key.into());
    }

    fn unblock(&self) {
        self.released.send_replace(true);
    }

    async fn park(&self, key: &Key) {
        let hit = {
            let mut primed = self.primed.lock();
            if primed.as_ref() == Some(key) {
                *primed = None;
                true
            } else {
                false
            }
        };
        if hit {
            self.entered.notify_one();
            let mut rx = self.released.subscribe();
            let _ = rx.wait_for(|released| *released).await;
        }
    }
}

#[async_trait::async_trait]
impl MvccEngine for BlockingEngine {
    async fn get(&self, key: &Key, ts: Timestamp, txn: Option<&Transaction>) -> serin_storage::Result<Option<Value>> {
        self.park(key).await;
        self.inner.get(key, ts, txn).await
    }

    async fn scan(
        &self,
        span: &KeySpan,
        max: usize,
        ts: Timestamp,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<Vec<(Key, Value)>> {
        self.inner.scan(span, max, ts, txn).await
    }

    async fn put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        ts: Timestamp,
        value: Value,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<()> {
        self.park(key).await;
        self.inner.put(ms, key, ts, value, txn).await
    }

    async fn conditional_put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        ts: Timestamp,
        value: Value,
        expected: Option<&Value>,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<()> {
        self.inner.conditional_put(ms, key, ts, value, expected, txn).await
    }

    async fn increment(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        ts: Timestamp,
        inc: i64,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<i64> {
        self.inner.increment(ms, key, ts, inc, txn).await
    }

    async fn delete(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        ts: Timestamp,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<()> {
        self.inner.delete(ms, key, ts, txn).await
    }

    async fn delete_range(
        &self,
        ms: &mut MvccStats,
        span: &KeySpan,
        max: usize,
        ts: Timestamp,
        txn: Option<&Transaction>,
    ) -> serin_storage::Result<u64> {
        self.inner.delete_range(ms, span, max, ts, txn).await
    }

    async fn merge(&self, ms: &mut MvccStats, key: &Key, value: Value) -> serin_storage::Result<()> {
        self.inner.merge(ms, key, value).await
    }

    async fn resolve_intent(&self, ms: &mut MvccStats, span: &KeySpan, txn: &Transaction) -> serin_storage::Result<()> {
        self.inner.resolve_intent(ms, span, txn).await
    }

    async fn get_txn_record(&self, id: TxnId) -> serin_storage::Result<Option<Transaction>> {
        self.inner.get_txn_record(id).await
    }

    async fn put_txn_record(&self, txn: &Transaction) -> serin_storage::Result<()> {
        self.inner.put_txn_record(txn).await
    }
}

/// Fails every call.
struct FailingEngine;

fn injected<T>() -> serin_storage::Result<T> {
    Err(StorageError::Backend("injected failure".into()))
}

#[async_trait::async_trait]
impl MvccEngine for FailingEngine {
    async fn get(&self, _: &Key, _: Timestamp, _: Option<&Transaction>) -> serin_storage::Result<Option<Value>> {
        injected()
    }

    async fn scan(
        &self,
        _: &KeySpan,
        _: usize,
        _: Timestamp,
        _: Option<&Transaction>,
    ) -> serin_storage::Result<Vec<(Key, Value)>> {
        injected()
    }

    async fn put(
        &self,
        _: &mut MvccStats,
        _: &Key,
        _: Timestamp,
        _: Value,
        _: Option<&Transaction>,
    ) -> serin_storage::Result<()> {
        injected()
    }

    async fn conditional_put(
        &self,
        _: &mut MvccStats,
        _: &Key,
        _: Timestamp,
        _: Value,
        _: Option<&Value>,
        _: Option<&Transaction>,
    ) -> serin_storage::Result<()> {
        injected()
    }

    async fn increment(
        &self,
        _: &mut MvccStats,
        _: &Key,
        _: Timestamp,
        _: i64,
        _: Option<&Transaction>,
    ) -> serin_storage::Result<i64> {
        injected()
    }

    async fn delete(&self, _: &mut MvccStats, _: &Key, _: Timestamp, _: Option<&Transaction>) -> serin_storage::Result<()> {
        injected()
    }

    async fn delete_range(
        &self,
        _: &mut MvccStats,
        _: &KeySpan,
        _: usize,
        _: Timestamp,
        _: Option<&Transaction>,
    ) -> serin_storage::Result<u64> {
        injected()
    }

    async fn merge(&self, _: &mut MvccStats, _: &Key, _: Value) -> serin_storage::Result<()> {
        injected()
    }

    async fn resolve_intent(&self, _: &mut MvccStats, _: &KeySpan, _: &Transaction) -> serin_storage::Result<()> {
        injected()
    }

    async fn get_txn_record(&self, _: TxnId) -> serin_storage::Result<Option<Transaction>> {
        injected()
    }

    async fn put_txn_record(&self, _: &Transaction) -> serin_storage::Result<()> {
        injected()
    }
}

#[tokio::test]
async fn read_updates_ts_cache() {
    let (tr, _) = setup();
    tr.manual.set(10);
    let resp = tr.range.execute(get("a")).await.unwrap();
    assert_eq!(resp.header.timestamp, Timestamp::new(10, 0));

    let tc = tr.range.ts_cache.lock();
    let low = tc.low_water();
    assert_eq!(tc.get_max(&KeySpan::point("a"), None), (resp.header.timestamp, low));
    assert_eq!(tc.get_max(&KeySpan::point("b"), None), (low, low));
}

#[tokio::test]
async fn write_below_read_is_pushed() {
    let (tr, _) = setup();
    tr.manual.set(10);
    let read = tr.range.execute(get("a")).await.unwrap().header.timestamp;

    let early = put("a", "v").header.at(Timestamp::new(5, 0));
    let resp = tr.range.execute(req(early, Command::Put { value: "v".into() })).await.unwrap();
    assert_eq!(resp.header.timestamp, read.next());

    let at_read = req(RequestHeader::new("a").at(read), Command::Get);
    assert_eq!(tr.range.execute(at_read).await.unwrap().value(), None);
    assert_eq!(value_of(&tr, "a").await, Some(Value::from("v")));

    // A write over a span covering the read is pushed too.
    let header = RequestHeader::span("", "b").at(Timestamp::new(5, 0));
    let resp = tr.range.execute(req(header, Command::DeleteRange { max_entries: 0 })).await.unwrap();
    assert!(resp.header.timestamp > read.next());
}

#[tokio::test]
async fn failed_commands_leave_ts_cache_alone() {
    let (tr, _) = setup();
    let txn = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
    tr.range.execute(txn_req(&txn, Command::Put { value: "x".into() })).await.unwrap();

    let err = tr.range.execute(get("a")).await.unwrap_err();
    assert!(matches!(err, RangeError::WriteIntent { .. }), "{err}");
    assert!(err.is_retriable());
    let err = tr.range.execute(put("a", "y")).await.unwrap_err();
    assert!(matches!(err, RangeError::WriteIntent { .. }), "{err}");

    let tc = tr.range.ts_cache.lock();
    let (read, write) = tc.get_max(&KeySpan::point("a"), None);
    assert_eq!(read, tc.low_water());
    assert_eq!(write, txn.timestamp);
}

#[tokio::test]
async fn own_reads_do_not_push_txn_writes() {
    let (tr, _) = setup();
    let txn = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
    tr.range.execute(txn_req(&txn, Command::Get)).await.unwrap();
    let resp = tr.range.execute(txn_req(&txn, Command::Put { value: "x".into() })).await.unwrap();
    assert_eq!(resp.header.timestamp, txn.timestamp);
    assert_eq!(resp.header.txn.unwrap().timestamp, txn.timestamp);

    let err = tr.range.execute(put("a", "y")).await.unwrap_err();
    assert!(matches!(err, RangeError::WriteIntent { .. }), "{err}");
}

#[tokio::test]
async fn txn_writes_below_others_reads_and_writes() {
    let (tr, _) = setup();
    let serializable = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
    let snapshot = new_txn(&tr, "b", 1, IsolationLevel::Snapshot);
    let writer = new_txn(&tr, "c", 1, IsolationLevel::Serializable);

    let read_a = tr.range.execute(get("a")).await.unwrap().header.timestamp;
    let read_b = tr.range.execute(get("b")).await.unwrap().header.timestamp;
    tr.range.execute(put("c", "v")).await.unwrap();

    let err = tr.range.execute(txn_req(&serializable, Command::Put { value: "x".into() })).await.unwrap_err();
    match err {
        RangeError::ReadTimestampConflict { txn, existing } => {
            assert_eq!(existing, read_a);
            assert_eq!(txn.timestamp, read_a.next());
        }
        other => panic!("unexpected error {other}"),
    }

    let resp = tr.range.execute(txn_req(&snapshot, Command::Put { value: "x".into() })).await.unwrap();
    assert_eq!(resp.header.timestamp, read_b.next());
    assert_eq!(resp.header.txn.unwrap().timestamp, read_b.next());

    let err = tr.range.execute(txn_req(&writer, Command::Put { value: "x".into() })).await.unwrap_err();
    assert!(matches!(err, RangeError::WriteTooOld { .. }), "{err}");
    assert!(err.is_retriable());
}

/// Starts `first` against a blocking engine primed on "a", then `second`, and
/// reports whether `second` finished while `first` was parked.
async fn second_runs_concurrently(first: Request, second: Request) -> bool {
    let engine = Arc::new(BlockingEngine::new());
    let tr = setup_with(engine.clone());
    engine.block("a");

    let range = tr.range.clone();
    let first = tokio::spawn(async move { range.execute(first).await });
    timeout(WAIT, engine.entered.notified()).await.unwrap();

    let range = tr.range.clone();
    let mut second = tokio::spawn(async move { range.execute(second).await });
    let concurrent = timeout(Duration::from_millis(50), &mut second).await.is_ok();

    engine.unblock();
    timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    if !concurrent {
        timeout(WAIT, second).await.unwrap().unwrap().unwrap();
    }
    assert!(tr.range.cmd_queue.lock().is_empty());
    concurrent
}

#[tokio::test]
async fn command_queue_orders_overlapping_commands() {
    assert!(second_runs_concurrently(get("a"), get("a")).await, "read/read");
    assert!(!second_runs_concurrently(get("a"), put("a", "v")).await, "read/write");
    assert!(!second_runs_concurrently(put("a", "v"), get("a")).await, "write/read");
    assert!(!second_runs_concurrently(put("a", "v"), put("a", "w")).await, "write/write");
}

#[tokio::test]
async fn command_queue_spans() {
    assert!(second_runs_concurrently(put("a", "v"), put("b", "w")).await, "disjoint keys");
    let scan = req(RequestHeader::span("", "b"), Command::Scan { max_results: 0 });
    assert!(!second_runs_concurrently(put("a", "v"), scan).await, "scan over a pending write");
    let scan = req(RequestHeader::span("b", "z"), Command::Scan { max_results: 0 });
    assert!(second_runs_concurrently(put("a", "v"), scan).await, "scan beside a pending write");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn duplicate_increments_apply_once() {
    let (tr, _) = setup();
    let dup = ClientCmdId::new(1, 1);
    let inc = |id: ClientCmdId| req(RequestHeader::new("k").with_cmd_id(id), Command::Increment { increment: 1 });

    let first = tr.range.execute(inc(dup)).await.unwrap();
    assert_eq!(first.new_value(), Some(1));

    let mut handles = Vec::new();
    for i in 0..99 {
        let range = tr.range.clone();
        let id = if i < 49 { dup } else { ClientCmdId::new(2, i) };
        let cmd = inc(id);
        handles.push(tokio::spawn(async move { (id, range.execute(cmd).await) }));
    }

    let mut distinct_sum = 0;
    for handle in handles {
        let (id, resp) = handle.await.unwrap();
        let resp = resp.unwrap();
        if id == dup {
            assert_eq!(resp, first);
        } else {
            distinct_sum += resp.new_value().unwrap();
        }
    }
    assert_eq!(distinct_sum, (2..=51).sum::<i64>());
    assert_eq!(value_of(&tr, "k").await, Some(Value::Integer(51)));
}

#[tokio::test]
async fn replay_skips_proposal_and_ts_cache() {
    let (tr, _) = setup();
    let id = ClientCmdId::new(7, 7);
    let cmd = req(RequestHeader::new("k").with_cmd_id(id), Command::Increment { increment: 5 });
    let first = tr.range.execute(cmd.clone()).await.unwrap();
    let proposed = tr.proposer.len();
    let ts_entries = tr.range.ts_cache.lock().len();

    let again = tr.range.execute(cmd).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(tr.proposer.len(), proposed);
    assert_eq!(tr.range.ts_cache.lock().len(), ts_entries);
    assert_eq!(tr.range.resp_cache.lock().len(), 1);

    tr.range.execute(get("k")).await.unwrap();
    assert_eq!(tr.proposer.len(), proposed, "reads are not proposed");
}

#[tokio::test]
async fn response_cache_forgets_expired_ids() {
    let (tr, _) = setup();
    let retention = tr.range.config().resp_cache_retention().as_nanos() as i64;
    let inc = |id| req(RequestHeader::new("n").with_cmd_id(id), Command::Increment { increment: 1 });
    let old = ClientCmdId::new(1, 1);
    tr.range.execute(inc(old)).await.unwrap();
    assert_eq!(tr.range.execute(inc(old)).await.unwrap().new_value(), Some(1));
    assert_eq!(tr.range.resp_cache.lock().len(), 1);

    tr.manual.set(retention + 2);
    let fresh = ClientCmdId::new(retention + 2, 2);
    assert_eq!(tr.range.execute(inc(fresh)).await.unwrap().new_value(), Some(2));
    assert_eq!(tr.range.resp_cache.lock().len(), 1);
    assert!(tr.range.resp_cache.lock().get(&old).is_none());

    assert_eq!(tr.range.execute(inc(old)).await.unwrap().new_value(), Some(3));
    assert_eq!(tr.range.execute(inc(fresh)).await.unwrap().new_value(), Some(2));
}

#[tokio::test]
async fn end_transaction_keeps_heartbeat() {
    for heartbeat in [false, true] {
        let (tr, _) = setup();
        let txn = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
        let hb_ts = Timestamp::new(txn.timestamp.wall_time + 10, 0);
        if heartbeat {
            let header = RequestHeader::new("a").at(hb_ts).with_txn(txn.clone());
            let resp = tr.range.execute(req(header, Command::Heartbeat)).await.unwrap();
            assert_eq!(resp.header.txn.unwrap().last_heartbeat, Some(hb_ts));
        }
        let resp = tr.range.execute(txn_req(&txn, Command::EndTransaction { commit: true })).await.unwrap();
        let record = resp.header.txn.unwrap();
        assert_eq!(record.status, TxnStatus::Committed);
        assert_eq!(record.timestamp, txn.timestamp);
        assert_eq!(record.last_heartbeat, heartbeat.then_some(hb_ts));
    }
}

#[tokio::test]
async fn end_transaction_after_push() {
    for isolation in [IsolationLevel::Serializable, IsolationLevel::Snapshot] {
        let (tr, _) = setup();
        let pushee = new_txn(&tr, "a", 1, isolation);
        let pusher = new_txn(&tr, "b", 2, IsolationLevel::Serializable);
        let pushed = tr.range.execute(push_req(&pusher, &pushee, false)).await.unwrap();
        assert_eq!(pushed.pushee().unwrap().timestamp, pusher.timestamp.next());

        let res = tr.range.execute(txn_req(&pushee, Command::EndTransaction { commit: true })).await;
        match isolation {
            IsolationLevel::Serializable => {
                let err = res.unwrap_err();
                assert!(matches!(err, RangeError::Txn(TxnError::Retry { .. })), "{err}");
                assert!(err.is_retriable());
            }
            IsolationLevel::Snapshot => {
                let record = res.unwrap().header.txn.unwrap();
                assert_eq!(record.status, TxnStatus::Committed);
                assert_eq!(record.timestamp, pusher.timestamp.next());
            }
        }
    }
}

#[tokio::test]
async fn end_transaction_with_incremented_epoch() {
    let (tr, _) = setup();
    let mut txn = new_txn(&tr, "a", 5, IsolationLevel::Serializable);
    tr.range.execute(txn_req(&txn, Command::Heartbeat)).await.unwrap();

    txn.epoch = 1;
    txn.priority += 1;
    let resp = tr.range.execute(txn_req(&txn, Command::EndTransaction { commit: true })).await.unwrap();
    let record = resp.header.txn.unwrap();
    assert_eq!(record.status, TxnStatus::Committed);
    assert_eq!(record.epoch, 1);
    assert_eq!(record.priority, 6);
}

#[tokio::test]
async fn end_transaction_errors() {
    let (tr, engine) = setup();
    let base = new_txn(&tr, "a", 1, IsolationLevel::Serializable);

    let mut committed = base.clone();
    committed.status = TxnStatus::Committed;
    let mut aborted = base.clone();
    aborted.status = TxnStatus::Aborted;
    let mut newer_epoch = base.clone();
    newer_epoch.epoch = 1;
    let mut behind = base.clone();
    behind.timestamp = Timestamp::MIN;

    let cases = [
        (committed, "already committed".to_string()),
        (aborted, "already aborted".to_string()),
        (newer_epoch, "epoch regression: 0".to_string()),
        (behind, format!("timestamp regression: {}", base.orig_timestamp)),
    ];
    for (mut existing, suffix) in cases {
        let mut txn = base.clone();
        txn.id = TxnId::random();
        existing.id = txn.id;
        engine.put_txn_record(&existing).await.unwrap();

        let err = tr.range.execute(txn_req(&txn, Command::EndTransaction { commit: true })).await.unwrap_err();
        assert!(err.to_string().ends_with(&suffix), "{err} should end with {suffix}");
        assert!(!err.is_retriable());
    }
}

#[tokio::test]
async fn push_requires_pushee_key() {
    let (tr, _) = setup();
    let pusher = new_txn(&tr, "a", 2, IsolationLevel::Serializable);
    let pushee = new_txn(&tr, "b", 1, IsolationLevel::Serializable);
    let mut bad = push_req(&pusher, &pushee, true);
    bad.header.key = "a".into();
    let err = tr.range.execute(bad).await.unwrap_err();
    assert!(err.to_string().contains("should match txn key"), "{err}");
    assert!(matches!(err, RangeError::KeyAddressingMismatch { .. }));
}

#[tokio::test]
async fn record_commands_require_anchor_key() {
    let (tr, engine) = setup();
    let txn = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
    for cmd in [Command::Heartbeat, Command::EndTransaction { commit: false }] {
        let header = RequestHeader::new("zzz").with_txn(txn.clone());
        let err = tr.range.execute(req(header, cmd)).await.unwrap_err();
        assert_eq!(err, RangeError::KeyAddressingMismatch { key: "zzz".into(), txn_key: "a".into() });
    }
    assert_eq!(engine.get_txn_record(txn.id).await.unwrap(), None);
    assert!(tr.range.cmd_queue.lock().is_empty());

    tr.range.execute(txn_req(&txn, Command::Heartbeat)).await.unwrap();
    assert_eq!(engine.get_txn_record(txn.id).await.unwrap().unwrap().status, TxnStatus::Pending);
}

#[tokio::test]
async fn push_finished_txn_is_noop() {
    for status in [TxnStatus::Committed, TxnStatus::Aborted] {
        let (tr, engine) = setup();
        let pusher = new_txn(&tr, "a", 2, IsolationLevel::Serializable);
        let mut pushee = new_txn(&tr, "b", 1, IsolationLevel::Serializable);
        pushee.status = status;
        engine.put_txn_record(&pushee).await.unwrap();
        pushee.status = TxnStatus::Pending;

        let resp = tr.range.execute(push_req(&pusher, &pushee, true)).await.unwrap();
        assert_eq!(resp.pushee().unwrap().status, status);
    }
}

#[tokio::test]
async fn push_upgrades_existing_record() {
    let (tr, engine) = setup();
    let pusher = new_txn(&tr, "a", 2, IsolationLevel::Serializable);
    let mut pushee = new_txn(&tr, "b", 1, IsolationLevel::Serializable);
    let start = pushee.timestamp;
    tr.range.execute(txn_req(&pushee, Command::Heartbeat)).await.unwrap();

    pushee.epoch = 1;
    pushee.timestamp = start.next();
    let resp = tr.range.execute(push_req(&pusher, &pushee, true)).await.unwrap();
    let record = resp.pushee().unwrap();
    assert_eq!(record.status, TxnStatus::Aborted);
    assert_eq!(record.epoch, 1);
    assert_eq!(record.timestamp, start.next());
    assert_eq!(record.last_heartbeat, Some(start));
    assert_eq!(engine.get_txn_record(pushee.id).await.unwrap().as_ref(), Some(record));
}

#[tokio::test]
async fn push_expired_heartbeat() {
    let h = HEARTBEAT_NANOS;
    let cases = [(false, 2 * h, false), (false, 2 * h + 1, true), (true, 2 * h, false), (true, 2 * h + 1, true)];
    for (i, (heartbeat, now, ok)) in cases.into_iter().enumerate() {
        let (tr, _) = setup();
        let pusher = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
        let pushee = new_txn(&tr, "b", 2, IsolationLevel::Serializable);
        if heartbeat {
            tr.range.execute(txn_req(&pushee, Command::Heartbeat)).await.unwrap();
        }
        tr.manual.set(now);
        let res = tr.range.execute(push_req(&pusher, &pushee, true)).await;
        assert_eq!(res.is_ok(), ok, "case {i}: {res:?}");
        match res {
            Ok(resp) => assert_eq!(resp.pushee().unwrap().status, TxnStatus::Aborted),
            Err(err) => assert!(matches!(err, RangeError::Txn(TxnError::PushConflict { .. })), "{err}"),
        }
    }
}

#[tokio::test]
async fn push_intent_from_old_epoch() {
    let (tr, _) = setup();
    let pusher = new_txn(&tr, "a", 1, IsolationLevel::Serializable);
    let mut pushee = new_txn(&tr, "b", 2, IsolationLevel::Serializable);
    pushee.epoch = 1;
    tr.range.execute(txn_req(&pushee, Command::Heartbeat)).await.unwrap();

    let same_epoch = tr.range.execute(push_req(&pusher, &pushee, true)).await;
    assert!(same_epoch.is_err());
    pushee.epoch = 0;
    let resp = tr.range.execute(push_req(&pusher, &pushee, true)).await.unwrap();
    assert_eq!(resp.pushee().unwrap().status, TxnStatus::Aborted);
    assert_eq!(resp.pushee().unwrap().epoch, 1);
}

#[tokio::test]
async fn push_priorities() {
    // (pusher priority, pushee priority, pusher timestamp first, abort, ok)
    let cases = [
        (2, 1, false, true, true),
        (1, 2, true, true, false),
        (1, 2, false, false, false),
        (1, 1, true, true, true),
        (1, 1, false, true, false),
    ];
    for (i, (pusher_pri, pushee_pri, pusher_first, abort, ok)) in cases.into_iter().enumerate() {
        let (tr, _) = setup();
        let (pusher, pushee) = if pusher_first {
            let pusher = new_txn(&tr, "a", pusher_pri, IsolationLevel::Serializable);
            (pusher, new_txn(&tr, "b", pushee_pri, IsolationLevel::Serializable))
        } else {
            let pushee = new_txn(&tr, "b", pushee_pri, IsolationLevel::Serializable);
            (new_txn(&tr, "a", pusher_pri, IsolationLevel::Serializable), pushee)
        };
        let res = tr.range.execute(push_req(&pusher, &pushee, abort)).await;
        assert_eq!(res.is_ok(), ok, "case {i}: {res:?}");
        if let Err(err) = res {
            assert!(err.is_retriable());
            match err {
                RangeError::Txn(TxnError::PushConflict { pusher: Some(p), pushee: e }) => {
                    assert_eq!(p.id, pusher.id);
                    assert_eq!(e.id, pushee.id);
                }
                other => panic!("case {i}: {other}"),
            }
        }
    }
}

#[tokio::test]
async fn push_timestamp() {
    let (tr, engine) = setup();
    let mut pusher = new_txn(&tr, "a", 2, IsolationLevel::Serializable);
    pusher.timestamp = Timestamp::new(50, 25);
    let pushee = new_txn(&tr, "b", 1, IsolationLevel::Serializable);

    let resp = tr.range.execute(push_req(&pusher, &pushee, false)).await.unwrap();
    let record = resp.pushee().unwrap();
    assert_eq!(record.timestamp, Timestamp::new(50, 26));
    assert_eq!(record.status, TxnStatus::Pending);
    assert_eq!(engine.get_txn_record(pushee.id).await.unwrap().as_ref(), Some(record));
}

#[tokio::test]
async fn push_timestamp_already_pushed() {
    let (tr, engine) = setup();
    let mut pusher = new_txn(&tr, "a", 2, IsolationLevel::Serializable);
    pusher.timestamp = Timestamp::new(50, 25);
    let mut pushee = new_txn(&tr, "b", 1, IsolationLevel::Serializable);
    pushee.timestamp = Timestamp::new(50, 26);

    let resp = tr.range.execute(push_req(&pusher, &pushee, false)).await.unwrap();
    assert_eq!(resp.pushee().unwrap().timestamp, Timestamp::new(50, 26));
    assert_eq!(engine.get_txn_record(pushee.id).await.unwrap(), None);
}

#[tokio::test]
async fn txn_commands_require_txn() {
    let (tr, _) = setup();
    for (cmd, method) in [
        (Command::Heartbeat, Method::Heartbeat),
        (Command::EndTransaction { commit: true }, Method::EndTransaction),
        (Command::ResolveIntent, Method::ResolveIntent),
    ] {
        let err = tr.range.execute(req(RequestHeader::new("a"), cmd)).await.unwrap_err();
        assert_eq!(err, RangeError::MissingTransaction(method));
    }
}

#[tokio::test]
async fn stats_track_writes() {
    let (tr, engine) = setup();
    tr.range.execute(put("a", "value1")).await.unwrap();
    let ms = tr.range.stats();
    assert_eq!((ms.key_bytes, ms.val_bytes, ms.live_bytes), (13, 6, 19));
    assert_eq!((ms.live_count, ms.key_count, ms.val_count), (1, 1, 1));

    let txn = new_txn(&tr, "b", 1, IsolationLevel::Serializable);
    tr.range.execute(txn_req(&txn, Command::Put { value: "value2".into() })).await.unwrap();
    let ms = tr.range.stats();
    assert_eq!((ms.key_bytes, ms.val_bytes, ms.live_bytes), (26, 12, 38));
    assert_eq!((ms.live_count, ms.key_count, ms.val_count), (2, 2, 2));
    assert_eq!((ms.intent_bytes, ms.intent_count), (19, 1));

    let resp = tr.range.execute(txn_req(&txn, Command::EndTransaction { commit: true })).await.unwrap();
    let committed = resp.header.txn.unwrap();
    tr.range.execute(txn_req(&committed, Command::ResolveIntent)).await.unwrap();
    let ms = tr.range.stats();
    assert_eq!((ms.intent_bytes, ms.intent_count), (0, 0));
    assert_eq!(value_of(&tr, "b").await, Some(Value::from("value2")));

    tr.range.execute(req(RequestHeader::new("a"), Command::Delete)).await.unwrap();
    let ms = tr.range.stats();
    assert_eq!((ms.key_bytes, ms.val_bytes, ms.live_bytes), (39, 12, 19));
    assert_eq!((ms.live_count, ms.key_count, ms.val_count), (1, 2, 3));
    assert_eq!(tr.range.size(), 51);
    assert_eq!(ms, engine.compute_stats(&tr.range.desc().span()));
}

#[tokio::test]
async fn merge_and_conditional_put() {
    let (tr, _) = setup();
    for part in ["a", "b", "c", "d"] {
        tr.range.execute(req(RequestHeader::new("m"), Command::Merge { value: part.into() })).await.unwrap();
    }
    assert_eq!(value_of(&tr, "m").await, Some(Value::from("abcd")));

    tr.range.execute(put("c", "x")).await.unwrap();
    let cput = |expected: Option<&str>| {
        req(RequestHeader::new("c"), Command::ConditionalPut { value: "z".into(), expected: expected.map(Value::from) })
    };
    let err = tr.range.execute(cput(Some("y"))).await.unwrap_err();
    assert_eq!(err, RangeError::ConditionFailed { actual: Some(Value::from("x")) });
    let err = tr.range.execute(cput(None)).await.unwrap_err();
    assert_eq!(err, RangeError::ConditionFailed { actual: Some(Value::from("x")) });
    tr.range.execute(cput(Some("x"))).await.unwrap();
    assert_eq!(value_of(&tr, "c").await, Some(Value::from("z")));

    let absent = req(RequestHeader::new("n"), Command::ConditionalPut { value: "1".into(), expected: None });
    tr.range.execute(absent).await.unwrap();
}

#[tokio::test]
async fn scan_and_delete_range() {
    let (tr, _) = setup();
    for key in ["a", "b", "c"] {
        tr.range.execute(put(key, key)).await.unwrap();
    }
    let scan = |max_results| req(RequestHeader::span("a", "c"), Command::Scan { max_results });
    let rows = |resp: Response| match resp.body {
        ResponseBody::Scan { rows } => rows,
        other => panic!("unexpected body {other:?}"),
    };
    let all = rows(tr.range.execute(scan(0)).await.unwrap());
    assert_eq!(all.iter().map(|(k, _)| k.clone()).collect::<Vec<_>>(), vec![Key::from("a"), Key::from("b")]);
    assert_eq!(rows(tr.range.execute(scan(1)).await.unwrap()).len(), 1);

    let resp = tr.range.execute(req(RequestHeader::span("a", "z"), Command::DeleteRange { max_entries: 0 })).await;
    assert_eq!(resp.unwrap().body, ResponseBody::DeleteRange { num_deleted: 3 });
    assert!(rows(tr.range.execute(scan(0)).await.unwrap()).is_empty());
}

#[tokio::test]
async fn gossips_first_range_and_configs() {
    let (tr, _) = setup();
    tr.range.start().await;
    assert_eq!(tr.gossip.get_info_as::<RangeDescriptor>(KEY_FIRST_RANGE).as_ref(), Some(tr.range.desc()));
    assert!(tr.gossip.get_info(KEY_CONFIG_ACCOUNTING).is_none());

    let acct = |id: &str| Value::from(serde_json::to_vec(&AcctConfig { cluster_id: id.into() }).unwrap());
    let default_key = Key::from(KEY_CONFIG_ACCOUNTING_PREFIX);
    tr.range.execute(req(RequestHeader::new(default_key.clone()), Command::Put { value: acct("default") })).await.unwrap();
    let map: PrefixConfigMap<AcctConfig> = tr.gossip.get_info_as(KEY_CONFIG_ACCOUNTING).unwrap();
    assert_eq!(map.len(), 1);

    let db1 = default_key.join(b"/db1");
    tr.range.execute(req(RequestHeader::new(db1), Command::Put { value: acct("db1") })).await.unwrap();
    let map: PrefixConfigMap<AcctConfig> = tr.gossip.get_info_as(KEY_CONFIG_ACCOUNTING).unwrap();
    assert_eq!(map.len(), 3);
    assert_eq!(map.match_by_prefix(&"/db1/table".into()).unwrap().config.cluster_id, "db1");
    assert_eq!(map.match_by_prefix(&"/db2".into()).unwrap().config.cluster_id, "default");

    let other = build(RangeDescriptor::new(2, "a", "z"), Arc::new(MemEngine::new()));
    other.range.start().await;
    assert!(other.gossip.keys().is_empty());
}

#[tokio::test]
async fn out_of_range_requests_never_enter_queue() {
    let tr = build(RangeDescriptor::new(2, "a", "c"), Arc::new(MemEngine::new()));
    for request in [get("d"), put("c", "v"), req(RequestHeader::span("b", "z"), Command::Scan { max_results: 0 })] {
        let err = tr.range.execute(request).await.unwrap_err();
        assert!(matches!(err, RangeError::OutOfRange { .. }), "{err}");
        assert!(!err.is_retriable());
    }
    tr.range.execute(put("b", "v")).await.unwrap();
    assert!(tr.range.cmd_queue.lock().is_empty());
}

#[tokio::test]
async fn inverted_spans_are_rejected() {
    let (tr, _) = setup();
    let read_ts = Timestamp::new(10, 0);
    tr.range.execute(req(RequestHeader::new("a").at(read_ts), Command::Get)).await.unwrap();

    for end_key in ["\x00", "a"] {
        let header = RequestHeader::span("a", end_key).at(Timestamp::new(5, 0));
        let err = tr.range.execute(req(header, Command::Put { value: "v".into() })).await.unwrap_err();
        assert_eq!(err, RangeError::InvalidSpan { key: "a".into(), end_key: end_key.into() });
        assert!(!err.is_retriable());
    }
    let resp = tr.range.execute(req(RequestHeader::new("a").at(read_ts), Command::Get)).await.unwrap();
    assert_eq!(resp.value(), None);
    assert!(tr.range.cmd_queue.lock().is_empty());
}

#[tokio::test]
async fn inverted_span_does_not_bypass_pending_write() {
    let engine = Arc::new(BlockingEngine::new());
    let tr = setup_with(engine.clone());
    engine.block("a");

    let range = tr.range.clone();
    let first = tokio::spawn(async move { range.execute(put("a", "v")).await });
    timeout(WAIT, engine.entered.notified()).await.unwrap();

    let inverted = req(RequestHeader::span("a", "\x00"), Command::Put { value: "w".into() });
    let err = timeout(WAIT, tr.range.execute(inverted)).await.unwrap().unwrap_err();
    assert!(matches!(err, RangeError::InvalidSpan { .. }), "{err}");
    assert_eq!(tr.range.cmd_queue.lock().len(), 1);

    engine.unblock();
    timeout(WAIT, first).await.unwrap().unwrap().unwrap();
    assert_eq!(value_of(&tr, "a").await, Some(Value::from("v")));
}

#[tokio::test]
async fn engine_failures_release_queue() {
    let tr = setup_with(Arc::new(FailingEngine));
    for _ in 0..2 {
        let err = timeout(WAIT, tr.range.execute(put("a", "v"))).await.unwrap().unwrap_err();
        assert!(matches!(err, RangeError::Storage(StorageError::Backend(_))), "{err}");
        assert!(!err.is_retriable());
    }
    assert!(tr.range.cmd_queue.lock().is_empty());
    assert!(tr.range.resp_cache.lock().is_empty());
    let tc = tr.range.ts_cache.lock();
    assert!(tc.is_empty());
    assert_eq!(tr.range.stats(), MvccStats::default());
}

#[tokio::test]
async fn stopped_log_rejects_writes() {
    let (tr, _) = setup();
    tr.proposer.stop();
    let err = tr.range.execute(put("a", "v")).await.unwrap_err();
    assert_eq!(err, RangeError::Consensus(ConsensusError::Stopped(1)));
    assert_eq!(value_of(&tr, "a").await, None);
    assert!(tr.range.cmd_queue.lock().is_empty());
}
