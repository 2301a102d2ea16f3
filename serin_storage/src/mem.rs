use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::Arc;
use tracing::debug;

use serin_txn::{Key, KeySpan, Timestamp, Transaction, TxnId, TxnStatus};

use crate::{MvccEngine, MvccStats, Result, StorageError, Value, VERSION_OVERHEAD};

#[derive(Debug, Clone)]
struct Intent {
    txn: Transaction,
    timestamp: Timestamp,
    value: Option<Value>,
}

/// Everything stored under one key. `None` values are deletion markers.
#[derive(Debug, Default, Clone)]
struct KeyVersions {
    inline: Option<Value>,
    intent: Option<Intent>,
    versions: BTreeMap<Timestamp, Option<Value>>,
}

impl KeyVersions {
    fn is_empty(&self) -> bool {
        self.inline.is_none() && self.intent.is_none() && self.versions.is_empty()
    }

    fn stats(&self, key: &Key) -> MvccStats {
        let mut ms = MvccStats::default();
        if self.is_empty() {
            return ms;
        }
        let kb = key.as_bytes().len() as i64;
        let size = |v: &Option<Value>| v.as_ref().map_or(0, Value::size);
        ms.key_count = 1;

        for value in self.versions.values() {
            ms.key_bytes += kb + VERSION_OVERHEAD;
            ms.val_bytes += size(value);
            ms.val_count += 1;
        }
        if let Some(intent) = &self.intent {
            ms.key_bytes += kb + VERSION_OVERHEAD;
            ms.val_bytes += size(&intent.value);
            ms.val_count += 1;
            ms.intent_bytes += kb + VERSION_OVERHEAD + size(&intent.value);
            ms.intent_count += 1;
        }
        if let Some(value) = &self.inline {
            ms.key_bytes += kb;
            ms.val_bytes += value.size();
            ms.val_count += 1;
        }

        let newest = match (&self.intent, self.versions.values().next_back()) {
            (Some(intent), _) => Some((kb + VERSION_OVERHEAD, intent.value.as_ref())),
            (None, Some(value)) => Some((kb + VERSION_OVERHEAD, value.as_ref())),
            (None, None) => self.inline.as_ref().map(|v| (kb, Some(v))),
        };
        if let Some((key_size, Some(value))) = newest {
            ms.live_count = 1;
            ms.live_bytes = key_size + value.size();
        }
        ms
    }

    fn read(&self, key: &Key, timestamp: Timestamp, txn: Option<&Transaction>) -> Result<Option<Value>> {
        if let Some(intent) = &self.intent {
            match txn {
                Some(t) if t.id == intent.txn.id => {
                    if t.epoch == intent.txn.epoch {
                        return Ok(intent.value.clone());
                    }
                }
                _ if timestamp >= intent.timestamp => {
                    return Err(StorageError::WriteIntent { key: key.clone(), txn: Box::new(intent.txn.clone()) });
                }
                _ => {}
            }
        }
        match self.versions.range(..=timestamp).next_back() {
            Some((_, value)) => Ok(value.clone()),
            None => Ok(self.inline.clone()),
        }
    }

    fn write(&mut self, key: &Key, timestamp: Timestamp, value: Option<Value>, txn: Option<&Transaction>) -> Result<()> {
        if let Some(intent) = &self.intent {
            if txn.map_or(true, |t| t.id != intent.txn.id) {
                return Err(StorageError::WriteIntent { key: key.clone(), txn: Box::new(intent.txn.clone()) });
            }
        }
        if let Some((&existing, _)) = self.versions.iter().next_back() {
            if existing >= timestamp {
                return Err(StorageError::WriteTooOld { timestamp, existing });
            }
        }
        match txn {
            Some(t) => self.intent = Some(Intent { txn: t.clone(), timestamp, value }),
            None => {
                self.versions.insert(timestamp, value);
            }
        }
        Ok(())
    }

    fn resolve(&mut self, key: &Key, txn: &Transaction) {
        let Some(intent) = self.intent.take() else { return };
        if txn.epoch < intent.txn.epoch {
            debug!(%key, epoch = txn.epoch, intent_epoch = intent.txn.epoch, "ignoring resolve from stale epoch");
            self.intent = Some(intent);
            return;
        }
        if txn.epoch > intent.txn.epoch {
            return;
        }
        match txn.status {
            TxnStatus::Committed => {
                self.versions.insert(txn.timestamp.max(intent.timestamp), intent.value);
            }
            TxnStatus::Pending => {
                let timestamp = txn.timestamp.max(intent.timestamp);
                self.intent = Some(Intent { txn: txn.clone(), timestamp, value: intent.value });
            }
            TxnStatus::Aborted => {}
        }
    }
}

#[derive(Debug, Default)]
struct MemState {
    keys: BTreeMap<Key, KeyVersions>,
    records: HashMap<TxnId, Transaction>,
}

impl MemState {
    /// Applies `f` to the versions of `key`, accumulating the size delta into
    /// `ms`. `f` must leave the entry untouched when it fails.
    fn mutate<T>(
        &mut self,
        ms: &mut MvccStats,
        key: &Key,
        f: impl FnOnce(&mut KeyVersions) -> Result<T>,
    ) -> Result<T> {
        let entry = self.keys.entry(key.clone()).or_default();
        let before = entry.stats(key);
        let res = f(&mut *entry);
        *ms += entry.stats(key);
        *ms -= before;
        if entry.is_empty() {
            self.keys.remove(key);
        }
        res
    }

    fn span<'a>(&'a self, span: &KeySpan) -> impl Iterator<Item = (&'a Key, &'a KeyVersions)> + 'a {
        let bounds = (span.start < span.end)
            .then(|| (Bound::Included(span.start.clone()), Bound::Excluded(span.end.clone())));
        bounds.into_iter().flat_map(move |b| self.keys.range(b))
    }
}

/// In-memory multi-version engine. Clones share the same data.
#[derive(Debug, Default, Clone)]
pub struct MemEngine {
    state: Arc<Mutex<MemState>>,
}

impl MemEngine {
    /// Creates an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Recomputes statistics over `span` from scratch.
    pub fn compute_stats(&self, span: &KeySpan) -> MvccStats {
        let state = self.state.lock();
        let mut ms = MvccStats::default();
        for (key, kv) in state.span(span) {
            ms += kv.stats(key);
        }
        ms
    }
}

#[async_trait::async_trait]
impl MvccEngine for MemEngine {
    async fn get(&self, key: &Key, timestamp: Timestamp, txn: Option<&Transaction>) -> Result<Option<Value>> {
        let state = self.state.lock();
        match state.keys.get(key) {
            Some(kv) => kv.read(key, timestamp, txn),
            None => Ok(None),
        }
    }

    async fn scan(
        &self,
        span: &KeySpan,
        max_results: usize,
        timestamp: Timestamp,
        txn: Option<&Transaction>,
    ) -> Result<Vec<(Key, Value)>> {
        let state = self.state.lock();
        let mut rows = Vec::new();
        for (key, kv) in state.span(span) {
            if max_results > 0 && rows.len() >= max_results {
                break;
            }
            if let Some(value) = kv.read(key, timestamp, txn)? {
                rows.push((key.clone(), value));
            }
        }
        Ok(rows)
    }

    async fn put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        value: Value,
        txn: Option<&Transaction>,
    ) -> Result<()> {
        self.state.lock().mutate(ms, key, |kv| kv.write(key, timestamp, Some(value), txn))
    }

    async fn conditional_put(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        value: Value,
        expected: Option<&Value>,
        txn: Option<&Transaction>,
    ) -> Result<()> {
        self.state.lock().mutate(ms, key, |kv| {
            let actual = kv.read(key, timestamp, txn)?;
            if actual.as_ref() != expected {
                return Err(StorageError::ConditionFailed { actual });
            }
            kv.write(key, timestamp, Some(value), txn)
        })
    }

    async fn increment(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        inc: i64,
        txn: Option<&Transaction>,
    ) -> Result<i64> {
        self.state.lock().mutate(ms, key, |kv| {
            let current = match kv.read(key, timestamp, txn)? {
                None => 0,
                Some(Value::Integer(i)) => i,
                Some(Value::Bytes(_)) => {
                    return Err(StorageError::ValueType {
                        key: key.clone(),
                        msg: "cannot increment a non-integer value".into(),
                    })
                }
            };
            if inc == 0 {
                return Ok(current);
            }
            let next = current.checked_add(inc).ok_or_else(|| StorageError::ValueType {
                key: key.clone(),
                msg: format!("increment {inc} overflows {current}"),
            })?;
            kv.write(key, timestamp, Some(Value::Integer(next)), txn)?;
            Ok(next)
        })
    }

    async fn delete(
        &self,
        ms: &mut MvccStats,
        key: &Key,
        timestamp: Timestamp,
        txn: Option<&Transaction>,
    ) -> Result<()> {
        self.state.lock().mutate(ms, key, |kv| kv.write(key, timestamp, None, txn))
    }

    async fn delete_range(
        &self,
        ms: &mut MvccStats,
        span: &KeySpan,
        max_entries: usize,
        timestamp: Timestamp,
        txn: Option<&Transaction>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        let mut live = Vec::new();
        for (key, kv) in state.span(span) {
            if max_entries > 0 && live.len() >= max_entries {
                break;
            }
            if kv.read(key, timestamp, txn)?.is_some() {
                live.push(key.clone());
            }
        }
        for key in &live {
            state.mutate(ms, key, |kv| kv.write(key, timestamp, None, txn))?;
        }
        Ok(live.len() as u64)
    }

    async fn merge(&self, ms: &mut MvccStats, key: &Key, value: Value) -> Result<()> {
        self.state.lock().mutate(ms, key, |kv| {
            if kv.intent.is_some() || !kv.versions.is_empty() {
                return Err(StorageError::ValueType { key: key.clone(), msg: "cannot merge into a versioned value".into() });
            }
            if let Some(existing) = kv.inline.as_mut() {
                if !existing.merge(&value) {
                    return Err(StorageError::ValueType {
                        key: key.clone(),
                        msg: "cannot merge mismatched value kinds".into(),
                    });
                }
                return Ok(());
            }
            kv.inline = Some(value);
            Ok(())
        })
    }

    async fn resolve_intent(&self, ms: &mut MvccStats, span: &KeySpan, txn: &Transaction) -> Result<()> {
        let mut state = self.state.lock();
        let owned: Vec<Key> = state
            .span(span)
            .filter(|(_, kv)| kv.intent.as_ref().is_some_and(|i| i.txn.id == txn.id))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &owned {
            state.mutate(ms, key, |kv| {
                kv.resolve(key, txn);
                Ok(())
            })?;
        }
        Ok(())
    }

    async fn get_txn_record(&self, id: TxnId) -> Result<Option<Transaction>> {
        Ok(self.state.lock().records.get(&id).cloned())
    }

    async fn put_txn_record(&self, txn: &Transaction) -> Result<()> {
        self.state.lock().records.insert(txn.id, txn.clone());
        Ok(())
    }
}
