#![deny(missing_docs)]
#![doc = "SerinDB node library: node configuration and the in-process demo driven by the CLI."]

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use serin_meta::InfoStore;
use serin_raft::LocalProposer;
use serin_range::{ClientCmdId, Command, Range, RangeConfig, RangeDescriptor, Request, RequestHeader};
use serin_storage::{MemEngine, MvccStats, Value};
use serin_txn::{Clock, Key, SystemClock, KEY_MIN};

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Directory for rolling JSON log files; stderr only when unset.
    pub dir: Option<PathBuf>,
    /// Filter in `RUST_LOG` syntax.
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self { dir: None, level: "info".into() }
    }
}

/// Settings of a SerinDB node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Upper bound on clock skew between nodes, in milliseconds.
    pub max_clock_offset_ms: u64,
    /// Logging.
    pub log: LogConfig,
    /// Tuning shared by every range on the node.
    pub range: RangeConfig,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self { max_clock_offset_ms: 250, log: LogConfig::default(), range: RangeConfig::default() }
    }
}

impl NodeConfig {
    /// Reads a YAML config file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parses a YAML config; missing fields take their defaults.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let config: NodeConfig = serde_yaml::from_str(content)?;
        Ok(config)
    }

    /// Maximum clock offset as a duration.
    pub fn max_clock_offset(&self) -> Duration {
        Duration::from_millis(self.max_clock_offset_ms)
    }
}

/// Outcome of [`run_demo`].
#[derive(Debug, Clone)]
pub struct DemoReport {
    /// Final counter value.
    pub counter: i64,
    /// Statistics of the demo range.
    pub stats: MvccStats,
}

/// Runs `clients` concurrent increments of one counter against an in-memory
/// range spanning the whole keyspace. Every other client retries the same
/// client command id, so the counter ends at the number of distinct ids.
pub async fn run_demo(config: &NodeConfig, clients: usize) -> Result<DemoReport> {
    let clock = Arc::new(Clock::new(SystemClock, config.max_clock_offset()));
    let range = Range::new(
        RangeDescriptor::new(1, KEY_MIN, Key::max()),
        config.range.clone(),
        clock.clone(),
        Arc::new(MemEngine::new()),
        Arc::new(LocalProposer::new()),
    )
    .with_gossip(Arc::new(InfoStore::new()));
    let range = Arc::new(range);
    range.start().await;

    let shared = ClientCmdId::new(clock.physical_now(), 1);
    let mut handles = Vec::with_capacity(clients);
    for i in 0..clients {
        let cmd_id = if i % 2 == 0 { shared } else { ClientCmdId::new(clock.physical_now(), i as i64 + 1) };
        let req = Request::new(RequestHeader::new("counter").with_cmd_id(cmd_id), Command::Increment { increment: 1 });
        let range = range.clone();
        handles.push(tokio::spawn(async move { range.execute(req).await }));
    }
    for handle in handles {
        handle.await??;
    }

    let resp = range.execute(Request::new(RequestHeader::new("counter"), Command::Get)).await?;
    let counter = resp.value().and_then(Value::as_integer).unwrap_or_default();
    let stats = range.stats();
    info!(counter, live_bytes = stats.live_bytes, "demo finished");
    Ok(DemoReport { counter, stats })
}
