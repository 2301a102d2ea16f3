//! Cluster metadata gossip seam.
//!
//! Ranges publish the first range's descriptor and the per-prefix accounting,
//! permission and zone configuration maps through [`Gossip`]. Publishing is
//! fire-and-forget; consumers read the latest value per key.
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::debug;

/// Descriptor of the range starting at the lowest key.
pub const KEY_FIRST_RANGE: &str = "first-range";
/// Accounting configuration map.
pub const KEY_CONFIG_ACCOUNTING: &str = "acct";
/// Permission configuration map.
pub const KEY_CONFIG_PERMISSION: &str = "perms";
/// Zone configuration map.
pub const KEY_CONFIG_ZONE: &str = "zones";

/// Sink for cluster-wide information.
pub trait Gossip: Send + Sync {
    /// Publishes `value` under `key`, replacing any earlier value.
    fn add_info(&self, key: &str, value: serde_json::Value);
}

/// In-memory info store keeping the latest value per key.
#[derive(Debug, Default)]
pub struct InfoStore {
    infos: RwLock<HashMap<String, serde_json::Value>>,
}

impl InfoStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Latest raw value under `key`.
    pub fn get_info(&self, key: &str) -> Option<serde_json::Value> {
        self.infos.read().get(key).cloned()
    }

    /// Latest value under `key` decoded as `T`; `None` if absent or not a `T`.
    pub fn get_info_as<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.get_info(key).and_then(|v| serde_json::from_value(v).ok())
    }

    /// Keys published so far.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<_> = self.infos.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Gossip for InfoStore {
    fn add_info(&self, key: &str, value: serde_json::Value) {
        debug!(key, "gossip info added");
        self.infos.write().insert(key.to_string(), value);
    }
}
