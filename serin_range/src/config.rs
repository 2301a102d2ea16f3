//! Range tuning knobs and the prefix-scoped cluster configuration stored
//! under reserved keys.
//!
//! Accounting, permission and zone configs live at keys
//! `<family prefix><key prefix>`, each applying to every key starting with
//! `<key prefix>`. Whenever one of them changes, the range rebuilds the
//! family's [`PrefixConfigMap`] and gossips it.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use thiserror::Error;

use serin_meta::{KEY_CONFIG_ACCOUNTING, KEY_CONFIG_PERMISSION, KEY_CONFIG_ZONE};
use serin_storage::Value;
use serin_txn::{Key, KeySpan, KEY_MIN};

/// Per-range tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RangeConfig {
    /// Interval at which transaction coordinators heartbeat; a transaction
    /// silent for twice this long may be pushed by anybody.
    pub heartbeat_interval_ms: u64,
    /// Capacity of the timestamp cache.
    pub ts_cache_max_entries: usize,
    /// Beyond capacity, timestamp cache entries this recent are still kept.
    pub ts_cache_min_window_ms: u64,
    /// Row limit applied to scans.
    pub max_scan_results: usize,
    /// Responses of commands whose client id is older than this are
    /// forgotten; retries after that execute again.
    pub resp_cache_retention_ms: u64,
}

impl Default for RangeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval_ms: 5_000,
            ts_cache_max_entries: 65_536,
            ts_cache_min_window_ms: 10_000,
            max_scan_results: 10_000,
            resp_cache_retention_ms: 600_000,
        }
    }
}

impl RangeConfig {
    /// Heartbeat interval as a duration.
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }

    /// Timestamp cache window as a duration.
    pub fn ts_cache_min_window(&self) -> Duration {
        Duration::from_millis(self.ts_cache_min_window_ms)
    }

    /// Response cache retention as a duration.
    pub fn resp_cache_retention(&self) -> Duration {
        Duration::from_millis(self.resp_cache_retention_ms)
    }
}

/// Key prefix of accounting configs.
pub const KEY_CONFIG_ACCOUNTING_PREFIX: &[u8] = b"\x00acct";
/// Key prefix of permission configs.
pub const KEY_CONFIG_PERMISSION_PREFIX: &[u8] = b"\x00perm";
/// Key prefix of zone configs.
pub const KEY_CONFIG_ZONE_PREFIX: &[u8] = b"\x00zone";

/// Accounting config: which cluster is billed for the keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcctConfig {
    pub cluster_id: String,
}

/// Permission config: users allowed to read and write the keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermConfig {
    pub read: Vec<String>,
    pub write: Vec<String>,
}

/// Zone config: replica placement and range size bounds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ZoneConfig {
    /// Required attributes, one list per replica.
    pub replica_attrs: Vec<Vec<String>>,
    pub range_min_bytes: i64,
    pub range_max_bytes: i64,
}

/// Failures building a prefix config map.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Every map needs a config at the empty prefix.
    #[error("no default prefix specified")]
    NoDefault,
    /// A stored config could not be decoded.
    #[error("config at key {key}: {source}")]
    Decode {
        /// Offending key.
        key: Key,
        /// Decoder error.
        #[source]
        source: serde_json::Error,
    },
    /// A stored config is an integer rather than encoded bytes.
    #[error("config at key {0} is not a byte value")]
    NotBytes(Key),
}

/// A config and the key prefix it applies to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixConfig<T> {
    /// Keys starting with this prefix use `config`.
    pub prefix: Key,
    /// For end markers, the prefix whose config resumes here.
    pub canonical: Option<Key>,
    pub config: T,
}

impl<T> PrefixConfig<T> {
    /// A config stored at `prefix`.
    pub fn new(prefix: impl Into<Key>, config: T) -> Self {
        Self { prefix: prefix.into(), canonical: None, config }
    }
}

/// Prefix configs sorted by prefix, with an end marker after every nested
/// prefix so that the config of any key is the last entry at or before it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrefixConfigMap<T> {
    configs: Vec<PrefixConfig<T>>,
}

impl<T: Clone> PrefixConfigMap<T> {
    /// Builds the map. One config must have the empty prefix.
    pub fn new(mut configs: Vec<PrefixConfig<T>>) -> Result<Self, ConfigError> {
        configs.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        if configs.first().map_or(true, |pc| pc.prefix != KEY_MIN) {
            return Err(ConfigError::NoDefault);
        }
        let stored: HashSet<Key> = configs.iter().map(|pc| pc.prefix.clone()).collect();
        let mut out: BTreeMap<Key, PrefixConfig<T>> = BTreeMap::new();
        let mut stack: Vec<PrefixConfig<T>> = Vec::new();

        let end_marker = |popped: &PrefixConfig<T>, enclosing: &PrefixConfig<T>, out: &mut BTreeMap<Key, PrefixConfig<T>>| {
            let end = popped.prefix.prefix_end();
            if !stored.contains(&end) {
                let marker = PrefixConfig {
                    prefix: end.clone(),
                    canonical: Some(enclosing.prefix.clone()),
                    config: enclosing.config.clone(),
                };
                out.insert(end, marker);
            }
        };

        for pc in configs {
            while stack.len() > 1 && !pc.prefix.has_prefix(stack[stack.len() - 1].prefix.as_bytes()) {
                if let Some(popped) = stack.pop() {
                    end_marker(&popped, &stack[stack.len() - 1], &mut out);
                }
            }
            out.insert(pc.prefix.clone(), pc.clone());
            stack.push(pc);
        }
        while stack.len() > 1 {
            if let Some(popped) = stack.pop() {
                end_marker(&popped, &stack[stack.len() - 1], &mut out);
            }
        }
        Ok(Self { configs: out.into_values().collect() })
    }

    /// The config applying to `key`: the entry with the longest prefix of it.
    pub fn match_by_prefix(&self, key: &Key) -> Option<&PrefixConfig<T>> {
        let idx = self.configs.partition_point(|pc| &pc.prefix <= key);
        idx.checked_sub(1).map(|i| &self.configs[i])
    }

    /// The entries, in prefix order.
    pub fn configs(&self) -> &[PrefixConfig<T>] {
        &self.configs
    }

    /// Number of entries, end markers included.
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// True if the map has no entries.
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }
}

/// A family of prefix configs sharing a reserved key prefix and a gossip key.
#[derive(Debug, Clone, Copy)]
pub struct ConfigFamily {
    /// Reserved key prefix holding the family's configs.
    pub prefix: &'static [u8],
    /// Gossip key the family's map is published under.
    pub gossip_key: &'static str,
    build: fn(&[(Key, Value)], &[u8]) -> Result<serde_json::Value, ConfigError>,
}

impl ConfigFamily {
    /// Span of the family's keys.
    pub fn span(&self) -> KeySpan {
        let start = Key::from(self.prefix);
        let end = start.prefix_end();
        KeySpan { start, end }
    }

    /// Builds the JSON encoding of the family's map from the rows of a scan
    /// over [`ConfigFamily::span`].
    pub fn build_map(&self, rows: &[(Key, Value)]) -> Result<serde_json::Value, ConfigError> {
        (self.build)(rows, self.prefix)
    }
}

/// Every config family, in a fixed order.
pub const CONFIG_FAMILIES: [ConfigFamily; 3] = [
    ConfigFamily {
        prefix: KEY_CONFIG_ACCOUNTING_PREFIX,
        gossip_key: KEY_CONFIG_ACCOUNTING,
        build: build_map::<AcctConfig>,
    },
    ConfigFamily {
        prefix: KEY_CONFIG_PERMISSION_PREFIX,
        gossip_key: KEY_CONFIG_PERMISSION,
        build: build_map::<PermConfig>,
    },
    ConfigFamily { prefix: KEY_CONFIG_ZONE_PREFIX, gossip_key: KEY_CONFIG_ZONE, build: build_map::<ZoneConfig> },
];

fn build_map<T>(rows: &[(Key, Value)], family: &[u8]) -> Result<serde_json::Value, ConfigError>
where
    T: Clone + Serialize + DeserializeOwned,
{
    let mut configs = Vec::with_capacity(rows.len());
    for (key, value) in rows {
        let bytes = value.as_bytes().ok_or_else(|| ConfigError::NotBytes(key.clone()))?;
        let config: T =
            serde_json::from_slice(bytes).map_err(|source| ConfigError::Decode { key: key.clone(), source })?;
        let prefix = key.as_bytes().strip_prefix(family).unwrap_or_default();
        configs.push(PrefixConfig::new(prefix, config));
    }
    let map = PrefixConfigMap::new(configs)?;
    serde_json::to_value(&map).map_err(|source| ConfigError::Decode { key: Key::from(family), source })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acct(id: &str) -> AcctConfig {
        AcctConfig { cluster_id: id.into() }
    }

    fn entries(map: &PrefixConfigMap<AcctConfig>) -> Vec<(&str, Option<&str>, &str)> {
        map.configs()
            .iter()
            .map(|pc| {
                (
                    std::str::from_utf8(pc.prefix.as_bytes()).unwrap(),
                    pc.canonical.as_ref().map(|c| std::str::from_utf8(c.as_bytes()).unwrap()),
                    pc.config.cluster_id.as_str(),
                )
            })
            .collect()
    }

    #[test]
    fn requires_default() {
        assert!(matches!(PrefixConfigMap::new(vec![PrefixConfig::new("/db1", acct("x"))]), Err(ConfigError::NoDefault)));
        assert!(matches!(PrefixConfigMap::<AcctConfig>::new(vec![]), Err(ConfigError::NoDefault)));
    }

    #[test]
    fn end_markers_restore_enclosing_config() {
        let map = PrefixConfigMap::new(vec![
            PrefixConfig::new("/db1", acct("db1")),
            PrefixConfig::new("", acct("default")),
        ])
        .unwrap();
        assert_eq!(entries(&map), vec![("", None, "default"), ("/db1", None, "db1"), ("/db2", Some(""), "default")]);
    }

    #[test]
    fn nested_and_adjacent_prefixes() {
        let map = PrefixConfigMap::new(vec![
            PrefixConfig::new("", acct("d")),
            PrefixConfig::new("/db1", acct("1")),
            PrefixConfig::new("/db1/t", acct("1t")),
            PrefixConfig::new("/db2", acct("2")),
            PrefixConfig::new("/db4", acct("4")),
        ])
        .unwrap();
        assert_eq!(
            entries(&map),
            vec![
                ("", None, "d"),
                ("/db1", None, "1"),
                ("/db1/t", None, "1t"),
                ("/db1/u", Some("/db1"), "1"),
                ("/db2", None, "2"),
                ("/db3", Some(""), "d"),
                ("/db4", None, "4"),
                ("/db5", Some(""), "d"),
            ]
        );

        let matched = |k: &str| map.match_by_prefix(&Key::from(k)).unwrap().config.cluster_id.clone();
        assert_eq!(matched("/db0"), "d");
        assert_eq!(matched("/db1"), "1");
        assert_eq!(matched("/db1/table"), "1t");
        assert_eq!(matched("/db1/z"), "1");
        assert_eq!(matched("/db2/x"), "2");
        assert_eq!(matched("/db3"), "d");
        assert_eq!(matched("zzz"), "d");
    }

    #[test]
    fn family_builds_from_rows() {
        let fam = CONFIG_FAMILIES[0];
        let rows = vec![
            (Key::from(KEY_CONFIG_ACCOUNTING_PREFIX), Value::from(br#"{"cluster_id":"a"}"#.to_vec())),
            (
                Key::from(KEY_CONFIG_ACCOUNTING_PREFIX).join(b"/db1"),
                Value::from(br#"{"cluster_id":"b"}"#.to_vec()),
            ),
        ];
        let json = fam.build_map(&rows).unwrap();
        let map: PrefixConfigMap<AcctConfig> = serde_json::from_value(json).unwrap();
        assert_eq!(map.len(), 3);
        assert_eq!(map.match_by_prefix(&"/db1/x".into()).unwrap().config, acct("b"));

        let bad = vec![(Key::from(KEY_CONFIG_ACCOUNTING_PREFIX), Value::from(7))];
        assert!(matches!(fam.build_map(&bad), Err(ConfigError::NotBytes(_))));
        let bad = vec![(Key::from(KEY_CONFIG_ACCOUNTING_PREFIX), Value::from("nope"))];
        assert!(matches!(fam.build_map(&bad), Err(ConfigError::Decode { .. })));
    }

    #[test]
    fn range_config_defaults() {
        let cfg: RangeConfig = serde_json::from_str(r#"{"heartbeat_interval_ms": 10}"#).unwrap();
        assert_eq!(cfg.heartbeat_interval(), Duration::from_millis(10));
        assert_eq!(cfg.ts_cache_max_entries, 65_536);
        assert_eq!(cfg.resp_cache_retention(), Duration::from_secs(600));
    }
}
