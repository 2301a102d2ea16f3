//! Process-wide Prometheus metrics for range command execution.
use anyhow::Result;
use once_cell::sync::Lazy;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, TextEncoder};

/// Commands executed, by method and outcome (`ok`, `replayed`, or an error kind).
pub static COMMANDS_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        Opts::new("serin_commands_total", "Range commands executed"),
        &["method", "outcome"]
    )
    .expect("register serin_commands_total")
});

/// Time spent waiting in the command queue for overlapping commands.
pub static CMD_QUEUE_WAIT_SECS: Lazy<Histogram> = Lazy::new(|| {
    let opts = HistogramOpts::new("serin_cmd_queue_wait_seconds", "Command queue wait in seconds")
        .buckets(vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]);
    prometheus::register_histogram!(opts).expect("register serin_cmd_queue_wait_seconds")
});

/// Commands whose timestamp was moved forward by the timestamp cache.
pub static TS_CACHE_PUSHES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    prometheus::register_int_counter!("serin_ts_cache_pushes_total", "Timestamps pushed by the timestamp cache")
        .expect("register serin_ts_cache_pushes_total")
});

/// Push-transaction attempts, by outcome (`pushed`, `noop`, `conflict`).
pub static TXN_PUSH_TOTAL: Lazy<IntCounterVec> = Lazy::new(|| {
    prometheus::register_int_counter_vec!(
        Opts::new("serin_txn_push_total", "Push transaction attempts"),
        &["outcome"]
    )
    .expect("register serin_txn_push_total")
});

/// Renders every registered metric in the Prometheus text format.
pub fn encode_text() -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&prometheus::gather(), &mut buffer)?;
    Ok(String::from_utf8(buffer)?)
}
