//! Logging bootstrap for SerinDB processes.
use anyhow::Result;
use std::path::Path;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, reload, util::SubscriberInitExt, EnvFilter, Registry};

/// Handle for changing the log filter of a running process.
pub type ReloadHandle = reload::Handle<EnvFilter, Registry>;

/// Installs the global subscriber: human readable output on stderr and, when
/// `dir` is given, hourly rolling JSON files named `serindb.log.*` in it.
///
/// `filter` uses `RUST_LOG` syntax (e.g. `info` or `serin_range=debug`).
/// Returns a handle that can replace the filter at runtime.
pub fn init(dir: Option<&Path>, filter: &str) -> Result<ReloadHandle> {
    let (filter_layer, handle) = reload::Layer::new(EnvFilter::try_new(filter)?);
    let file_layer = dir.map(|dir| {
        let appender = RollingFileAppender::new(Rotation::HOURLY, dir, "serindb.log");
        fmt::layer()
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .with_writer(appender)
    });

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()?;
    Ok(handle)
}

/// Replaces the active filter.
pub fn set_filter(handle: &ReloadHandle, filter: &str) -> Result<()> {
    handle.reload(EnvFilter::try_new(filter)?)?;
    Ok(())
}
