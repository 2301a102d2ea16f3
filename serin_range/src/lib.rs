//! Per-range concurrency control for SerinDB.
//!
//! A [`Range`] serves the keys `[start_key, end_key)` of one replication
//! group. Every command passes through the same pipeline: bounds check,
//! admission into the [`CommandQueue`], replay from the [`ResponseCache`],
//! timestamp adjustment against the [`TimestampCache`], proposal to the log,
//! and finally application to the MVCC engine.

mod cmd_queue;
mod command;
pub mod config;
mod descriptor;
mod error;
mod interval;
mod range;
mod resp_cache;
mod ts_cache;

pub use cmd_queue::{CmdHandle, CommandQueue, Prerequisites};
pub use command::{Command, Method, Request, RequestHeader, Response, ResponseBody, ResponseHeader};
pub use config::{PrefixConfig, PrefixConfigMap, RangeConfig};
pub use descriptor::RangeDescriptor;
pub use error::{RangeError, Result};
pub use range::Range;
pub use resp_cache::{ClientCmdId, ResponseCache};
pub use ts_cache::TimestampCache;
