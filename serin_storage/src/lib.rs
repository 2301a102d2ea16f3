//! SerinDB storage layer: the multi-version key/value engine interface consumed
//! by range replicas, plus an in-memory implementation.
#![deny(missing_docs)]

mod engine;
mod mem;
mod stats;
mod value;

pub use engine::{MvccEngine, Result, StorageError};
pub use mem::MemEngine;
pub use stats::{MvccStats, VERSION_OVERHEAD};
pub use value::Value;
