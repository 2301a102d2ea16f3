//! SerinDB transaction primitives: keys, hybrid logical timestamps, the clock
//! issuing them, and the transaction record state machine shared by every
//! range replica.
#![deny(missing_docs)]

mod clock;
mod error;
mod keys;
pub mod record;
mod timestamp;
mod txn;

pub use clock::{Clock, ManualClock, PhysicalClock, SystemClock};
pub use error::{Result, TxnError};
pub use keys::{Key, KeySpan, KEY_MIN};
pub use record::{PushArgs, RecordUpdate};
pub use timestamp::Timestamp;
pub use txn::{make_priority, IsolationLevel, Transaction, TxnId, TxnStatus};
