use parking_lot::Mutex;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::Timestamp;

/// Source of physical wall time in nanoseconds.
pub trait PhysicalClock: Send + Sync {
    /// Current wall time in nanoseconds since the Unix epoch.
    fn now_nanos(&self) -> i64;
}

/// Wall time read from the operating system.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl PhysicalClock for SystemClock {
    fn now_nanos(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as i64)
            .unwrap_or_default()
    }
}

/// Manually driven wall time, shared between clones.
#[derive(Debug, Default, Clone)]
pub struct ManualClock {
    nanos: Arc<AtomicI64>,
}

impl ManualClock {
    /// Starts at `nanos`.
    pub fn new(nanos: i64) -> Self {
        Self { nanos: Arc::new(AtomicI64::new(nanos)) }
    }

    /// Sets the wall time.
    pub fn set(&self, nanos: i64) {
        self.nanos.store(nanos, Ordering::SeqCst);
    }

    /// Advances the wall time by `nanos`.
    pub fn increment(&self, nanos: i64) {
        self.nanos.fetch_add(nanos, Ordering::SeqCst);
    }
}

impl PhysicalClock for ManualClock {
    fn now_nanos(&self) -> i64 {
        self.nanos.load(Ordering::SeqCst)
    }
}

/// Hybrid logical clock issuing monotonic [`Timestamp`]s.
///
/// The wall component follows the physical clock whenever it moves forward;
/// otherwise the logical component is bumped so successive readings remain
/// strictly increasing.
pub struct Clock {
    physical: Box<dyn PhysicalClock>,
    max_offset: Duration,
    state: Mutex<Timestamp>,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new(SystemClock, Duration::ZERO)
    }
}

impl std::fmt::Debug for Clock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Clock")
            .field("max_offset", &self.max_offset)
            .field("state", &*self.state.lock())
            .finish()
    }
}

impl Clock {
    /// Creates a clock over `physical` that tolerates `max_offset` of skew
    /// between nodes.
    pub fn new(physical: impl PhysicalClock + 'static, max_offset: Duration) -> Self {
        Self { physical: Box::new(physical), max_offset, state: Mutex::new(Timestamp::ZERO) }
    }

    /// Maximum clock skew between nodes.
    pub fn max_offset(&self) -> Duration {
        self.max_offset
    }

    /// Physical wall time, bypassing the logical state.
    pub fn physical_now(&self) -> i64 {
        self.physical.now_nanos()
    }

    /// Allocates a timestamp greater than every timestamp issued or observed.
    pub fn now(&self) -> Timestamp {
        let physical = self.physical.now_nanos();
        let mut state = self.state.lock();
        if state.wall_time >= physical {
            *state = state.next();
        } else {
            *state = Timestamp::new(physical, 0);
        }
        *state
    }

    /// Last timestamp issued or observed, without advancing the clock.
    pub fn timestamp(&self) -> Timestamp {
        *self.state.lock()
    }

    /// Folds a timestamp observed elsewhere into the clock so later readings
    /// order after it.
    pub fn update(&self, remote: Timestamp) -> Timestamp {
        let physical = self.physical.now_nanos();
        let mut state = self.state.lock();
        if physical > state.wall_time && physical > remote.wall_time {
            *state = Timestamp::new(physical, 0);
        } else {
            state.forward(remote);
        }
        *state
    }
}
