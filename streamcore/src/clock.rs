//! Clock abstraction used to stamp `ClockUpdate` packets.
//!
//! A Node only needs to *read* the current time when it emits a clock
//! update — there is no tick to wait for, since dispatch is driven by
//! readiness, not by the clock. The trait is a plain, synchronous
//! `now()` query so hardware-backed clocks can be swapped in without
//! touching call sites.

use std::time::{Instant, SystemTime, UNIX_EPOCH};

/// Monotonic-and-wall-clock pair used when stamping `ClockUpdate` packets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockTime {
    /// Seconds since UNIX epoch, for presentation/logging.
    pub wall_time: f64,
    /// Nanoseconds on a monotonic, non-adjustable timeline; the only
    /// value the scheduler may use for ordering or rate computation.
    pub monotonic_nanos: u64,
}

/// Abstract clock interface. Implementations provide a `clock_id` used in
/// `Global` properties and a `now()` reading used for clock updates.
pub trait Clock: Send + Sync {
    fn now(&self) -> ClockTime;
    fn clock_id(&self) -> &str;
}

/// Free-running software clock backed by `Instant`/`SystemTime`. The only
/// clock implementation this core ships; hardware-synced clocks (PTP,
/// genlock) are external collaborators wired in by implementing this
/// same trait.
pub struct SoftwareClock {
    clock_id: String,
    start_instant: Instant,
    start_wall: f64,
}

impl SoftwareClock {
    pub fn new() -> Self {
        Self::with_id("software")
    }

    pub fn with_id(clock_id: impl Into<String>) -> Self {
        let start_wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_secs_f64();
        Self {
            clock_id: clock_id.into(),
            start_instant: Instant::now(),
            start_wall,
        }
    }
}

impl Default for SoftwareClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SoftwareClock {
    fn now(&self) -> ClockTime {
        let elapsed = self.start_instant.elapsed();
        ClockTime {
            wall_time: self.start_wall + elapsed.as_secs_f64(),
            monotonic_nanos: elapsed.as_nanos() as u64,
        }
    }

    fn clock_id(&self) -> &str {
        &self.clock_id
    }
}
