//! Timer scheduling on a hashed timing wheel.
//!
//! `wheel` holds the thread-free slot + rotation structure, `dispatch` drives it
//! from a ticker thread and hands fired callbacks to a `WorkerPool`.
use std::fmt::Display;

pub mod dispatch;
pub mod wheel;

/// Identity of a scheduled timer. Ids are issued in increasing order starting at 1.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    /// Returned when a timer could not be scheduled; cancelling it is a no-op.
    pub const INVALID: TimerId = TimerId(0);

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_valid(self) -> bool {
        self != Self::INVALID
    }
}

impl Display for TimerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Lifecycle of a timer. Both non-`Scheduled` states are terminal.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TimerState {
    Scheduled,
    Fired,
    Cancelled,
}
