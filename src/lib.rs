//! Delayed-task dispatch built from a tick-driven hashed timing wheel and a fixed worker pool.
//!
//! ```no_run
//! use std::{sync::Arc, time::Duration};
//! use tickwheel::{concurrency::pool::WorkerPool, scheduling::dispatch::TimingWheel};
//!
//! let pool = Arc::new(WorkerPool::new(4)?);
//! let wheel: TimingWheel = TimingWheel::new(Duration::from_millis(100), Arc::clone(&pool))?;
//! wheel.start()?;
//!
//! let id = wheel.add_timer(Duration::from_millis(1500), || println!("timeout"));
//! wheel.cancel_timer(id);
//!
//! wheel.stop();
//! pool.shutdown();
//! # Ok::<(), tickwheel::DispatchError>(())
//! ```
use std::fmt::Display;

use thiserror::Error;

pub mod concurrency;
pub mod config;
pub mod scheduling;

/// Wrapper type for `std::io::Error`
#[derive(Debug, Error)]
pub struct IoError(std::io::Error);

impl PartialEq for IoError {
    fn eq(&self, other: &Self) -> bool {
        self.0.kind() == other.0.kind()
    }
}

impl Eq for IoError {}
impl Display for IoError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<std::io::Error> for DispatchError {
    fn from(err: std::io::Error) -> Self {
        DispatchError::Io { err: IoError(err) }
    }
}

/// Error type for the pool and the wheel
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Timing wheel must have at least one slot")]
    NoSlots,
    #[error("Tick width must be greater than zero")]
    ZeroTick,
    #[error("Worker pool must have at least one worker")]
    NoWorkers,
    #[error("Worker pool has been shut down")]
    PoolStopped,
    #[error("Timing wheel has been stopped")]
    WheelStopped,
    #[error("Task was discarded before any worker picked it up")]
    TaskDiscarded,
    #[error("Task panicked: {0}")]
    TaskPanicked(String),
    #[error("I/O error while spawning a thread {:?}", err)]
    Io {
        #[from]
        err: IoError,
    },
}
