//! Construction parameters for the worker pool and the timing wheel.
use std::time::Duration;

/// Slot count used when a `TimingWheel` is named without one.
pub const DEFAULT_SLOTS: usize = 512;

/// Tick width used by `WheelConfig::default()`.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Number of worker threads spawned at construction.
    pub workers: usize,
    /// Prefix for worker thread names, suffixed with the worker index.
    pub thread_name: String,
}

impl PoolConfig {
    pub fn new(workers: usize) -> Self {
        Self {
            workers,
            ..Self::default()
        }
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: num_cpus::get(),
            thread_name: "tickwheel-worker".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelConfig {
    /// Width of one tick; the cursor advances once per tick.
    pub tick: Duration,
    /// Name given to the ticker thread.
    pub thread_name: String,
}

impl WheelConfig {
    pub fn new(tick: Duration) -> Self {
        Self {
            tick,
            ..Self::default()
        }
    }

    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }
}

impl Default for WheelConfig {
    fn default() -> Self {
        Self {
            tick: DEFAULT_TICK,
            thread_name: "tickwheel-ticker".to_string(),
        }
    }
}
