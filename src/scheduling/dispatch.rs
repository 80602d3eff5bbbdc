//! Ticker-driven timing wheel that dispatches fired callbacks onto a `WorkerPool`.
//!
//! The ticker thread sleeps until absolute tick deadlines, so a late wake-up is
//! caught up rather than pushing every later tick back. On each tick it advances
//! the wheel under the wheel lock, releases the lock, and only then submits the
//! fired callbacks to the pool; the two locks are never held together.
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, trace, warn};

use crate::concurrency::pool::WorkerPool;
use crate::concurrency::Job;
use crate::config::{WheelConfig, DEFAULT_SLOTS};
use crate::DispatchError;

use super::wheel::{ticks_for, Wheel};
use super::TimerId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum RunState {
    Idle,
    Running,
    Stopped,
}

struct Shared<const SLOTS: usize> {
    wheel: Mutex<Wheel<Job, SLOTS>>,
    pool: Arc<WorkerPool>,
    tick: Duration,
    state: Mutex<RunState>,
    wake: Condvar,
}

impl<const SLOTS: usize> Shared<SLOTS> {
    fn run(&self) {
        let mut fired = Vec::new();
        let mut deadline = Instant::now() + self.tick;
        loop {
            {
                let mut state = self.state.lock();
                while *state == RunState::Running {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
                if *state != RunState::Running {
                    break;
                }
            }
            deadline += self.tick;
            self.advance(&mut fired);
        }
        trace!("ticker exiting");
    }

    fn advance(&self, fired: &mut Vec<(TimerId, Job)>) {
        let elapsed = {
            let mut wheel = self.wheel.lock();
            wheel.advance(fired);
            wheel.elapsed()
        };
        if fired.is_empty() {
            return;
        }
        trace!(tick = elapsed, fired = fired.len(), "dispatching fired timers");
        for (id, job) in fired.drain(..) {
            if let Err(err) = self.pool.execute(job) {
                warn!(timer = id.get(), %err, "dropping fired timer");
            }
        }
    }
}

/// Timing wheel with `SLOTS` buckets, advanced by its own ticker thread.
///
/// Timers can be added before `start`; they count ticks from the moment they
/// are added. Once `stop` has run the wheel is inert: pending timers are
/// dropped without running and new ones are rejected.
pub struct TimingWheel<const SLOTS: usize = DEFAULT_SLOTS> {
    shared: Arc<Shared<SLOTS>>,
    ticker: Mutex<Option<JoinHandle<()>>>,
    thread_name: String,
}

impl<const SLOTS: usize> TimingWheel<SLOTS> {
    pub fn new(tick: Duration, pool: Arc<WorkerPool>) -> Result<Self, DispatchError> {
        Self::with_config(WheelConfig::new(tick), pool)
    }

    pub fn with_config(config: WheelConfig, pool: Arc<WorkerPool>) -> Result<Self, DispatchError> {
        if config.tick.is_zero() {
            return Err(DispatchError::ZeroTick);
        }
        let wheel = Wheel::new()?;
        Ok(Self {
            shared: Arc::new(Shared {
                wheel: Mutex::new(wheel),
                pool,
                tick: config.tick,
                state: Mutex::new(RunState::Idle),
                wake: Condvar::new(),
            }),
            ticker: Mutex::new(None),
            thread_name: config.thread_name,
        })
    }

    /// Spawn the ticker. Starting a running wheel does nothing; a stopped wheel
    /// cannot be restarted.
    pub fn start(&self) -> Result<(), DispatchError> {
        let mut ticker = self.ticker.lock();
        {
            let mut state = self.shared.state.lock();
            match *state {
                RunState::Running => return Ok(()),
                RunState::Stopped => return Err(DispatchError::WheelStopped),
                RunState::Idle => *state = RunState::Running,
            }
        }
        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name(self.thread_name.clone())
            .spawn(move || shared.run());
        match spawned {
            Ok(handle) => {
                *ticker = Some(handle);
                debug!(tick = ?self.shared.tick, slots = SLOTS, "timing wheel started");
                Ok(())
            }
            Err(err) => {
                *self.shared.state.lock() = RunState::Idle;
                Err(err.into())
            }
        }
    }

    /// Stop and join the ticker, then drop every pending timer. No callback is
    /// handed to the pool once this returns.
    pub fn stop(&self) {
        let mut ticker = self.ticker.lock();
        {
            let mut state = self.shared.state.lock();
            if *state == RunState::Stopped {
                return;
            }
            *state = RunState::Stopped;
        }
        self.shared.wake.notify_all();
        if let Some(handle) = ticker.take() {
            // the last handle can be dropped by the ticker itself when the pool
            // rejects a fired callback that owned it; it exits on its next check
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                warn!("ticker thread exited abnormally");
            }
        }
        drop(ticker);

        let pending = self.shared.wheel.lock().drain();
        debug!(pending = pending.len(), "timing wheel stopped");
    }

    /// Schedule `callback` to run on the pool once `delay` has elapsed.
    ///
    /// Delays shorter than one tick fire on the next tick. Returns
    /// `TimerId::INVALID` if the wheel is stopped or the delay cannot be
    /// represented in ticks.
    pub fn add_timer<F>(&self, delay: Duration, callback: F) -> TimerId
    where
        F: FnOnce() + Send + 'static,
    {
        self.add_boxed(delay, Box::new(callback))
    }

    pub fn add_boxed(&self, delay: Duration, callback: Job) -> TimerId {
        let Some(ticks) = ticks_for(delay, self.shared.tick) else {
            warn!(?delay, tick = ?self.shared.tick, "timer delay exceeds the wheel's range");
            return TimerId::INVALID;
        };
        // `stop` publishes Stopped before draining, so checking under the wheel
        // lock means every accepted timer is either drained or fires
        let mut wheel = self.shared.wheel.lock();
        if *self.shared.state.lock() == RunState::Stopped {
            drop(wheel);
            warn!(?delay, "timer added to a stopped wheel");
            return TimerId::INVALID;
        }
        wheel.schedule(ticks, callback)
    }

    /// Cancel a timer that has not fired yet. `false` for unknown, fired, or
    /// already cancelled ids, including timers already handed to the pool.
    pub fn cancel_timer(&self, id: TimerId) -> bool {
        let cancelled = self.shared.wheel.lock().cancel(id);
        if cancelled.is_none() {
            trace!(timer = id.get(), "cancel ignored");
        }
        cancelled.is_some()
    }

    pub fn tick(&self) -> Duration {
        self.shared.tick
    }

    /// Ticks processed since the wheel was created.
    pub fn elapsed(&self) -> u64 {
        self.shared.wheel.lock().elapsed()
    }

    pub fn cursor(&self) -> usize {
        self.shared.wheel.lock().cursor()
    }

    /// Timers waiting to fire.
    pub fn pending(&self) -> usize {
        self.shared.wheel.lock().len()
    }

    pub fn is_running(&self) -> bool {
        *self.shared.state.lock() == RunState::Running
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.shared.pool
    }
}

impl<const SLOTS: usize> Drop for TimingWheel<SLOTS> {
    fn drop(&mut self) {
        self.stop();
    }
}
