//! Fixed-size worker pool.
//!
//! Workers are spawned once at construction and live until `shutdown`. Each one
//! blocks on the shared `TaskQueue` and runs whatever it dequeues; a panicking
//! task is caught and reported through its own handle, so the worker keeps going.
//! Shutdown discards tasks that no worker has picked up yet and lets running
//! tasks finish.
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam::channel::{self, Receiver, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::PoolConfig;
use crate::DispatchError;

use super::queue::TaskQueue;
use super::{panic_message, Job};

/// Eventual result of a task submitted with `WorkerPool::submit`.
#[derive(Debug)]
pub struct TaskHandle<R> {
    result: Receiver<Result<R, DispatchError>>,
}

impl<R> TaskHandle<R> {
    fn resolved(outcome: Result<R, DispatchError>) -> Self {
        let (tx, rx) = channel::bounded(1);
        let _ = tx.send(outcome);
        Self { result: rx }
    }

    /// Block until the task has run (or has been discarded).
    pub fn wait(self) -> Result<R, DispatchError> {
        self.result
            .recv()
            .unwrap_or(Err(DispatchError::TaskDiscarded))
    }

    /// Like `wait`, but hands the handle back if nothing arrived within `timeout`.
    pub fn wait_timeout(self, timeout: Duration) -> Result<Result<R, DispatchError>, Self> {
        match self.result.recv_timeout(timeout) {
            Ok(outcome) => Ok(outcome),
            Err(RecvTimeoutError::Disconnected) => Ok(Err(DispatchError::TaskDiscarded)),
            Err(RecvTimeoutError::Timeout) => Err(self),
        }
    }

    /// Take the result if it is ready, without blocking.
    ///
    /// The result is handed out once; later calls report `TaskDiscarded`.
    pub fn try_get(&self) -> Option<Result<R, DispatchError>> {
        match self.result.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Disconnected) => Some(Err(DispatchError::TaskDiscarded)),
            Err(TryRecvError::Empty) => None,
        }
    }

    /// True once a result is ready to be taken.
    pub fn is_finished(&self) -> bool {
        !self.result.is_empty()
    }
}

/// Fixed set of worker threads draining one shared `TaskQueue`.
pub struct WorkerPool {
    queue: Arc<TaskQueue<Job>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    size: usize,
    running: AtomicBool,
}

impl WorkerPool {
    /// Pool of `workers` threads with default naming.
    pub fn new(workers: usize) -> Result<Self, DispatchError> {
        Self::with_config(PoolConfig::new(workers))
    }

    pub fn with_config(config: PoolConfig) -> Result<Self, DispatchError> {
        if config.workers == 0 {
            return Err(DispatchError::NoWorkers);
        }
        let queue = Arc::new(TaskQueue::new());
        let mut workers = Vec::with_capacity(config.workers);
        for index in 0..config.workers {
            let queue_ref = Arc::clone(&queue);
            let spawned = thread::Builder::new()
                .name(format!("{}-{index}", config.thread_name))
                .spawn(move || run_worker(index, &queue_ref));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    // release whatever already started before reporting
                    queue.close();
                    for handle in workers {
                        let _ = handle.join();
                    }
                    return Err(err.into());
                }
            }
        }
        debug!(workers = config.workers, "worker pool started");
        Ok(Self {
            queue,
            workers: Mutex::new(workers),
            size: config.workers,
            running: AtomicBool::new(true),
        })
    }

    /// Queue `task` and return a handle to its result.
    ///
    /// After shutdown the handle comes back already resolved to
    /// `DispatchError::PoolStopped`; a panic inside `task` resolves it to
    /// `DispatchError::TaskPanicked`.
    pub fn submit<F, R>(&self, task: F) -> TaskHandle<R>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (tx, rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task)).map_err(|payload| {
                let msg = panic_message(&*payload);
                debug!(panic = %msg, "submitted task panicked");
                DispatchError::TaskPanicked(msg)
            });
            // the caller may have dropped its handle
            let _ = tx.send(outcome);
        });
        match self.queue.push(job) {
            Ok(()) => TaskHandle { result: rx },
            Err(_) => {
                warn!("task submitted to a stopped worker pool");
                TaskHandle::resolved(Err(DispatchError::PoolStopped))
            }
        }
    }

    /// Fire-and-forget submission of already boxed work.
    pub fn execute(&self, job: Job) -> Result<(), DispatchError> {
        self.queue
            .push(job)
            .map_err(|_| DispatchError::PoolStopped)
    }

    /// Stop accepting work, drop everything still queued, and join the workers.
    ///
    /// Tasks that a worker already started run to completion. Calling this from
    /// inside a task is allowed; that worker is simply not joined.
    pub fn shutdown(&self) {
        if !self.running.swap(false, Ordering::AcqRel) {
            return;
        }
        let discarded = self.queue.close();
        if !discarded.is_empty() {
            debug!(tasks = discarded.len(), "discarding queued tasks on shutdown");
        }
        drop(discarded);

        let workers = std::mem::take(&mut *self.workers.lock());
        let current = thread::current().id();
        for handle in workers {
            if handle.thread().id() == current {
                continue;
            }
            if handle.join().is_err() {
                warn!("worker thread exited abnormally");
            }
        }
        debug!("worker pool stopped");
    }

    /// Number of worker threads the pool was built with.
    pub fn workers(&self) -> usize {
        self.size
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Tasks waiting for a free worker.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    #[cfg(test)]
    pub(crate) fn joinable_workers(&self) -> usize {
        self.workers.lock().len()
    }
}

impl fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.size)
            .field("queued", &self.queued())
            .field("running", &self.is_running())
            .finish()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(index: usize, queue: &TaskQueue<Job>) {
    trace!(worker = index, "worker waiting for tasks");
    while let Some(job) = queue.pop() {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job.invoke())) {
            warn!(worker = index, panic = %panic_message(&*payload), "dispatched task panicked");
        }
    }
    trace!(worker = index, "worker exiting");
}
