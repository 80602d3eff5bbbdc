//! Blocking task queue and the fixed-size worker pool that drains it.
//!
//! Work travels through the pool as boxed `Dispatchable` values: the pool never
//! needs to know what a task captured, only how to run it once.
use std::any::Any;

pub mod pool;
pub mod queue;

/// A unit of deferred work, invoked at most once.
pub trait Dispatchable: Send + 'static {
    fn invoke(self: Box<Self>);
}

impl<F> Dispatchable for F
where
    F: FnOnce() + Send + 'static,
{
    fn invoke(self: Box<Self>) {
        (*self)()
    }
}

/// Type-erased work as stored in queues and timer buckets.
pub type Job = Box<dyn Dispatchable>;

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
