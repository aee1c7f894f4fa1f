//! Scheduler abstraction.
//!
//! # Why
//! `ObserveOn` and any operator that crosses an execution boundary consumes
//! this abstraction rather than a concrete thread pool, keeping contract
//! code decoupled from a specific executor. Tasks here are plain `Runnable`
//! closures rather than an awaitable handle: `Worker::schedule` is
//! fire-and-forget plus a `Disposable` for cooperative cancellation, not a
//! future.
#[cfg(feature = "std")]
pub mod cached;

use alloc::boxed::Box;

/// A unit of work submitted to a [`Worker`].
pub type Runnable = Box<dyn FnOnce() + Send + 'static>;

/// A handle to a scheduled task, allowing cooperative cancellation before it
/// has started running.
pub trait Disposable: Send + Sync {
    /// Request cancellation. No-op if the task has already started running
    /// or finished; the race between cancellation and task assignment is
    /// resolved by CAS on a shared state cell.
    fn dispose(&self);
    /// True once the task is cancelled or has finished running.
    fn is_disposed(&self) -> bool;
}

/// A sequential execution context. Tasks submitted to the same `Worker` run
/// one at a time, in submission order, on whatever underlying thread the
/// scheduler assigns.
pub trait Worker: Send + Sync {
    /// Submit a task. Returns a [`Disposable`]; if the worker has been shut
    /// down, returns the `REJECTED` sentinel instead of running anything.
    fn schedule(&self, task: Runnable) -> Box<dyn Disposable>;
    /// Cancel every pending task tracked by this worker and release its
    /// underlying execution resource back to the scheduler's cache.
    fn shutdown(&self);
}

/// A source of [`Worker`]s, backed by a TTL-cached pool of execution
/// resources.
pub trait Scheduler: Send + Sync {
    /// Create a fresh sequential worker.
    fn create_worker(&self) -> Box<dyn Worker>;
    /// Transition the scheduler itself to a terminal state: every idle and
    /// tracked-live executor is shut down, and every future `create_worker`
    /// returns a worker whose `schedule` always rejects.
    fn shutdown(&self);
}

/// Process-lifetime sentinel: a [`Disposable`] that is always already
/// disposed.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectedDisposable;

impl Disposable for RejectedDisposable {
    fn dispose(&self) {}
    fn is_disposed(&self) -> bool {
        true
    }
}

/// Process-lifetime sentinel: a [`Worker`] whose `schedule` always returns
/// [`RejectedDisposable`] — the shut-down executor.
#[derive(Clone, Copy, Debug, Default)]
pub struct RejectedWorker;

impl Worker for RejectedWorker {
    fn schedule(&self, _task: Runnable) -> Box<dyn Disposable> {
        Box::new(RejectedDisposable)
    }
    fn shutdown(&self) {}
}
