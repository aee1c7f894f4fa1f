//! `CachedScheduler` — the minimal reference [`Scheduler`].
//!
//! # Why
//! Operators are written against the `Scheduler`/`Worker` traits; this is
//! the one concrete implementation the crate ships, using the same
//! free-list-over-a-spinlock shape as a buffer pool's idle list — here the
//! pooled resource is an OS thread instead of a reusable buffer. Idle
//! threads time themselves out via `recv_timeout`, which keeps the TTL
//! policy (configurable, default 60s) entirely inside the executor's own
//! loop rather than needing a janitor task.
use alloc::boxed::Box;
use alloc::collections::BTreeMap;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::mpsc;
use std::time::Duration;

use super::{Disposable, RejectedDisposable, RejectedWorker, Runnable, Scheduler, Worker};

const PENDING: u8 = 0;
const RUNNING: u8 = 1;
const FINISHED: u8 = 2;
const CANCELLED: u8 = 3;

const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// A single pooled OS thread draining a job channel. Exits once
/// `recv_timeout` elapses with nothing to do, or once its sender is
/// dropped.
struct Executor {
    sender: spin::Mutex<Option<mpsc::Sender<Runnable>>>,
}

impl Executor {
    fn spawn(ttl: Duration) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<Runnable>();
        let spawned = std::thread::Builder::new()
            .name("rxcore-scheduler".into())
            .spawn(move || loop {
                match rx.recv_timeout(ttl) {
                    Ok(job) => job(),
                    Err(_) => break,
                }
            });
        if let Err(error) = spawned {
            tracing::error!(%error, "failed to spawn scheduler thread");
        }
        Arc::new(Self {
            sender: spin::Mutex::new(Some(tx)),
        })
    }

    /// Returns `false` if the underlying thread has already exited.
    fn submit(&self, job: Runnable) -> bool {
        match self.sender.lock().as_ref() {
            Some(tx) => tx.send(job).is_ok(),
            None => false,
        }
    }

    fn shutdown(&self) {
        *self.sender.lock() = None;
    }
}

struct Inner {
    idle: spin::Mutex<alloc::vec::Vec<Arc<Executor>>>,
    shutdown: AtomicBool,
    ttl: Duration,
}

impl Inner {
    fn pick(&self) -> Arc<Executor> {
        match self.idle.lock().pop() {
            Some(executor) => executor,
            None => Executor::spawn(self.ttl),
        }
    }

    fn reclaim(&self, executor: Arc<Executor>) {
        if self.shutdown.load(Ordering::Acquire) {
            executor.shutdown();
        } else {
            self.idle.lock().push(executor);
        }
    }
}

/// A `Scheduler` whose workers borrow threads from an unbounded, TTL-evicted
/// idle pool.
pub struct CachedScheduler {
    inner: Arc<Inner>,
}

impl CachedScheduler {
    /// A scheduler with the default 60-second idle TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    /// A scheduler whose idle executors are reclaimed after `ttl` of
    /// inactivity.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                idle: spin::Mutex::new(alloc::vec::Vec::new()),
                shutdown: AtomicBool::new(false),
                ttl,
            }),
        }
    }
}

impl Default for CachedScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for CachedScheduler {
    fn create_worker(&self) -> Box<dyn Worker> {
        if self.inner.shutdown.load(Ordering::Acquire) {
            return Box::new(RejectedWorker);
        }
        Box::new(CachedWorker {
            inner: Arc::clone(&self.inner),
            executor: spin::Mutex::new(None),
            tasks: Arc::new(spin::Mutex::new(BTreeMap::new())),
            next_id: AtomicU64::new(0),
            shutdown: AtomicBool::new(false),
        })
    }

    fn shutdown(&self) {
        if self.inner.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        for executor in self.inner.idle.lock().drain(..) {
            executor.shutdown();
        }
    }
}

struct CachedWorker {
    inner: Arc<Inner>,
    executor: spin::Mutex<Option<Arc<Executor>>>,
    tasks: Arc<spin::Mutex<BTreeMap<u64, Arc<AtomicU8>>>>,
    next_id: AtomicU64,
    shutdown: AtomicBool,
}

impl Worker for CachedWorker {
    fn schedule(&self, task: Runnable) -> Box<dyn Disposable> {
        if self.shutdown.load(Ordering::Acquire) || self.inner.shutdown.load(Ordering::Acquire) {
            return Box::new(RejectedDisposable);
        }

        let executor = {
            let mut slot = self.executor.lock();
            if slot.is_none() {
                *slot = Some(self.inner.pick());
            }
            Arc::clone(slot.as_ref().unwrap())
        };

        let id = self.next_id.fetch_add(1, Ordering::AcqRel);
        let state = Arc::new(AtomicU8::new(PENDING));
        self.tasks.lock().insert(id, Arc::clone(&state));

        let tasks = Arc::clone(&self.tasks);
        let run_state = Arc::clone(&state);
        let job: Runnable = Box::new(move || {
            if run_state
                .compare_exchange(PENDING, RUNNING, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                task();
                run_state.store(FINISHED, Ordering::Release);
            }
            tasks.lock().remove(&id);
        });

        if !executor.submit(job) {
            self.tasks.lock().remove(&id);
            return Box::new(RejectedDisposable);
        }

        Box::new(TaskDisposable {
            state,
            tasks: Arc::clone(&self.tasks),
            id,
        })
    }

    fn shutdown(&self) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut tasks = self.tasks.lock();
        for state in tasks.values() {
            let _ = state.compare_exchange(
                PENDING,
                CANCELLED,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
        tasks.clear();
        drop(tasks);

        if let Some(executor) = self.executor.lock().take() {
            self.inner.reclaim(executor);
        }
    }
}

struct TaskDisposable {
    state: Arc<AtomicU8>,
    tasks: Arc<spin::Mutex<BTreeMap<u64, Arc<AtomicU8>>>>,
    id: u64,
}

impl Disposable for TaskDisposable {
    fn dispose(&self) {
        if self
            .state
            .compare_exchange(PENDING, CANCELLED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            self.tasks.lock().remove(&self.id);
        }
    }

    fn is_disposed(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), FINISHED | CANCELLED)
    }
}
