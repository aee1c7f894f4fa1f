//! `Join` — window-correlated pairing of two rails.
//!
//! # Why
//! Plain `Subscriber<T>` carries no notion of time, so this operator's
//! input rails are `(item, timestamp)` pairs rather than bare items — the
//! timestamp is supplied by the caller (a logical clock or real elapsed
//! ticks) instead of being read from a wall clock inside the operator,
//! which keeps window-correlation deterministic and testable (e.g.
//! `L1@t=0`, `R1@t=5`, …).
//!
//! Incoming signals from both rails funnel through one small-locked, tagged
//! queue — an MPSC-style tagged message queue under a small lock, the one
//! acceptable non-lock-free spot in this crate's concurrency model — and
//! are only ever touched from inside the `wip` drain loop, confining the
//! shared maps to a single serialized section.
//!
//! Demand exhaustion mid-pairing is a terminal `operator.insufficient_requests`
//! error, not a buffered wait — stricter than typical Rx `join`, preserved
//! deliberately.
use alloc::boxed::Box;
use alloc::collections::{BTreeMap, VecDeque};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::demand::Demand;
use crate::error::{codes, FlowError};
use crate::fusion::{FusionMode, QueueSubscription};
use crate::subscriber::{Subscriber, Subscription};

enum Event<L, R> {
    Left(u64, L, u64),
    Right(u64, R, u64),
    LeftComplete,
    RightComplete,
    Error(FlowError),
}

/// The two-rail window-join coordinator.
pub struct Join<L, R, O>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static,
{
    self_ref: Arc<JoinInner<L, R, O>>,
}

struct JoinInner<L, R, O>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static,
{
    selector: Arc<dyn Fn(&L, &R) -> O + Send + Sync>,
    left_window: u64,
    right_window: u64,
    downstream: spin::Mutex<Option<Box<dyn Subscriber<O>>>>,

    queue: spin::Mutex<VecDeque<Event<L, R>>>,
    lefts: spin::Mutex<BTreeMap<u64, (L, u64)>>,
    rights: spin::Mutex<BTreeMap<u64, (R, u64)>>,
    next_left_id: AtomicU64,
    next_right_id: AtomicU64,
    active: AtomicU64,

    requested: Demand,
    wip: AtomicU64,
    cancelled: AtomicBool,
}

impl<L, R, O> Join<L, R, O>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static,
{
    pub fn new(
        left_window: u64,
        right_window: u64,
        selector: impl Fn(&L, &R) -> O + Send + Sync + 'static,
        downstream: Box<dyn Subscriber<O>>,
    ) -> Self {
        Self {
            self_ref: Arc::new(JoinInner {
                selector: Arc::new(selector),
                left_window,
                right_window,
                downstream: spin::Mutex::new(Some(downstream)),
                queue: spin::Mutex::new(VecDeque::new()),
                lefts: spin::Mutex::new(BTreeMap::new()),
                rights: spin::Mutex::new(BTreeMap::new()),
                next_left_id: AtomicU64::new(0),
                next_right_id: AtomicU64::new(0),
                active: AtomicU64::new(2),
                requested: Demand::new(),
                wip: AtomicU64::new(0),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// Deliver the downstream its `Subscription` and start accepting rail
    /// signals. Must be called once before feeding either rail.
    pub fn start(&self) {
        let subscription: Box<dyn QueueSubscription<O>> =
            Box::new(JoinSubscription(Arc::clone(&self.self_ref)));
        if let Some(downstream) = self.self_ref.downstream.lock().as_mut() {
            downstream.on_subscribe(subscription);
        }
    }

    pub fn left_rail(&self) -> impl Subscriber<(L, u64)> {
        LeftRail(Arc::clone(&self.self_ref))
    }

    pub fn right_rail(&self) -> impl Subscriber<(R, u64)> {
        RightRail(Arc::clone(&self.self_ref))
    }
}

struct JoinSubscription<L, R, O>(Arc<JoinInner<L, R, O>>)
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static;

impl<L: Clone + Send + 'static, R: Clone + Send + 'static, O: Send + 'static> Subscription
    for JoinSubscription<L, R, O>
{
    fn request(&self, n: u64) {
        if n == 0 {
            crate::error::unsignalled::report(FlowError::new(
                codes::PROTOCOL_NON_POSITIVE_REQUEST,
                "request(n) requires n >= 1",
            ));
            return;
        }
        self.0.requested.add(n);
        self.0.drain_entry();
    }
    fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.0.drain_entry();
    }
}

impl<L: Clone + Send + 'static, R: Clone + Send + 'static, O: Send + 'static> QueueSubscription<O>
    for JoinSubscription<L, R, O>
{
}

struct LeftRail<L, R, O>(Arc<JoinInner<L, R, O>>)
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static;
struct RightRail<L, R, O>(Arc<JoinInner<L, R, O>>)
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static;

impl<L: Clone + Send + 'static, R: Clone + Send + 'static, O: Send + 'static> Subscriber<(L, u64)>
    for LeftRail<L, R, O>
{
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<(L, u64)>>) {
        // Join does not honor upstream backpressure: it requests everything
        // up front and instead fails downstream demand exhaustion as a
        // terminal error.
        subscription.request(crate::demand::UNBOUNDED);
    }
    fn on_next(&mut self, (item, time): (L, u64)) {
        let id = self.0.next_left_id.fetch_add(1, Ordering::AcqRel);
        self.0.queue.lock().push_back(Event::Left(id, item, time));
        self.0.drain_entry();
    }
    fn on_error(&mut self, error: FlowError) {
        self.0.queue.lock().push_back(Event::Error(error));
        self.0.drain_entry();
    }
    fn on_complete(&mut self) {
        self.0.queue.lock().push_back(Event::LeftComplete);
        self.0.drain_entry();
    }
}

impl<L: Clone + Send + 'static, R: Clone + Send + 'static, O: Send + 'static> Subscriber<(R, u64)>
    for RightRail<L, R, O>
{
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<(R, u64)>>) {
        subscription.request(crate::demand::UNBOUNDED);
    }
    fn on_next(&mut self, (item, time): (R, u64)) {
        let id = self.0.next_right_id.fetch_add(1, Ordering::AcqRel);
        self.0.queue.lock().push_back(Event::Right(id, item, time));
        self.0.drain_entry();
    }
    fn on_error(&mut self, error: FlowError) {
        self.0.queue.lock().push_back(Event::Error(error));
        self.0.drain_entry();
    }
    fn on_complete(&mut self) {
        self.0.queue.lock().push_back(Event::RightComplete);
        self.0.drain_entry();
    }
}

impl<L, R, O> JoinInner<L, R, O>
where
    L: Clone + Send + 'static,
    R: Clone + Send + 'static,
    O: Send + 'static,
{
    fn drain_entry(self: &Arc<Self>) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1u64;
        loop {
            self.drain_once();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn drain_once(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) {
            self.cleanup();
            return;
        }
        loop {
            let event = self.queue.lock().pop_front();
            let Some(event) = event else { return };
            match event {
                Event::Left(id, item, time) => {
                    let expiry = time.saturating_add(self.left_window);
                    let pairs: Vec<O> = {
                        let mut rights = self.rights.lock();
                        rights.retain(|_, (_, rexpiry)| *rexpiry > time);
                        rights
                            .values()
                            .map(|(r, _)| (self.selector)(&item, r))
                            .collect()
                    };
                    self.lefts.lock().insert(id, (item, expiry));
                    if !self.emit(pairs) {
                        return;
                    }
                }
                Event::Right(id, item, time) => {
                    let expiry = time.saturating_add(self.right_window);
                    let pairs: Vec<O> = {
                        let mut lefts = self.lefts.lock();
                        lefts.retain(|_, (_, lexpiry)| *lexpiry > time);
                        lefts
                            .values()
                            .map(|(l, _)| (self.selector)(l, &item))
                            .collect()
                    };
                    self.rights.lock().insert(id, (item, expiry));
                    if !self.emit(pairs) {
                        return;
                    }
                }
                Event::LeftComplete | Event::RightComplete => {
                    if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
                        self.terminate_with_complete();
                        return;
                    }
                }
                Event::Error(error) => {
                    self.terminate_with_error(error);
                    return;
                }
            }
        }
    }

    /// Emit a batch of freshly-correlated pairs. Returns `false` if the
    /// drain loop already terminated (demand exhausted) and the caller
    /// must stop processing further queued events.
    fn emit(self: &Arc<Self>, pairs: Vec<O>) -> bool {
        if pairs.is_empty() {
            return true;
        }
        let pair_count = pairs.len() as u64;
        let requested = self.requested.get();
        if requested != crate::demand::UNBOUNDED && requested < pair_count {
            self.terminate_with_error(FlowError::new(
                codes::OPERATOR_INSUFFICIENT_REQUESTS,
                "join produced more correlated pairs than outstanding demand",
            ));
            return false;
        }
        {
            let mut downstream = self.downstream.lock();
            if let Some(sink) = downstream.as_mut() {
                for pair in pairs.into_iter() {
                    sink.on_next(pair);
                }
            }
        }
        self.requested.sub(pair_count);
        true
    }

    fn cleanup(&self) {
        self.queue.lock().clear();
        self.lefts.lock().clear();
        self.rights.lock().clear();
    }

    fn terminate_with_error(&self, error: FlowError) {
        self.cancelled.store(true, Ordering::Release);
        self.cleanup();
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_error(error);
        }
        *self.downstream.lock() = None;
    }

    fn terminate_with_complete(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.cleanup();
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_complete();
        }
        *self.downstream.lock() = None;
    }
}
