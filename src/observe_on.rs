//! `ObserveOn` — moves downstream signalling onto a [`Worker`] while
//! preserving upstream emission order.
//!
//! # Why
//! This is the crate's canonical drain-loop operator: a bounded prefetch
//! queue, a `wip`-ticket critical section submitted as a single [`Runnable`]
//! per wake-up, and an optional `delayError` hold. Grounded the same way as
//! [`crate::deferred::multi::MultiSubscription`] — `wip.fetchAdd`/`fetchSub`
//! around a serialized reconciliation — but here the critical section runs
//! on a scheduler thread instead of on the calling thread, splitting
//! submission from execution.
//!
//! `ObserveOn` negotiates [`FusionMode::Any`] with its upstream and adapts
//! to whatever is granted. A `Sync`-fused upstream is synchronous and
//! finite, so `poll()` alone drives everything. An `Async`-fused upstream
//! calls `on_next` purely as a "work is ready" wake-up; the payload carried
//! on that call is irrelevant and is dropped, with the real values pulled
//! back out through `poll()` — so genericity over `T` is never a blocker.
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::demand::Demand;
use crate::error::{codes, FlowError};
use crate::fusion::{FusionMode, QueueSubscription};
use crate::scheduler::{Disposable, Worker};
use crate::subscriber::{ConditionalSubscriber, Subscriber, Subscription};

enum Downstream<T: Send + 'static> {
    Plain(Box<dyn Subscriber<T>>),
    Conditional(Box<dyn ConditionalSubscriber<T>>),
}

impl<T: Send + 'static> Downstream<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>) {
        match self {
            Downstream::Plain(d) => d.on_subscribe(subscription),
            Downstream::Conditional(d) => d.on_subscribe(subscription),
        }
    }

    /// Returns `true` if the item counted against outstanding demand.
    fn emit(&mut self, item: T) -> bool {
        match self {
            Downstream::Plain(d) => {
                d.on_next(item);
                true
            }
            Downstream::Conditional(d) => d.try_on_next(item),
        }
    }

    fn on_error(&mut self, error: FlowError) {
        match self {
            Downstream::Plain(d) => d.on_error(error),
            Downstream::Conditional(d) => d.on_error(error),
        }
    }

    fn on_complete(&mut self) {
        match self {
            Downstream::Plain(d) => d.on_complete(),
            Downstream::Conditional(d) => d.on_complete(),
        }
    }
}

/// The `ObserveOn` coordinator. Always constructed behind an `Arc` since it
/// plays three roles at once: the upstream-facing `Subscriber`, the
/// downstream-facing `Subscription`/`QueueSubscription`, and the `Runnable`
/// submitted to its `Worker`.
pub struct ObserveOn<T: Send + 'static> {
    self_ref: Arc<ObserveOnSelf<T>>,
}

struct ObserveOnSelf<T: Send + 'static> {
    weak: alloc::sync::Weak<ObserveOnSelf<T>>,
    downstream: spin::Mutex<Option<Downstream<T>>>,
    upstream: spin::Mutex<Option<Box<dyn QueueSubscription<T>>>>,
    fusion_mode: spin::Mutex<FusionMode>,
    queue: spin::Mutex<VecDeque<T>>,
    worker: Box<dyn Worker>,
    prefetch: u64,
    /// Replenishment threshold: once `prefetch - prefetch / 4` items have
    /// been pulled since the last replenishment, request that many more.
    limit: u64,
    consumed_since_replenish: AtomicU64,
    requested: Demand,
    wip: AtomicU64,
    upstream_done: AtomicBool,
    error: spin::Mutex<Option<FlowError>>,
    delay_error: bool,
    cancelled: AtomicBool,
    active: spin::Mutex<Option<Box<dyn Disposable>>>,
}

impl<T: Send + 'static> ObserveOn<T> {
    /// Build an `ObserveOn` stage delivering to a plain `Subscriber`.
    pub fn new(
        downstream: Box<dyn Subscriber<T>>,
        worker: Box<dyn Worker>,
        prefetch: u64,
        delay_error: bool,
    ) -> Self {
        Self::build(Downstream::Plain(downstream), worker, prefetch, delay_error)
    }

    /// Build an `ObserveOn` stage delivering to a `ConditionalSubscriber`:
    /// declined items don't count against outstanding demand.
    pub fn new_conditional(
        downstream: Box<dyn ConditionalSubscriber<T>>,
        worker: Box<dyn Worker>,
        prefetch: u64,
        delay_error: bool,
    ) -> Self {
        Self::build(
            Downstream::Conditional(downstream),
            worker,
            prefetch,
            delay_error,
        )
    }

    fn build(
        downstream: Downstream<T>,
        worker: Box<dyn Worker>,
        prefetch: u64,
        delay_error: bool,
    ) -> Self {
        let self_ref = Arc::new_cyclic(|weak| ObserveOnSelf {
            weak: weak.clone(),
            downstream: spin::Mutex::new(Some(downstream)),
            upstream: spin::Mutex::new(None),
            fusion_mode: spin::Mutex::new(FusionMode::None),
            queue: spin::Mutex::new(VecDeque::new()),
            worker,
            prefetch,
            limit: prefetch.saturating_sub(prefetch / 4),
            consumed_since_replenish: AtomicU64::new(0),
            requested: Demand::new(),
            wip: AtomicU64::new(0),
            upstream_done: AtomicBool::new(false),
            error: spin::Mutex::new(None),
            delay_error,
            cancelled: AtomicBool::new(false),
            active: spin::Mutex::new(None),
        });
        Self { self_ref }
    }

    /// The `Subscriber` handle to hand to whatever this stage's upstream
    /// publisher subscribes.
    pub fn as_upstream_subscriber(&self) -> impl Subscriber<T> {
        UpstreamHandle(Arc::clone(&self.self_ref))
    }
}

struct UpstreamHandle<T: Send + 'static>(Arc<ObserveOnSelf<T>>);

impl<T: Send + 'static> Subscriber<T> for UpstreamHandle<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>) {
        let granted = subscription.request_fusion(FusionMode::Any);
        *self.0.fusion_mode.lock() = granted;
        if granted != FusionMode::Sync {
            // Sync fusion needs no priming request: `poll()` alone drives
            // everything. Async and unfused upstreams both need the initial
            // prefetch to start producing.
            subscription.request(self.0.prefetch);
        }
        *self.0.upstream.lock() = Some(subscription);

        let handle: Box<dyn QueueSubscription<T>> = Box::new(DownstreamHandle(Arc::clone(&self.0)));
        if let Some(downstream) = self.0.downstream.lock().as_mut() {
            downstream.on_subscribe(handle);
        }
    }

    fn on_next(&mut self, item: T) {
        if self.0.cancelled.load(Ordering::Acquire) {
            return;
        }
        if *self.0.fusion_mode.lock() != FusionMode::Async {
            self.0.queue.lock().push_back(item);
        }
        // Under Async fusion `item` is just a wake signal; the real value
        // lives in the upstream's own queue and is pulled via `poll()`.
        self.0.try_schedule();
    }

    fn on_error(&mut self, error: FlowError) {
        let mut slot = self.0.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        } else {
            drop(slot);
            crate::error::unsignalled::report(error);
            return;
        }
        drop(slot);
        self.0.upstream_done.store(true, Ordering::Release);
        self.0.try_schedule();
    }

    fn on_complete(&mut self) {
        self.0.upstream_done.store(true, Ordering::Release);
        self.0.try_schedule();
    }
}

struct DownstreamHandle<T: Send + 'static>(Arc<ObserveOnSelf<T>>);

impl<T: Send + 'static> Subscription for DownstreamHandle<T> {
    fn request(&self, n: u64) {
        if n == 0 {
            crate::error::unsignalled::report(FlowError::new(
                codes::PROTOCOL_NON_POSITIVE_REQUEST,
                "request(n) requires n >= 1",
            ));
            return;
        }
        self.0.requested.add(n);
        self.0.try_schedule();
    }

    fn cancel(&self) {
        if self.0.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.0.try_schedule();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for DownstreamHandle<T> {}

impl<T: Send + 'static> ObserveOnSelf<T> {
    fn try_schedule(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let Some(this) = self.weak.upgrade() else {
            return;
        };
        let disposable = self.worker.schedule(Box::new(move || this.drain()));
        *self.active.lock() = Some(disposable);
    }

    fn drain(self: Arc<Self>) {
        let mut missed = 1u64;
        loop {
            self.drain_once();
            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }

    fn drain_once(&self) {
        if self.cancelled.load(Ordering::Acquire) {
            self.reclaim();
            return;
        }

        let requested = self.requested.get();
        let mut emitted = 0u64;
        loop {
            if self.cancelled.load(Ordering::Acquire) {
                self.reclaim();
                return;
            }
            if !self.delay_error {
                if let Some(error) = self.error.lock().take() {
                    self.terminate_with_error(error);
                    return;
                }
            }
            if emitted >= requested {
                break;
            }
            let item = self.pull();
            match item {
                Some(item) => {
                    self.replenish_if_due();
                    let consumed = {
                        let mut downstream = self.downstream.lock();
                        downstream
                            .as_mut()
                            .map(|d| d.emit(item))
                            .unwrap_or(false)
                    };
                    if consumed {
                        emitted += 1;
                    }
                }
                None => {
                    if self.upstream_done.load(Ordering::Acquire) && self.is_empty() {
                        if self.delay_error {
                            if let Some(error) = self.error.lock().take() {
                                self.terminate_with_error(error);
                                return;
                            }
                        }
                        self.terminate_with_complete();
                        return;
                    }
                    break;
                }
            }
        }
        if emitted > 0 {
            self.requested.sub(emitted);
        }
    }

    fn pull(&self) -> Option<T> {
        match *self.fusion_mode.lock() {
            FusionMode::Sync | FusionMode::Async => {
                self.upstream.lock().as_ref().and_then(|u| u.poll())
            }
            _ => self.queue.lock().pop_front(),
        }
    }

    fn is_empty(&self) -> bool {
        match *self.fusion_mode.lock() {
            FusionMode::Sync | FusionMode::Async => {
                self.upstream.lock().as_ref().map_or(true, |u| u.is_empty())
            }
            _ => self.queue.lock().is_empty(),
        }
    }

    /// Once `limit` items have been pulled since the last replenishment,
    /// request that many more from upstream and reset the counter.
    fn replenish_if_due(&self) {
        if self.limit == 0 {
            return;
        }
        let pulled = self.consumed_since_replenish.fetch_add(1, Ordering::AcqRel) + 1;
        if pulled >= self.limit {
            self.consumed_since_replenish.store(0, Ordering::Release);
            if let Some(upstream) = self.upstream.lock().as_ref() {
                upstream.request(pulled);
            }
        }
    }

    fn reclaim(&self) {
        if let Some(upstream) = self.upstream.lock().take() {
            upstream.cancel();
        }
        self.queue.lock().clear();
        self.worker.shutdown();
    }

    fn terminate_with_error(&self, error: FlowError) {
        self.cancelled.store(true, Ordering::Release);
        self.reclaim();
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_error(error);
        }
        *self.downstream.lock() = None;
    }

    fn terminate_with_complete(&self) {
        self.cancelled.store(true, Ordering::Release);
        self.reclaim();
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_complete();
        }
        *self.downstream.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::cached::CachedScheduler;
    use crate::scheduler::Scheduler;
    use crate::testing::RecordingSubscriber;
    use std::time::Duration;

    #[test]
    fn preserves_order_and_completes() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scheduler = CachedScheduler::with_ttl(Duration::from_millis(200));
        let worker = scheduler.create_worker();
        let observe_on = ObserveOn::new(Box::new(sub), worker, 8, false);
        let mut upstream = observe_on.as_upstream_subscriber();

        upstream.on_subscribe(Box::new(crate::subscriber::CancelledSubscription));
        log.subscription().request(1_000);
        for item in 1..=50u32 {
            upstream.on_next(item);
        }
        upstream.on_complete();

        for _ in 0..200 {
            if log.completed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(log.items(), (1..=50u32).collect::<Vec<_>>());
        assert!(log.completed());
        scheduler.shutdown();
    }

    #[test]
    fn cancel_before_drain_suppresses_emission() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scheduler = CachedScheduler::with_ttl(Duration::from_millis(200));
        let worker = scheduler.create_worker();
        let observe_on = ObserveOn::new(Box::new(sub), worker, 8, false);
        let mut upstream = observe_on.as_upstream_subscriber();
        upstream.on_subscribe(Box::new(crate::subscriber::CancelledSubscription));
        log.subscription().cancel();
        upstream.on_next(1);
        upstream.on_complete();

        std::thread::sleep(Duration::from_millis(50));
        assert!(log.items().is_empty());
        assert!(!log.completed());
        scheduler.shutdown();
    }

    struct CountingRequestSub {
        total_requested: Arc<AtomicU64>,
    }
    impl Subscription for CountingRequestSub {
        fn request(&self, n: u64) {
            self.total_requested.fetch_add(n, Ordering::SeqCst);
        }
        fn cancel(&self) {}
    }
    impl QueueSubscription<u32> for CountingRequestSub {}

    #[test]
    fn replenishes_upstream_demand_once_limit_items_are_pulled() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scheduler = CachedScheduler::with_ttl(Duration::from_millis(200));
        let worker = scheduler.create_worker();
        let observe_on = ObserveOn::new(Box::new(sub), worker, 8, false);
        let mut upstream = observe_on.as_upstream_subscriber();

        let total_requested = Arc::new(AtomicU64::new(0));
        upstream.on_subscribe(Box::new(CountingRequestSub {
            total_requested: Arc::clone(&total_requested),
        }));
        assert_eq!(total_requested.load(Ordering::SeqCst), 8, "initial prefetch");

        log.subscription().request(1_000);
        for item in 1..=50u32 {
            upstream.on_next(item);
        }
        upstream.on_complete();

        for _ in 0..200 {
            if log.completed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(log.completed());
        // limit = prefetch - prefetch / 4 = 8 - 2 = 6; replenished every 6 pulls.
        assert_eq!(
            total_requested.load(Ordering::SeqCst),
            8 + (50 / 6) * 6,
            "upstream demand must be replenished as the prefetch window drains"
        );
        scheduler.shutdown();
    }

    struct AsyncFusedUpstream {
        queue: spin::Mutex<VecDeque<u32>>,
        done: AtomicBool,
    }
    impl Subscription for AsyncFusedUpstream {
        fn request(&self, _n: u64) {}
        fn cancel(&self) {}
    }
    impl QueueSubscription<u32> for AsyncFusedUpstream {
        fn poll(&self) -> Option<u32> {
            self.queue.lock().pop_front()
        }
        fn is_empty(&self) -> bool {
            self.queue.lock().is_empty()
        }
        fn clear(&self) {
            self.queue.lock().clear();
        }
        fn request_fusion(&self, requested: FusionMode) -> FusionMode {
            match requested {
                FusionMode::Async | FusionMode::Any => FusionMode::Async,
                _ => FusionMode::None,
            }
        }
        fn is_done(&self) -> bool {
            self.done.load(Ordering::Acquire)
        }
    }

    struct AsyncFusedHandle(Arc<AsyncFusedUpstream>);
    impl Subscription for AsyncFusedHandle {
        fn request(&self, n: u64) {
            self.0.request(n);
        }
        fn cancel(&self) {
            self.0.cancel();
        }
    }
    impl QueueSubscription<u32> for AsyncFusedHandle {
        fn poll(&self) -> Option<u32> {
            self.0.poll()
        }
        fn is_empty(&self) -> bool {
            self.0.is_empty()
        }
        fn clear(&self) {
            self.0.clear();
        }
        fn request_fusion(&self, requested: FusionMode) -> FusionMode {
            self.0.request_fusion(requested)
        }
        fn is_done(&self) -> bool {
            self.0.is_done()
        }
    }

    #[test]
    fn async_fusion_drains_via_poll_ignoring_on_next_payload() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scheduler = CachedScheduler::with_ttl(Duration::from_millis(200));
        let worker = scheduler.create_worker();
        let observe_on = ObserveOn::new(Box::new(sub), worker, 8, false);
        let mut upstream = observe_on.as_upstream_subscriber();

        let fused = Arc::new(AsyncFusedUpstream {
            queue: spin::Mutex::new(VecDeque::new()),
            done: AtomicBool::new(false),
        });
        upstream.on_subscribe(Box::new(AsyncFusedHandle(Arc::clone(&fused))));
        log.subscription().request(1_000);

        for item in 1..=20u32 {
            fused.queue.lock().push_back(item);
            upstream.on_next(0); // wake signal only; payload must be ignored
        }
        fused.done.store(true, Ordering::Release);
        upstream.on_complete();

        for _ in 0..200 {
            if log.completed() {
                break;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(log.items(), (1..=20u32).collect::<Vec<_>>());
        assert!(log.completed());
        scheduler.shutdown();
    }
}
