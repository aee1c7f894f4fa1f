//! `Zip` — lockstep pairing of two rails.
//!
//! # Why
//! Three shapes, three implementations, split by what's known at assembly
//! time versus what still needs a real drain loop:
//! - [`zip_scalars`]: both values already known at assembly time — compute
//!   once, deliver through [`crate::deferred::scalar::DeferredScalar`], no
//!   subscription machinery at all.
//! - [`ZipWithScalar`]: one rail is a known value, the other a real
//!   subscription — this degenerates to a stateless 1:1 map, so it is one,
//!   not a second copy of the general drain loop.
//! - [`Zip`]: every rail is a real subscription — a `wip`-ticket drain loop
//!   over N per-rail prefetch queues, grounded the same way as
//!   [`crate::observe_on::ObserveOn`]. Items are erased to
//!   `Box<dyn Any + Send>` on arrival so rails of different types can share
//!   one `Vec`-shaped coordinator.
use alloc::boxed::Box;
use alloc::collections::VecDeque;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::any::Any;
use core::marker::PhantomData;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use crate::demand::Demand;
use crate::deferred::scalar::DeferredScalar;
use crate::error::{codes, FlowError};
use crate::fusion::{FusionMode, QueueSubscription};
use crate::subscriber::{Subscriber, Subscription};

/// Both values are known at assembly time: combine immediately and deliver
/// through a `DeferredScalar`, allocating no queue.
pub fn zip_scalars<A, B, R>(
    a: A,
    b: B,
    zipper: impl FnOnce(A, B) -> R + Send + 'static,
    downstream: Box<dyn Subscriber<R>>,
) -> Arc<DeferredScalar<R>>
where
    A: Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    let scalar = DeferredScalar::new(downstream);
    scalar.subscribe();
    scalar.complete(zipper(a, b));
    scalar
}

/// One rail is known at assembly time; the other is a real upstream. Every
/// item arriving on the real rail is immediately pairable with the stashed
/// scalar, so this is a stateless map rather than a second drain loop.
pub struct ZipWithScalar<A, B, R>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    scalar: A,
    zipper: Arc<dyn Fn(A, B) -> R + Send + Sync>,
    downstream: spin::Mutex<Option<Box<dyn Subscriber<R>>>>,
}

impl<A, B, R> ZipWithScalar<A, B, R>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    pub fn new(
        scalar: A,
        zipper: impl Fn(A, B) -> R + Send + Sync + 'static,
        downstream: Box<dyn Subscriber<R>>,
    ) -> Self {
        Self {
            scalar,
            zipper: Arc::new(zipper),
            downstream: spin::Mutex::new(Some(downstream)),
        }
    }
}

impl<A, B, R> Subscriber<B> for ZipWithScalar<A, B, R>
where
    A: Clone + Send + 'static,
    B: Send + 'static,
    R: Send + 'static,
{
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<B>>) {
        let mapped: Box<dyn QueueSubscription<R>> = Box::new(MappingSubscription {
            inner: subscription,
            scalar: self.scalar.clone(),
            zipper: Arc::clone(&self.zipper),
        });
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_subscribe(mapped);
        }
    }

    fn on_next(&mut self, item: B) {
        let combined = (self.zipper)(self.scalar.clone(), item);
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_next(combined);
        }
    }

    fn on_error(&mut self, error: FlowError) {
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_error(error);
        }
        *self.downstream.lock() = None;
    }

    fn on_complete(&mut self) {
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_complete();
        }
        *self.downstream.lock() = None;
    }
}

struct MappingSubscription<A, B, R> {
    inner: Box<dyn QueueSubscription<B>>,
    scalar: A,
    zipper: Arc<dyn Fn(A, B) -> R + Send + Sync>,
}

impl<A: Clone + Send + 'static, B: Send + 'static, R: Send + 'static> Subscription
    for MappingSubscription<A, B, R>
{
    fn request(&self, n: u64) {
        self.inner.request(n);
    }
    fn cancel(&self) {
        self.inner.cancel();
    }
}

impl<A: Clone + Send + 'static, B: Send + 'static, R: Send + 'static> QueueSubscription<R>
    for MappingSubscription<A, B, R>
{
    fn poll(&self) -> Option<R> {
        self.inner
            .poll()
            .map(|item| (self.zipper)(self.scalar.clone(), item))
    }
    fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
    fn clear(&self) {
        self.inner.clear();
    }
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        self.inner.request_fusion(requested)
    }
    fn is_done(&self) -> bool {
        self.inner.is_done()
    }
}

/// The general N-ary coordinator: every rail is a real upstream subscription.
/// Always constructed behind an `Arc`, following the same self-referential
/// pattern as [`crate::observe_on::ObserveOn`]. Each rail's item type is
/// erased to `Box<dyn Any + Send>` on arrival so a fixed-shape `Vec<RailState>`
/// can hold heterogeneous rails — the same erasure an extensions map uses to
/// hold heterogeneous values behind one map type.
pub struct Zip<R>
where
    R: Send + 'static,
{
    self_ref: Arc<ZipCoordinator<R>>,
}

struct RailState {
    queue: spin::Mutex<VecDeque<Box<dyn Any + Send>>>,
    sub: spin::Mutex<Option<Box<dyn Subscription>>>,
    done: AtomicBool,
}

struct ZipCoordinator<R>
where
    R: Send + 'static,
{
    zipper: Arc<dyn Fn(Vec<Box<dyn Any + Send>>) -> R + Send + Sync>,
    downstream: spin::Mutex<Option<Box<dyn Subscriber<R>>>>,
    prefetch: u64,
    rails: Vec<RailState>,

    requested: Demand,
    wip: AtomicU64,
    error: spin::Mutex<Option<FlowError>>,
    cancelled: AtomicBool,
}

impl<R> Zip<R>
where
    R: Send + 'static,
{
    /// `rail_count` rails, combined by `zipper` once every rail has offered
    /// one item. `zipper` receives exactly `rail_count` boxed values, in
    /// rail order, and must downcast each one back to the type that rail
    /// was declared with via [`Zip::rail`].
    pub fn new(
        rail_count: usize,
        zipper: impl Fn(Vec<Box<dyn Any + Send>>) -> R + Send + Sync + 'static,
        prefetch: u64,
        downstream: Box<dyn Subscriber<R>>,
    ) -> Self {
        assert!(rail_count >= 2, "Zip requires at least two rails");
        let rails = (0..rail_count)
            .map(|_| RailState {
                queue: spin::Mutex::new(VecDeque::new()),
                sub: spin::Mutex::new(None),
                done: AtomicBool::new(false),
            })
            .collect();
        Self {
            self_ref: Arc::new(ZipCoordinator {
                zipper: Arc::new(zipper),
                downstream: spin::Mutex::new(Some(downstream)),
                prefetch,
                rails,
                requested: Demand::new(),
                wip: AtomicU64::new(0),
                error: spin::Mutex::new(None),
                cancelled: AtomicBool::new(false),
            }),
        }
    }

    /// The `Subscriber` handle for rail `index` (`0 <= index < rail_count`).
    pub fn rail<T: Send + 'static>(&self, index: usize) -> impl Subscriber<T> {
        assert!(index < self.self_ref.rails.len(), "rail index out of bounds");
        Rail {
            coordinator: Arc::clone(&self.self_ref),
            index,
            _marker: PhantomData,
        }
    }
}

struct Rail<T, R>
where
    R: Send + 'static,
{
    coordinator: Arc<ZipCoordinator<R>>,
    index: usize,
    _marker: PhantomData<T>,
}

/// Erases a rail's typed `QueueSubscription<T>` down to a plain
/// `Subscription` so heterogeneous rails can share one `Vec<RailState>`.
/// Stable Rust has no trait-object upcasting at this crate's pinned edition,
/// so this thin wrapper stands in for it.
struct RailHandle<T>(Box<dyn QueueSubscription<T>>);

impl<T: Send + 'static> Subscription for RailHandle<T> {
    fn request(&self, n: u64) {
        self.0.request(n);
    }
    fn cancel(&self) {
        self.0.cancel();
    }
}

impl<T: Send + 'static, R: Send + 'static> Subscriber<T> for Rail<T, R> {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>) {
        subscription.request(self.coordinator.prefetch);
        *self.coordinator.rails[self.index].sub.lock() = Some(Box::new(RailHandle(subscription)));
        self.coordinator.maybe_expose_subscription();
    }
    fn on_next(&mut self, item: T) {
        self.coordinator.rails[self.index]
            .queue
            .lock()
            .push_back(Box::new(item));
        self.coordinator.drain_entry();
    }
    fn on_error(&mut self, error: FlowError) {
        self.coordinator.report_error(error);
    }
    fn on_complete(&mut self) {
        self.coordinator.rails[self.index]
            .done
            .store(true, Ordering::Release);
        self.coordinator.drain_entry();
    }
}

struct ZipSubscription<R>(Arc<ZipCoordinator<R>>)
where
    R: Send + 'static;

impl<R: Send + 'static> Subscription for ZipSubscription<R> {
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

impl<R> ZipCoordinator<R>
where
    R: Send + 'static,
{
    /// Once every rail has been subscribed, hand the downstream its
    /// `Subscription`. Only the last rail to subscribe actually fires this
    /// (cheap idempotency via `downstream` containing a value exactly once).
    fn maybe_expose_subscription(self: &Arc<Self>) {
        if self.rails.iter().any(|rail| rail.sub.lock().is_none()) {
            return;
        }
        let mut downstream = self.downstream.lock();
        if let Some(mut sink) = downstream.take() {
            let subscription: alloc::boxed::Box<dyn Subscription> =
                Box::new(ZipSubscription(Arc::clone(self)));
            // Downstream expects a QueueSubscription<R>; Zip doesn't fuse,
            // so wrap with the default-declining adapter.
            let handle: Box<dyn QueueSubscription<R>> = Box::new(NonFusedSubscription(subscription));
            sink.on_subscribe(handle);
            *downstream = Some(sink);
        }
    }

    fn report_error(self: &Arc<Self>, error: FlowError) {
        let mut slot = self.error.lock();
        if slot.is_none() {
            *slot = Some(error);
        } else {
            drop(slot);
            crate::error::unsignalled::report(error);
            return;
        }
        drop(slot);
        self.drain_entry();
    }

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

    fn any_rail_exhausted(&self) -> bool {
        self.rails
            .iter()
            .any(|rail| rail.done.load(Ordering::Acquire) && rail.queue.lock().is_empty())
    }

    fn any_rail_empty(&self) -> bool {
        self.rails.iter().any(|rail| rail.queue.lock().is_empty())
    }

    fn drain_once(self: &Arc<Self>) {
        if self.cancelled.load(Ordering::Acquire) {
            self.cleanup();
            return;
        }
        if let Some(error) = self.error.lock().take() {
            self.terminate_with_error(error);
            return;
        }

        let requested = self.requested.get();
        let mut emitted = 0u64;
        loop {
            if emitted >= requested {
                break;
            }
            if self.any_rail_exhausted() {
                self.terminate_with_complete();
                return;
            }
            if self.any_rail_empty() {
                break;
            }
            let values: Vec<Box<dyn Any + Send>> = self
                .rails
                .iter()
                .map(|rail| rail.queue.lock().pop_front().expect("checked non-empty above"))
                .collect();
            let combined = (self.zipper)(values);
            if let Some(downstream) = self.downstream.lock().as_mut() {
                downstream.on_next(combined);
            }
            emitted += 1;
        }
        if self.any_rail_exhausted() {
            self.terminate_with_complete();
            return;
        }
        if emitted > 0 {
            for rail in &self.rails {
                if let Some(sub) = rail.sub.lock().as_ref() {
                    sub.request(emitted);
                }
            }
            self.requested.sub(emitted);
        }
    }

    fn cleanup(&self) {
        for rail in &self.rails {
            if let Some(sub) = rail.sub.lock().take() {
                sub.cancel();
            }
            rail.queue.lock().clear();
        }
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

struct NonFusedSubscription(alloc::boxed::Box<dyn Subscription>);

impl Subscription for NonFusedSubscription {
    fn request(&self, n: u64) {
        self.0.request(n);
    }
    fn cancel(&self) {
        self.0.cancel();
    }
}

impl<T> QueueSubscription<T> for NonFusedSubscription {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn scalar_fast_path_emits_without_subscription() {
        let (sub, log) = RecordingSubscriber::<i32>::new();
        zip_scalars(10, 20, |a, b| a + b, Box::new(sub));
        assert!(log.items().is_empty(), "value waits for demand");
        log.subscription().request(1);
        assert_eq!(log.items(), vec![30]);
        assert!(log.completed());
    }

    #[test]
    fn lockstep_terminates_on_shorter_source() {
        use crate::subscriber::CancelledSubscription;

        let (sub, log) = RecordingSubscriber::<alloc::string::String>::new();
        let zip = Zip::new(
            2,
            |mut values: Vec<Box<dyn Any + Send>>| {
                let y = *values.pop().unwrap().downcast::<alloc::string::String>().unwrap();
                let x = *values.pop().unwrap().downcast::<i32>().unwrap();
                alloc::format!("{x}{y}")
            },
            4,
            Box::new(sub),
        );
        let mut a = zip.rail::<i32>(0);
        let mut b = zip.rail::<alloc::string::String>(1);
        a.on_subscribe(Box::new(CancelledSubscription));
        b.on_subscribe(Box::new(CancelledSubscription));
        log.subscription().request(10);

        a.on_next(1);
        b.on_next(alloc::string::String::from("a"));
        a.on_next(2);
        b.on_next(alloc::string::String::from("b"));
        a.on_next(3);
        b.on_complete();

        assert_eq!(
            log.items(),
            alloc::vec![alloc::string::String::from("1a"), alloc::string::String::from("2b")]
        );
        assert!(log.completed());
    }

    #[test]
    fn three_rails_pair_lockstep() {
        use crate::subscriber::CancelledSubscription;

        let (sub, log) = RecordingSubscriber::<i32>::new();
        let zip = Zip::new(
            3,
            |mut values: Vec<Box<dyn Any + Send>>| {
                let c = *values.pop().unwrap().downcast::<i32>().unwrap();
                let b = *values.pop().unwrap().downcast::<i32>().unwrap();
                let a = *values.pop().unwrap().downcast::<i32>().unwrap();
                a + b + c
            },
            8,
            Box::new(sub),
        );
        let mut a = zip.rail::<i32>(0);
        let mut b = zip.rail::<i32>(1);
        let mut c = zip.rail::<i32>(2);
        a.on_subscribe(Box::new(CancelledSubscription));
        b.on_subscribe(Box::new(CancelledSubscription));
        c.on_subscribe(Box::new(CancelledSubscription));
        log.subscription().request(10);

        for i in 1..=3 {
            a.on_next(i);
            b.on_next(i * 10);
            c.on_next(i * 100);
        }

        assert_eq!(log.items(), alloc::vec![111, 222, 333]);
        assert!(!log.completed(), "no rail has completed yet");
    }
}
