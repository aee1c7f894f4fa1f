//! `ReduceFull` — pairwise reduction of parallel rails to a single value.
//!
//! # Why
//! Each rail independently folds its own items with the reducer, then the
//! rail results are combined pairwise up a static, balanced tree of
//! [`SlotPair`] rendezvous points — the combined "carry" value handed to the
//! next slot pair up. `SlotPair` itself is the two-sided CAS rendezvous:
//! whichever side (left or right) lands second triggers the combine, so the
//! final answer is identical for any interleaving of rail completions,
//! grounded in the same "two racing writers, one proceeds" CAS shape as
//! [`crate::deferred::scalar::DeferredScalar`]'s `NN`/`NR`/`RN` states.
//!
//! The single final value is delivered through a `DeferredScalar`, reusing
//! its demand/value race handling; a rail error instead calls
//! [`crate::deferred::scalar::DeferredScalar::fail`] directly, deduplicated
//! by a first-error CAS flag, and cancels every other rail.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

use crate::deferred::scalar::DeferredScalar;
use crate::error::FlowError;
use crate::fusion::QueueSubscription;
use crate::subscriber::{Subscriber, Subscription};

/// A rail's contribution to the tree: either a folded value, or `Empty` —
/// the rail completed with nothing to reduce. `Empty` is not an error; it
/// simply drops out of pairing, passing the other side through unchanged.
enum Carry<T> {
    Value(T),
    Empty,
}

/// A two-sided rendezvous: whichever of `offer_left`/`offer_right` arrives
/// second combines both sides and forwards the result to `next`. Two
/// `Value`s combine with the reducer; a `Value` paired with `Empty` passes
/// the value through untouched; two `Empty`s forward `Empty`.
struct SlotPair<T> {
    left: spin::Mutex<Option<Carry<T>>>,
    right: spin::Mutex<Option<Carry<T>>>,
    arrived: AtomicU8,
    reducer: Arc<dyn Fn(T, T) -> T + Send + Sync>,
    next: Arc<dyn Sink<T>>,
}

const LEFT_ARRIVED: u8 = 0b01;
const RIGHT_ARRIVED: u8 = 0b10;

impl<T: Send + 'static> SlotPair<T> {
    fn new(reducer: Arc<dyn Fn(T, T) -> T + Send + Sync>, next: Arc<dyn Sink<T>>) -> Arc<Self> {
        Arc::new(Self {
            left: spin::Mutex::new(None),
            right: spin::Mutex::new(None),
            arrived: AtomicU8::new(0),
            reducer,
            next,
        })
    }

    fn offer_left(&self, value: Carry<T>) {
        *self.left.lock() = Some(value);
        if self.arrived.fetch_or(LEFT_ARRIVED, Ordering::AcqRel) & RIGHT_ARRIVED != 0 {
            self.release();
        }
    }

    fn offer_right(&self, value: Carry<T>) {
        *self.right.lock() = Some(value);
        if self.arrived.fetch_or(RIGHT_ARRIVED, Ordering::AcqRel) & LEFT_ARRIVED != 0 {
            self.release();
        }
    }

    fn release(&self) {
        let left = self.left.lock().take().expect("left slot acquired");
        let right = self.right.lock().take().expect("right slot acquired");
        let combined = match (left, right) {
            (Carry::Value(l), Carry::Value(r)) => Carry::Value((self.reducer)(l, r)),
            (Carry::Value(v), Carry::Empty) | (Carry::Empty, Carry::Value(v)) => Carry::Value(v),
            (Carry::Empty, Carry::Empty) => Carry::Empty,
        };
        self.next.offer(combined);
    }
}

trait Sink<T>: Send + Sync {
    fn offer(&self, value: Carry<T>);
}

struct LeftSink<T>(Arc<SlotPair<T>>);
impl<T: Send + 'static> Sink<T> for LeftSink<T> {
    fn offer(&self, value: Carry<T>) {
        self.0.offer_left(value);
    }
}

struct RightSink<T>(Arc<SlotPair<T>>);
impl<T: Send + 'static> Sink<T> for RightSink<T> {
    fn offer(&self, value: Carry<T>) {
        self.0.offer_right(value);
    }
}

struct FinalSink<T>(Arc<ReduceFullInner<T>>);
impl<T: Send + 'static> Sink<T> for FinalSink<T> {
    fn offer(&self, value: Carry<T>) {
        self.0.on_final(value);
    }
}

/// Recursively partition `[lo, hi)` into a balanced binary tree of
/// [`SlotPair`]s, recording for each leaf index the [`Sink`] it must report
/// to once its rail completes.
fn build_targets<T: Send + 'static>(
    lo: usize,
    hi: usize,
    next: Arc<dyn Sink<T>>,
    reducer: &Arc<dyn Fn(T, T) -> T + Send + Sync>,
    out: &mut [Option<Arc<dyn Sink<T>>>],
) {
    if hi - lo == 1 {
        out[lo] = Some(next);
        return;
    }
    let mid = lo + (hi - lo) / 2;
    let pair = SlotPair::new(Arc::clone(reducer), next);
    build_targets(lo, mid, Arc::new(LeftSink(Arc::clone(&pair))), reducer, out);
    build_targets(mid, hi, Arc::new(RightSink(pair)), reducer, out);
}

struct ReduceFullInner<T: Send + 'static> {
    scalar: Arc<DeferredScalar<T>>,
    rail_subscriptions: spin::Mutex<Vec<Option<Box<dyn Subscription>>>>,
    error_reported: AtomicBool,
}

impl<T: Send + 'static> ReduceFullInner<T> {
    fn on_final(&self, value: Carry<T>) {
        match value {
            Carry::Value(value) => self.scalar.complete(value),
            Carry::Empty => self.scalar.complete_empty(),
        }
    }

    fn on_rail_error(&self, error: FlowError) {
        if self.error_reported.swap(true, Ordering::AcqRel) {
            crate::error::unsignalled::report(error);
            return;
        }
        for subscription in self.rail_subscriptions.lock().iter_mut() {
            if let Some(subscription) = subscription.take() {
                subscription.cancel();
            }
        }
        self.scalar.fail(error);
    }
}

/// The multi-rail reduction coordinator. Construct with the number of rails
/// known up front (an assembly-time parameter, like `Zip`'s arity), then
/// fetch each rail's `Subscriber` handle via [`ReduceFull::rail`].
pub struct ReduceFull<T: Send + 'static> {
    inner: Arc<ReduceFullInner<T>>,
    rail_targets: Vec<Option<Arc<dyn Sink<T>>>>,
    reducer: Arc<dyn Fn(T, T) -> T + Send + Sync>,
}

impl<T: Send + 'static> ReduceFull<T> {
    /// `rail_count` must be at least 1. A single rail degenerates to a
    /// plain fold with no tree at all.
    pub fn new(
        rail_count: usize,
        reducer: impl Fn(T, T) -> T + Send + Sync + 'static,
        downstream: Box<dyn Subscriber<T>>,
    ) -> Self {
        assert!(rail_count >= 1, "ReduceFull requires at least one rail");
        let scalar = DeferredScalar::new(downstream);
        scalar.subscribe();
        let inner = Arc::new(ReduceFullInner {
            scalar: Arc::clone(&scalar),
            rail_subscriptions: spin::Mutex::new((0..rail_count).map(|_| None).collect()),
            error_reported: AtomicBool::new(false),
        });

        let reducer: Arc<dyn Fn(T, T) -> T + Send + Sync> = Arc::new(reducer);
        let final_sink: Arc<dyn Sink<T>> = Arc::new(FinalSink(Arc::clone(&inner)));
        let mut rail_targets: Vec<Option<Arc<dyn Sink<T>>>> = (0..rail_count).map(|_| None).collect();
        build_targets(0, rail_count, final_sink, &reducer, &mut rail_targets);

        Self {
            inner,
            rail_targets,
            reducer,
        }
    }

    /// The `Subscriber` handle for rail `index` (`0 <= index < rail_count`).
    pub fn rail(&self, index: usize) -> impl Subscriber<T> {
        RailReducer {
            inner: Arc::clone(&self.inner),
            index,
            target: Arc::clone(self.rail_targets[index].as_ref().expect("rail target built")),
            reducer: Arc::clone(&self.reducer),
            accumulator: None,
        }
    }
}

struct RailReducer<T: Send + 'static> {
    inner: Arc<ReduceFullInner<T>>,
    index: usize,
    target: Arc<dyn Sink<T>>,
    reducer: Arc<dyn Fn(T, T) -> T + Send + Sync>,
    accumulator: Option<T>,
}

impl<T: Send + 'static> Subscriber<T> for RailReducer<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>) {
        subscription.request(crate::demand::UNBOUNDED);
        self.inner.rail_subscriptions.lock()[self.index] = Some(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.accumulator = Some(match self.accumulator.take() {
            None => item,
            Some(acc) => (self.reducer)(acc, item),
        });
    }

    fn on_error(&mut self, error: FlowError) {
        self.inner.on_rail_error(error);
    }

    fn on_complete(&mut self) {
        self.inner.rail_subscriptions.lock()[self.index] = None;
        match self.accumulator.take() {
            Some(value) => self.target.offer(Carry::Value(value)),
            None => self.target.offer(Carry::Empty),
        }
    }
}
