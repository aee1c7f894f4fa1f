//! `DeferredScalar` — a one-value-at-most emitter.
//!
//! # Why
//! Several coordinators (the `Zip` all-scalar fast path, `ReduceFull`'s
//! final carry) need to emit *at most one* value whose availability and
//! whose downstream request may arrive in either order. The four-state CAS
//! machine below — `NN`/`NR`/`RN`/`RR` — is the minimal automaton that
//! makes that race-free without a lock: a small `AtomicU8` state plus
//! `compare_exchange` retries, model-checked under loom in
//! `tests/loom_concurrency.rs` of this crate.
use alloc::boxed::Box;
use alloc::sync::Arc;
use core::sync::atomic::Ordering;

#[cfg(not(any(loom, rxcore_loom)))]
use core::sync::atomic::AtomicU8;
#[cfg(any(loom, rxcore_loom))]
use loom::sync::atomic::AtomicU8;

use crate::error::{codes, FlowError};
use crate::fusion::{FusionMode, QueueSubscription};
use crate::subscriber::{Subscriber, Subscription};

const NN: u8 = 0; // no request, no value
const NR: u8 = 1; // no request, value stashed
const RN: u8 = 2; // request present, no value yet
const RR: u8 = 3; // terminal: consumed or cancelled

/// A one-value emitter: `request`/`complete` race to the same terminal
/// state, and whichever arrives second performs the emission.
pub struct DeferredScalar<T: Send + 'static> {
    state: AtomicU8,
    value: spin::Mutex<Option<T>>,
    downstream: spin::Mutex<Option<Box<dyn Subscriber<T>>>>,
    /// Set once `Async` fusion has been negotiated; `poll` then becomes the
    /// only legal way to observe the value.
    fused: core::sync::atomic::AtomicBool,
}

impl<T: Send + 'static> DeferredScalar<T> {
    /// Construct a scalar emitter for the given downstream. The caller must
    /// still invoke [`Self::subscribe`] to deliver `on_subscribe`.
    pub fn new(downstream: Box<dyn Subscriber<T>>) -> Arc<Self> {
        Arc::new(Self {
            state: AtomicU8::new(NN),
            value: spin::Mutex::new(None),
            downstream: spin::Mutex::new(Some(downstream)),
            fused: core::sync::atomic::AtomicBool::new(false),
        })
    }

    /// Deliver `on_subscribe` to the downstream, handing it this emitter as
    /// its own `QueueSubscription`.
    pub fn subscribe(self: &Arc<Self>) {
        let handle: Box<dyn QueueSubscription<T>> = Box::new(Handle(Arc::clone(self)));
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_subscribe(handle);
        }
    }

    /// Called by the owning operator once the single value is available.
    /// `NN -> NR` stashes it; `RN -> RR` emits `on_next; on_complete`
    /// immediately. A racing `cancel()` always wins: if the state is
    /// already `RR`, this is a no-op.
    pub fn complete(self: &Arc<Self>, value: T) {
        loop {
            match self.state.load(Ordering::Acquire) {
                NN => {
                    *self.value.lock() = Some(value);
                    match self.state.compare_exchange(
                        NN,
                        NR,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(_) => continue, // raced with request() or cancel(); retry
                    }
                }
                RN => {
                    match self.state.compare_exchange(
                        RN,
                        RR,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            self.emit(value);
                            return;
                        }
                        Err(_) => continue,
                    }
                }
                RR => return, // cancelled, or already completed
                _ => return,
            }
        }
    }

    fn emit(&self, value: T) {
        if let Some(downstream) = self.downstream.lock().as_mut() {
            downstream.on_next(value);
            downstream.on_complete();
        }
        *self.downstream.lock() = None;
    }

    fn request(&self, n: u64) {
        if n == 0 {
            self.fail(FlowError::new(
                codes::PROTOCOL_NON_POSITIVE_REQUEST,
                "request(n) requires n >= 1",
            ));
            return;
        }
        loop {
            match self.state.load(Ordering::Acquire) {
                NN => {
                    match self.state.compare_exchange(
                        NN,
                        RN,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => return,
                        Err(_) => continue,
                    }
                }
                NR => {
                    match self.state.compare_exchange(
                        NR,
                        RR,
                        Ordering::AcqRel,
                        Ordering::Acquire,
                    ) {
                        Ok(_) => {
                            let value = self.value.lock().take();
                            if let Some(value) = value {
                                self.emit(value);
                            }
                            return;
                        }
                        Err(_) => continue,
                    }
                }
                _ => return, // already requested, or terminal
            }
        }
    }

    /// Force an error terminal, bypassing the demand/value race entirely —
    /// used by coordinators (e.g. [`crate::reduce_full::ReduceFull`]) that
    /// need to abort a scalar result already in flight.
    pub(crate) fn fail(&self, error: FlowError) {
        let previous = self.state.swap(RR, Ordering::AcqRel);
        if previous != RR {
            if let Some(downstream) = self.downstream.lock().as_mut() {
                downstream.on_error(error);
            }
            *self.downstream.lock() = None;
        } else {
            crate::error::unsignalled::report(error);
        }
    }

    /// Force a value-less terminal: `on_complete` with no preceding
    /// `on_next`. Used by [`crate::reduce_full::ReduceFull`] when every rail
    /// completes with nothing to reduce. Like `fail`, this bypasses the
    /// demand/value race entirely — completion never needs demand.
    pub(crate) fn complete_empty(&self) {
        let previous = self.state.swap(RR, Ordering::AcqRel);
        if previous != RR {
            if let Some(downstream) = self.downstream.lock().as_mut() {
                downstream.on_complete();
            }
            *self.downstream.lock() = None;
        }
    }

    fn cancel(&self) {
        self.state.store(RR, Ordering::Release);
        *self.value.lock() = None;
        *self.downstream.lock() = None;
    }
}

struct Handle<T: Send + 'static>(Arc<DeferredScalar<T>>);

impl<T: Send + 'static> Subscription for Handle<T> {
    fn request(&self, n: u64) {
        self.0.request(n);
    }
    fn cancel(&self) {
        self.0.cancel();
    }
}

impl<T: Send + 'static> QueueSubscription<T> for Handle<T> {
    fn poll(&self) -> Option<T> {
        self.0.value.lock().take()
    }
    fn is_empty(&self) -> bool {
        self.0.value.lock().is_none()
    }
    fn clear(&self) {
        *self.0.value.lock() = None;
        self.0.fused.store(false, Ordering::Release);
    }
    fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        match requested {
            FusionMode::Async | FusionMode::Any => {
                self.0.fused.store(true, Ordering::Release);
                FusionMode::Async
            }
            _ => FusionMode::None,
        }
    }
    fn is_done(&self) -> bool {
        matches!(self.0.state.load(Ordering::Acquire), RR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::RecordingSubscriber;

    #[test]
    fn request_then_complete_emits_in_order() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scalar = DeferredScalar::new(Box::new(sub));
        scalar.subscribe();
        log.subscription().request(1);
        scalar.complete(42);
        assert_eq!(log.items(), vec![42]);
        assert!(log.completed());
    }

    #[test]
    fn complete_then_request_emits_in_order() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scalar = DeferredScalar::new(Box::new(sub));
        scalar.subscribe();
        scalar.complete(7);
        assert!(log.items().is_empty(), "value must wait for demand");
        log.subscription().request(1);
        assert_eq!(log.items(), vec![7]);
        assert!(log.completed());
    }

    #[test]
    fn cancel_suppresses_emission() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scalar = DeferredScalar::new(Box::new(sub));
        scalar.subscribe();
        log.subscription().cancel();
        scalar.complete(1);
        assert!(log.items().is_empty());
        assert!(!log.completed());
    }

    #[test]
    fn fusion_async_exposes_value_via_poll() {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scalar = DeferredScalar::new(Box::new(sub));
        scalar.subscribe();
        assert_eq!(
            log.subscription().request_fusion(FusionMode::Any),
            FusionMode::Async
        );
        scalar.complete(9);
        assert_eq!(log.subscription().poll(), Some(9));
        assert_eq!(log.subscription().poll(), None);
    }
}
