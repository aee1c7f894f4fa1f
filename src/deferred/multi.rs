//! `MultiSubscription` — a switching arbiter.
//!
//! # Why
//! Operators like `switch`/`retry`/`repeat` swap their upstream
//! subscription repeatedly over the lifetime of a single downstream
//! subscription. Every swap, every `request(n)`, and every locally
//! `produced(n)` report has to be reconciled against a single `requested`
//! counter without losing or double-counting anything, and without ever
//! blocking. The `wip`-ticket drain loop below is the same serialized
//! reconciliation shape every coordinator in this crate uses; it is
//! model-checked against concurrent `request`/`produced`/
//! `set_subscription`/`cancel` calls in `tests/loom_concurrency.rs`.
use alloc::boxed::Box;
use core::sync::atomic::Ordering;

#[cfg(not(any(loom, rxcore_loom)))]
use core::sync::atomic::{AtomicBool, AtomicU64};
#[cfg(any(loom, rxcore_loom))]
use loom::sync::atomic::{AtomicBool, AtomicU64};

use crate::demand::{add_cap, sub_cap};
use crate::subscriber::Subscription;

/// Whether installing a new subscription cancels the one it replaces.
/// Exposed as a simple policy flag rather than a trait object hook — every
/// caller in this crate wants one of the two fixed behaviors, so a trait
/// would only add indirection with no payoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SwitchPolicy {
    /// `switchMap`-style: the outgoing subscription is cancelled as soon as
    /// the new one is installed.
    CancelPrevious,
    /// The outgoing subscription is left alone; the caller is responsible
    /// for its lifecycle.
    KeepPrevious,
}

pub struct MultiSubscription {
    wip: AtomicU64,
    cancelled: AtomicBool,
    requested: AtomicU64,
    actual: spin::Mutex<Option<Box<dyn Subscription>>>,
    missed_subscription: spin::Mutex<Option<Box<dyn Subscription>>>,
    missed_requested: AtomicU64,
    missed_produced: AtomicU64,
    policy: SwitchPolicy,
}

impl MultiSubscription {
    pub fn new(policy: SwitchPolicy) -> Self {
        Self {
            wip: AtomicU64::new(0),
            cancelled: AtomicBool::new(false),
            requested: AtomicU64::new(0),
            actual: spin::Mutex::new(None),
            missed_subscription: spin::Mutex::new(None),
            missed_requested: AtomicU64::new(0),
            missed_produced: AtomicU64::new(0),
            policy,
        }
    }

    /// Downstream demand arriving for whichever upstream is currently (or
    /// will soon be) active.
    pub fn request(&self, n: u64) {
        if n == 0 || self.cancelled.load(Ordering::Acquire) {
            return;
        }
        accumulate(&self.missed_requested, n);
        self.drain();
    }

    /// Install a new upstream subscription, superseding whichever one was
    /// last installed or still pending installation.
    pub fn set_subscription(&self, subscription: Box<dyn Subscription>) {
        if self.cancelled.load(Ordering::Acquire) {
            subscription.cancel();
            return;
        }
        let superseded = self.missed_subscription.lock().replace(subscription);
        if let Some(superseded) = superseded {
            superseded.cancel();
        }
        self.drain();
    }

    /// Report locally emitted items so the next switch re-requests only
    /// the remainder of outstanding demand.
    pub fn produced(&self, n: u64) {
        if n == 0 {
            return;
        }
        accumulate(&self.missed_produced, n);
        self.drain();
    }

    /// Idempotently cancel. Wakes the drain, which cancels both the
    /// currently active and any not-yet-installed subscription.
    pub fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        self.drain();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Current outstanding demand (racy snapshot, for diagnostics/tests).
    pub fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    fn drain(&self) {
        if self.wip.fetch_add(1, Ordering::AcqRel) != 0 {
            return;
        }
        let mut missed = 1u64;
        loop {
            let missed_subscription = self.missed_subscription.lock().take();
            let missed_requested = self.missed_requested.swap(0, Ordering::AcqRel);
            let missed_produced = self.missed_produced.swap(0, Ordering::AcqRel);

            if self.cancelled.load(Ordering::Acquire) {
                if let Some(actual) = self.actual.lock().take() {
                    actual.cancel();
                }
                if let Some(pending) = missed_subscription {
                    pending.cancel();
                }
            } else {
                let current = self.requested.load(Ordering::Acquire);
                let next = sub_cap(add_cap(current, missed_requested), missed_produced);
                self.requested.store(next, Ordering::Release);

                if let Some(new_subscription) = missed_subscription {
                    if self.policy == SwitchPolicy::CancelPrevious {
                        if let Some(previous) = self.actual.lock().take() {
                            previous.cancel();
                        }
                    }
                    if next > 0 {
                        new_subscription.request(next);
                    }
                    *self.actual.lock() = Some(new_subscription);
                } else if missed_requested > 0 {
                    if let Some(current) = self.actual.lock().as_ref() {
                        current.request(missed_requested);
                    }
                }
            }

            missed = self.wip.fetch_sub(missed, Ordering::AcqRel) - missed;
            if missed == 0 {
                return;
            }
        }
    }
}

fn accumulate(slot: &AtomicU64, n: u64) {
    let mut current = slot.load(Ordering::Acquire);
    loop {
        let next = add_cap(current, n);
        match slot.compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return,
            Err(actual) => current = actual,
        }
    }
}

impl Default for MultiSubscription {
    fn default() -> Self {
        Self::new(SwitchPolicy::CancelPrevious)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::sync::Arc;
    use core::sync::atomic::{AtomicU64 as StdAtomicU64, Ordering as StdOrdering};

    struct CountingSub {
        requested: Arc<StdAtomicU64>,
        cancelled: Arc<StdAtomicU64>,
    }
    impl Subscription for CountingSub {
        fn request(&self, n: u64) {
            self.requested.fetch_add(n, StdOrdering::SeqCst);
        }
        fn cancel(&self) {
            self.cancelled.fetch_add(1, StdOrdering::SeqCst);
        }
    }

    fn counting() -> (Box<dyn Subscription>, Arc<StdAtomicU64>, Arc<StdAtomicU64>) {
        let requested = Arc::new(StdAtomicU64::new(0));
        let cancelled = Arc::new(StdAtomicU64::new(0));
        (
            Box::new(CountingSub {
                requested: Arc::clone(&requested),
                cancelled: Arc::clone(&cancelled),
            }),
            requested,
            cancelled,
        )
    }

    #[test]
    fn new_subscription_receives_full_outstanding_demand() {
        let arb = MultiSubscription::new(SwitchPolicy::CancelPrevious);
        arb.request(10);
        let (sub, requested, _) = counting();
        arb.set_subscription(sub);
        assert_eq!(requested.load(StdOrdering::SeqCst), 10);
    }

    #[test]
    fn switching_cancels_previous_and_re_requests_remainder() {
        let arb = MultiSubscription::new(SwitchPolicy::CancelPrevious);
        arb.request(10);
        let (first, first_requested, first_cancelled) = counting();
        arb.set_subscription(first);
        assert_eq!(first_requested.load(StdOrdering::SeqCst), 10);

        arb.produced(4); // 6 remain outstanding

        let (second, second_requested, _) = counting();
        arb.set_subscription(second);
        assert_eq!(first_cancelled.load(StdOrdering::SeqCst), 1);
        assert_eq!(second_requested.load(StdOrdering::SeqCst), 6);
    }

    #[test]
    fn cancel_cancels_installed_subscription() {
        let arb = MultiSubscription::new(SwitchPolicy::CancelPrevious);
        let (sub, _, cancelled) = counting();
        arb.set_subscription(sub);
        arb.cancel();
        assert_eq!(cancelled.load(StdOrdering::SeqCst), 1);
        assert!(arb.is_cancelled());
    }

    #[test]
    fn cancel_before_set_cancels_newcomer() {
        let arb = MultiSubscription::new(SwitchPolicy::CancelPrevious);
        arb.cancel();
        let (sub, _, cancelled) = counting();
        arb.set_subscription(sub);
        assert_eq!(cancelled.load(StdOrdering::SeqCst), 1);
    }
}
