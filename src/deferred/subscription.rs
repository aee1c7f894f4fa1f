//! `DeferredSubscription` — a set-once arbiter.
//!
//! # Why
//! An operator's own `Subscriber` often must hand `on_subscribe` to its
//! downstream before it knows what upstream subscription it will end up
//! with (the downstream may call `request` immediately, before the
//! operator has subscribed upstream). `DeferredSubscription` buffers those
//! early requests and replays them exactly once the real subscription is
//! installed.
//!
//! A single `spin::Mutex` around the small amount of state (the optional
//! upstream subscription, the pending request count, and the cancelled
//! flag) stands in for the classic CAS-dance arbiter: the state here is
//! touched rarely compared to a coordinator's drain loop, and `spin::Mutex`
//! is a fine fit for bookkeeping off the hottest path — there's no need for
//! a lock-free design for a component this cold.
use alloc::boxed::Box;

use crate::subscriber::Subscription;

struct State {
    subscription: Option<Box<dyn Subscription>>,
    pending: u64,
    cancelled: bool,
}

/// Accepts a single upstream subscription, possibly after downstream has
/// already issued requests.
pub struct DeferredSubscription {
    state: spin::Mutex<State>,
}

impl DeferredSubscription {
    pub fn new() -> Self {
        Self {
            state: spin::Mutex::new(State {
                subscription: None,
                pending: 0,
                cancelled: false,
            }),
        }
    }

    /// Accumulate into the pending counter if no subscription is installed
    /// yet; otherwise forward straight to the upstream subscription.
    pub fn request(&self, n: u64) {
        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }
        match state.subscription.as_ref() {
            Some(sub) => sub.request(n),
            None => state.pending = crate::demand::add_cap(state.pending, n),
        }
    }

    /// Install the single upstream subscription. If this arbiter was
    /// already cancelled, the new subscription is immediately cancelled
    /// in turn; otherwise any pending request count is replayed exactly
    /// once.
    pub fn set(&self, subscription: Box<dyn Subscription>) {
        let mut state = self.state.lock();
        if state.cancelled {
            drop(state);
            subscription.cancel();
            return;
        }
        if state.subscription.is_some() {
            // At most one non-cancelled subscription is ever active; a
            // second `set` cancels the newcomer rather than silently
            // replacing the active one.
            drop(state);
            subscription.cancel();
            return;
        }
        let pending = core::mem::replace(&mut state.pending, 0);
        state.subscription = Some(subscription);
        let installed = state.subscription.as_ref().unwrap();
        if pending > 0 {
            installed.request(pending);
        }
    }

    /// Idempotently cancel. Cancels whatever subscription was installed,
    /// or marks the arbiter so any future `set` is cancelled on arrival.
    pub fn cancel(&self) {
        let mut state = self.state.lock();
        if state.cancelled {
            return;
        }
        state.cancelled = true;
        if let Some(sub) = state.subscription.take() {
            drop(state);
            sub.cancel();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.state.lock().cancelled
    }
}

impl Default for DeferredSubscription {
    fn default() -> Self {
        Self::new()
    }
}
