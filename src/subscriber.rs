//! The Signal contract: `Subscriber` and `Subscription`.
//!
//! # Why
//! `Subscriber` and `Subscription` are narrow capability traits, not a class
//! hierarchy, mirroring how comparable narrow contracts (`Stream`,
//! `Service`) are modelled elsewhere as plain traits with a handful of
//! methods rather than deep inheritance. Unlike a sealed trait, these two
//! are deliberately open: any downstream consumer or upstream producer in a
//! subscription graph implements them, including test harnesses.
use alloc::boxed::Box;

use crate::fusion::QueueSubscription;

/// A demand-driven consumer of a subscription's signals.
///
/// # Contract
/// - `on_subscribe` is called exactly once, before any other signal.
/// - `on_next` is called zero or more times, each `item` materially present
///   (never a sentinel), and never after a terminal signal.
/// - `on_error`/`on_complete` are mutually exclusive and each observed at
///   most once; once either fires, no further signal of any kind may be
///   observed from that subscription.
///
/// Implementations must not block or throw on any of these calls other than
/// for implementation bugs; a panicking `Subscriber` is a contract
/// violation the coordinators cannot protect against — truly-fatal
/// conditions are outside the retry/cancel machinery's remit.
pub trait Subscriber<T>: Send {
    /// Delivered exactly once, before any other signal on this subscriber.
    /// The subscription always exposes the fusion surface
    /// ([`QueueSubscription`]); operators that cannot fuse simply answer
    /// `FusionMode::None` to any negotiation attempt.
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>);
    /// Delivered for each produced item, respecting outstanding demand.
    fn on_next(&mut self, item: T);
    /// Terminal: delivered at most once, never alongside `on_complete`.
    fn on_error(&mut self, error: crate::error::FlowError);
    /// Terminal: delivered at most once, never alongside `on_error`.
    fn on_complete(&mut self);
}

/// A `Subscriber` that can additionally be offered a value *conditionally*.
///
/// `try_on_next` lets the producer skip the request/produced bookkeeping
/// decrement when the downstream declines the value (used by filtering
/// operators outside this crate's scope, but the hook is part of the
/// `ObserveOn` contract so it lives at this layer).
pub trait ConditionalSubscriber<T>: Subscriber<T> {
    /// Offer an item; returns `true` if it was accepted (equivalent to a
    /// normal `on_next`), `false` if the downstream declined it without
    /// that counting against requested demand.
    fn try_on_next(&mut self, item: T) -> bool;
}

/// The subscription handed to a `Subscriber` in `on_subscribe`.
///
/// # Contract
/// - `request(n)` with `n < 1` is a protocol violation: implementations
///   must treat it as such (surfaced as `OnError` by whichever operator
///   owns the subscription) rather than silently ignoring it or panicking.
/// - `cancel()` is idempotent and must never block or panic; it may race
///   freely with in-flight terminal signals.
pub trait Subscription: Send {
    /// Accumulate additional demand, saturating at [`crate::demand::UNBOUNDED`].
    fn request(&self, n: u64);
    /// Idempotently cancel. Never blocks, never panics.
    fn cancel(&self);
}

/// Shared instance of the "no-op, already cancelled" subscription used as a
/// process-lifetime sentinel: `Cancelled`/`Rejected` are trivial-teardown
/// singletons.
#[derive(Clone, Copy, Debug, Default)]
pub struct CancelledSubscription;

impl Subscription for CancelledSubscription {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {}
}

impl<T> crate::fusion::QueueSubscription<T> for CancelledSubscription {}
