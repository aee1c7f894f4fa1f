//! Queue-fusion protocol.
//!
//! # Why
//! Fusion lets an operator expose itself as both a `Subscription` and a
//! pull-queue so a downstream operator can bypass per-item request/next
//! ping-pong. The negotiation is a single method call at `on_subscribe`
//! time; once negotiated, the mode is fixed for the life of the
//! subscription.
use crate::subscriber::Subscription;

/// The fusion mode requested or granted during negotiation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FusionMode {
    /// No fusion: plain request/next signalling.
    None,
    /// Upstream is finite and synchronous; `poll()` drives everything and
    /// `poll() == None` *is* completion.
    Sync,
    /// Upstream calls `on_next` only as a "work is ready" sentinel; actual
    /// values come from `poll()`, and `done` is set before the final empty
    /// poll.
    Async,
    /// Downstream accepts either `Sync` or `Async`; upstream picks.
    Any,
}

/// A `Subscription` that can additionally be driven as a pull-queue.
///
/// Every subscription handed to a [`crate::subscriber::Subscriber`] in this
/// crate implements `QueueSubscription`, folding an optional capability into
/// the base contract with a "declines by default" implementation rather than
/// modelling it as a separate, downcast-at-runtime interface — `Box<dyn Any>`
/// downcasting would need the consumer to already know the concrete
/// producer type, defeating the point of negotiation. Operators that cannot
/// fuse simply never override the default methods below.
///
/// # Contract
/// - In `Sync` mode, `poll()` returning `None` *is* the completion signal;
///   the producer must not call `on_next`/`on_complete` through the
///   `Subscriber` interface once fusion is established.
/// - In `Async` mode, `poll()` returning `None` means "empty for now"; the
///   consumer must check [`is_done`](QueueSubscription::is_done) — set by
///   the producer's `on_complete`/`on_error` — *before* each empty poll, to
///   distinguish "empty for now" from "empty forever".
pub trait QueueSubscription<T>: Subscription {
    /// Pull the next buffered value, if any. Declines fusion by default.
    fn poll(&self) -> Option<T> {
        None
    }
    /// True if the queue currently holds nothing. Vacuously true for
    /// non-fusable subscriptions.
    fn is_empty(&self) -> bool {
        true
    }
    /// Drop all buffered values without emitting them. No-op by default.
    fn clear(&self) {}
    /// Negotiate a fusion mode. `requested` is the mode the consumer would
    /// accept; the return value is what was actually granted and is fixed
    /// for the subscription's lifetime. Declines (`None`) by default.
    fn request_fusion(&self, _requested: FusionMode) -> FusionMode {
        FusionMode::None
    }
    /// Only meaningful in `Async` mode: true once the producer has called
    /// `on_complete`/`on_error` and will push no further items.
    fn is_done(&self) -> bool {
        false
    }
}
