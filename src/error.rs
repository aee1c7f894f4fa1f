//! Crate-wide error type and the unsignalled-exception sink.
//!
//! # Design background (Why)
//! Reactive Streams draws a hard line between errors that can still reach a
//! `Subscriber` through `OnError` and errors discovered *after* a terminal
//! signal has already been delivered. The former become a [`FlowError`]
//! passed to `OnError`; the latter are hosted in the crate-wide
//! [`unsignalled`] sink instead of being dropped on the floor. A single error
//! type carries a stable code plus an optional cause, constructed through a
//! `codes` module rather than ad-hoc string literals.
use alloc::boxed::Box;
use alloc::string::String;
use core::fmt;

/// Stable, namespaced error codes, grouped by the failure class they name.
pub mod codes {
    /// `Request(n)` called with `n <= 0`.
    pub const PROTOCOL_NON_POSITIVE_REQUEST: &str = "protocol.non_positive_request";
    /// A `null`/absent item reached a signal that forbids it.
    pub const PROTOCOL_NULL_ITEM: &str = "protocol.null_item";
    /// More items were produced than were ever requested.
    pub const PROTOCOL_OVER_PRODUCTION: &str = "protocol.over_production";
    /// A signal was observed after a terminal signal had already fired.
    pub const PROTOCOL_SIGNAL_AFTER_TERMINAL: &str = "protocol.signal_after_terminal";
    /// A user-supplied mapper/reducer/predicate/selector threw or returned
    /// an invalid value.
    pub const OPERATOR_CALLBACK_FAILED: &str = "operator.callback_failed";
    /// A bounded prefetch queue rejected an offer.
    pub const OPERATOR_QUEUE_FULL: &str = "operator.queue_full";
    /// `Join` backpressure was exhausted mid-iteration.
    pub const OPERATOR_INSUFFICIENT_REQUESTS: &str = "operator.insufficient_requests";
    /// A `Worker`/`Scheduler` rejected a submission because it was shut down.
    pub const SCHEDULER_REJECTED: &str = "scheduler.rejected";
    /// Fusion mode negotiated twice, or an invalid mode was requested.
    pub const FUSION_PROTOCOL_VIOLATION: &str = "fusion.protocol_violation";
}

/// The crate's single error type. Carries a stable code, a human message and
/// an optional boxed cause.
#[derive(Debug)]
pub struct FlowError {
    code: &'static str,
    message: String,
    cause: Option<Box<FlowError>>,
}

impl FlowError {
    /// Construct an error with a stable code and message.
    pub fn new(code: &'static str, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            cause: None,
        }
    }

    /// Attach an underlying cause, building a short error chain.
    pub fn with_cause(mut self, cause: FlowError) -> Self {
        self.cause = Some(Box::new(cause));
        self
    }

    /// The stable, namespaced error code (see [`codes`]).
    pub fn code(&self) -> &'static str {
        self.code
    }

    /// Human-readable message, safe to log.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The underlying cause, if one was attached.
    pub fn cause(&self) -> Option<&FlowError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(cause) = &self.cause {
            write!(f, " (caused by {cause})")?;
        }
        Ok(())
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlowError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.as_deref().map(|c| c as &(dyn std::error::Error + 'static))
    }
}

/// Result alias used throughout the crate's public API.
pub type Result<T, E = FlowError> = core::result::Result<T, E>;

/// The unsignalled-exception sink.
///
/// Once a subscription has already reached a terminal state, no further
/// `OnError` can be delivered. Operators route any error discovered after
/// that point here instead of swallowing it silently.
pub mod unsignalled {
    use super::FlowError;

    /// Report an error that arrived too late to be delivered through
    /// `OnError`. The default sink emits a `tracing::error!` event; callers
    /// that need programmatic access (tests, alternate sinks) should
    /// install their own hook via [`set_hook`].
    pub fn report(error: FlowError) {
        let hook = HOOK.lock();
        match &*hook {
            Some(f) => f(error),
            None => tracing::error!(code = error.code(), message = %error.message(), "unsignalled exception"),
        }
    }

    type Hook = alloc::boxed::Box<dyn Fn(FlowError) + Send + Sync + 'static>;

    static HOOK: spin::Mutex<Option<Hook>> = spin::Mutex::new(None);

    /// Install a custom sink, primarily for tests that want to assert on
    /// unsignalled errors instead of letting them fall into `tracing`.
    pub fn set_hook(hook: impl Fn(FlowError) + Send + Sync + 'static) {
        *HOOK.lock() = Some(alloc::boxed::Box::new(hook));
    }

    /// Restore the default `tracing`-based sink.
    pub fn clear_hook() {
        *HOOK.lock() = None;
    }
}
