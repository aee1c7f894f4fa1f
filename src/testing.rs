//! Reusable test stubs: a single place maintaining the recording
//! `Subscriber` and helper scheduler used by this crate's own
//! unit/integration/contract tests, so assertions stay consistent as the
//! protocol evolves.
//!
//! Kept public (not `#[cfg(test)]`-gated) so integration tests under
//! `tests/` can import it the same way a crate's own contract-test suite
//! imports its shared stubs module.
use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::error::FlowError;
use crate::fusion::{FusionMode, QueueSubscription};
use crate::subscriber::Subscriber;

struct Recording<T> {
    items: Vec<T>,
    error: Option<FlowError>,
    completed: bool,
    subscribe_count: u32,
    subscription: Option<Box<dyn QueueSubscription<T>>>,
}

impl<T> Default for Recording<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            error: None,
            completed: false,
            subscribe_count: 0,
            subscription: None,
        }
    }
}

/// A `Subscriber` that records every signal it observes, for assertions in
/// tests.
pub struct RecordingSubscriber<T> {
    shared: Arc<spin::Mutex<Recording<T>>>,
}

/// A handle to the same recorded state as a [`RecordingSubscriber`], plus a
/// proxy for driving the subscription it was handed.
#[derive(Clone)]
pub struct RecordingLog<T> {
    shared: Arc<spin::Mutex<Recording<T>>>,
}

impl<T: Send + 'static> RecordingSubscriber<T> {
    /// Construct a fresh recording subscriber and the log handle used to
    /// inspect it.
    pub fn new() -> (Self, RecordingLog<T>) {
        let shared = Arc::new(spin::Mutex::new(Recording::default()));
        (
            Self {
                shared: Arc::clone(&shared),
            },
            RecordingLog { shared },
        )
    }
}

impl<T: Send + 'static> Subscriber<T> for RecordingSubscriber<T> {
    fn on_subscribe(&mut self, subscription: Box<dyn QueueSubscription<T>>) {
        let mut guard = self.shared.lock();
        guard.subscribe_count += 1;
        guard.subscription = Some(subscription);
    }

    fn on_next(&mut self, item: T) {
        self.shared.lock().items.push(item);
    }

    fn on_error(&mut self, error: FlowError) {
        self.shared.lock().error = Some(error);
    }

    fn on_complete(&mut self) {
        self.shared.lock().completed = true;
    }
}

impl<T: Send + 'static> RecordingLog<T> {
    /// Items observed so far, in arrival order.
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        self.shared.lock().items.clone()
    }

    /// Number of items observed so far.
    pub fn item_count(&self) -> usize {
        self.shared.lock().items.len()
    }

    /// How many times `on_subscribe` fired (contract: must end at exactly 1).
    pub fn subscribe_count(&self) -> u32 {
        self.shared.lock().subscribe_count
    }

    /// True once `on_complete` has fired.
    pub fn completed(&self) -> bool {
        self.shared.lock().completed
    }

    /// The error reported through `on_error`, if any, described as its
    /// stable code (errors aren't `Clone`, so we surface the code instead).
    pub fn error_code(&self) -> Option<&'static str> {
        self.shared.lock().error.as_ref().map(|e| e.code())
    }

    /// A proxy for the subscription handed to the recording subscriber.
    /// Panics if `on_subscribe` has not fired yet.
    pub fn subscription(&self) -> SubscriptionProxy<T> {
        assert!(
            self.shared.lock().subscription.is_some(),
            "on_subscribe has not been observed yet"
        );
        SubscriptionProxy {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Forwards calls into the subscription captured by a [`RecordingSubscriber`].
pub struct SubscriptionProxy<T> {
    shared: Arc<spin::Mutex<Recording<T>>>,
}

impl<T> SubscriptionProxy<T> {
    pub fn request(&self, n: u64) {
        use crate::subscriber::Subscription;
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .request(n);
    }

    pub fn cancel(&self) {
        use crate::subscriber::Subscription;
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .cancel();
    }

    pub fn poll(&self) -> Option<T> {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .poll()
    }

    pub fn is_empty(&self) -> bool {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .is_empty()
    }

    pub fn clear(&self) {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .clear();
    }

    pub fn request_fusion(&self, requested: FusionMode) -> FusionMode {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .request_fusion(requested)
    }

    pub fn is_done(&self) -> bool {
        self.shared
            .lock()
            .subscription
            .as_ref()
            .expect("subscription present")
            .is_done()
    }
}
