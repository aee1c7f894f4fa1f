//! "Cancellation halts" and "idempotent cancel": after `Cancel`, no further
//! signal is observed, and calling `Cancel` repeatedly is equivalent to
//! calling it once.
use rxcore::deferred::multi::{MultiSubscription, SwitchPolicy};
use rxcore::deferred::subscription::DeferredSubscription;
use rxcore::subscriber::{CancelledSubscription, Subscriber, Subscription};
use rxcore::testing::RecordingSubscriber;
use rxcore::zip::Zip;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

struct CountingSub {
    cancelled: Arc<AtomicU64>,
}
impl Subscription for CountingSub {
    fn request(&self, _n: u64) {}
    fn cancel(&self) {
        self.cancelled.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn deferred_subscription_cancel_is_idempotent() {
    let arb = DeferredSubscription::new();
    let cancelled = Arc::new(AtomicU64::new(0));
    arb.set(Box::new(CountingSub {
        cancelled: Arc::clone(&cancelled),
    }));

    arb.cancel();
    arb.cancel();
    arb.cancel();

    assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    assert!(arb.is_cancelled());
}

#[test]
fn multi_subscription_cancel_is_idempotent_and_rejects_later_installs() {
    let arb = MultiSubscription::new(SwitchPolicy::CancelPrevious);
    let first_cancelled = Arc::new(AtomicU64::new(0));
    arb.set_subscription(Box::new(CountingSub {
        cancelled: Arc::clone(&first_cancelled),
    }));

    arb.cancel();
    arb.cancel();
    assert_eq!(first_cancelled.load(Ordering::SeqCst), 1);

    let second_cancelled = Arc::new(AtomicU64::new(0));
    arb.set_subscription(Box::new(CountingSub {
        cancelled: Arc::clone(&second_cancelled),
    }));
    assert_eq!(
        second_cancelled.load(Ordering::SeqCst),
        1,
        "a subscription installed after cancel must be cancelled on arrival"
    );
}

#[test]
fn zip_cancel_suppresses_all_further_emissions() {
    let (sub, log) = RecordingSubscriber::<i32>::new();
    let zip = Zip::new(
        2,
        |mut values: Vec<Box<dyn std::any::Any + Send>>| {
            let b = *values.pop().unwrap().downcast::<i32>().unwrap();
            let a = *values.pop().unwrap().downcast::<i32>().unwrap();
            a + b
        },
        4,
        Box::new(sub),
    );
    let mut a = zip.rail::<i32>(0);
    let mut b = zip.rail::<i32>(1);
    a.on_subscribe(Box::new(CancelledSubscription));
    b.on_subscribe(Box::new(CancelledSubscription));

    log.subscription().request(100);
    a.on_next(1);
    b.on_next(10);
    assert_eq!(log.items(), vec![11]);

    log.subscription().cancel();
    log.subscription().cancel(); // idempotent

    a.on_next(2);
    b.on_next(20);

    assert_eq!(log.items(), vec![11], "no emission must follow cancellation");
    assert!(!log.completed());
}
