//! "Demand respected": across the multi-source coordinators, cumulative
//! emitted items never exceed cumulative requested amounts.
use rxcore::demand::UNBOUNDED;
use rxcore::join::Join;
use rxcore::reduce_full::ReduceFull;
use rxcore::subscriber::{CancelledSubscription, Subscriber};
use rxcore::testing::RecordingSubscriber;
use rxcore::zip::Zip;

#[test]
fn zip_never_emits_ahead_of_request() {
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

    log.subscription().request(2);
    for item in 1..=10 {
        a.on_next(item);
        b.on_next(item * 10);
    }

    assert_eq!(log.item_count(), 2);
    assert_eq!(log.items(), vec![11, 22]);

    log.subscription().request(3);
    assert_eq!(log.item_count(), 5);
}

#[test]
fn reduce_full_withholds_result_until_demand_arrives() {
    let (sub, log) = RecordingSubscriber::<i32>::new();
    let reduce = ReduceFull::new(2, |a, b| a + b, Box::new(sub));

    struct Noop;
    impl rxcore::subscriber::Subscription for Noop {
        fn request(&self, _n: u64) {}
        fn cancel(&self) {}
    }
    impl<T> rxcore::fusion::QueueSubscription<T> for Noop {}

    let mut rail0 = reduce.rail(0);
    rail0.on_subscribe(Box::new(Noop));
    rail0.on_next(1);
    rail0.on_complete();

    let mut rail1 = reduce.rail(1);
    rail1.on_subscribe(Box::new(Noop));
    rail1.on_next(2);
    rail1.on_complete();

    // The carry is ready but withheld: no request was ever issued.
    assert!(log.items().is_empty());
    log.subscription().request(1);
    assert_eq!(log.items(), vec![3]);
}

#[test]
fn join_terminates_rather_than_exceed_outstanding_demand() {
    let (sub, log) = RecordingSubscriber::<(i32, i32)>::new();
    let join = Join::new(UNBOUNDED, UNBOUNDED, |l: &i32, r: &i32| (*l, *r), Box::new(sub));
    join.start();
    log.subscription().request(2);

    let mut left = join.left_rail();
    let mut right = join.right_rail();
    left.on_subscribe(Box::new(CancelledSubscription));
    right.on_subscribe(Box::new(CancelledSubscription));

    right.on_next((1, 0));
    right.on_next((2, 0));
    right.on_next((3, 0));
    // Third right value correlates against one live left below and would
    // be the third emission against only 2 requested — must fail instead
    // of silently over-delivering.
    left.on_next((10, 0));

    assert!(log.item_count() <= 2);
    assert_eq!(
        log.error_code(),
        Some(rxcore::error::codes::OPERATOR_INSUFFICIENT_REQUESTS)
    );
}
