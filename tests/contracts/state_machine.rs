//! Model-based check of `DeferredScalar`'s four-state `NN`/`NR`/`RN`/`RR`
//! automaton: for any interleaving of `request`/`complete`/`cancel`, the
//! downstream observes at most one `on_next` immediately followed by
//! `on_complete`, or nothing at all — never a partial or doubled emission.
use proptest::prelude::*;
use rxcore::deferred::scalar::DeferredScalar;
use rxcore::fusion::FusionMode;
use rxcore::testing::RecordingSubscriber;

#[derive(Clone, Copy, Debug)]
enum Call {
    Request,
    Complete,
    Cancel,
}

fn calls() -> impl Strategy<Value = Vec<Call>> {
    prop::collection::vec(
        prop_oneof![Just(Call::Request), Just(Call::Complete), Just(Call::Cancel)],
        0..6,
    )
}

proptest! {
    #[test]
    fn any_call_order_yields_at_most_one_clean_emission(calls in calls()) {
        let (sub, log) = RecordingSubscriber::<u32>::new();
        let scalar = DeferredScalar::new(Box::new(sub));
        scalar.subscribe();

        for call in calls {
            match call {
                Call::Request => log.subscription().request(1),
                Call::Complete => scalar.complete(42),
                Call::Cancel => log.subscription().cancel(),
            }
        }

        let items = log.items();
        prop_assert!(items.is_empty() || items == vec![42]);
        if !items.is_empty() {
            prop_assert!(log.completed());
        }
        prop_assert_eq!(log.subscribe_count(), 1);
    }
}

#[test]
fn sync_fusion_negotiation_is_fixed_for_subscription_lifetime() {
    let (sub, log) = RecordingSubscriber::<u32>::new();
    let scalar = DeferredScalar::new(Box::new(sub));
    scalar.subscribe();

    let granted_first = log.subscription().request_fusion(FusionMode::Any);
    let granted_second = log.subscription().request_fusion(FusionMode::Any);
    assert_eq!(granted_first, FusionMode::Async);
    assert_eq!(granted_second, FusionMode::Async, "negotiated mode must be stable");

    scalar.complete(5);
    assert_eq!(log.subscription().poll(), Some(5));
    assert_eq!(log.subscription().poll(), None);
}
