//! Integration tests for publishing only when someone is listening.

mod common;

use std::collections::HashSet;
use std::sync::Arc;

use herald_events::{Event, EventBus, EventType};
use herald_test::{
    DEFAULT_WAIT, Heartbeat, OrderEvent, OrderPlaced, RecordingSubscriber, settle, wait_until,
};

use common::order_bus;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_creator_skipped_without_live_candidate() {
    let bus = order_bus();
    let mut calls = 0usize;
    let mut creator = |_: &HashSet<EventType>| {
        calls = calls.saturating_add(1);
        vec![Event::new(Heartbeat(1))]
    };

    bus.publish_iff_not_dead(&mut creator, &[EventType::of::<Heartbeat>()]);
    assert_eq!(calls, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_candidates_reach_consumers_through_ancestors() {
    let bus = order_bus();
    let orders = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderEvent>()));
    bus.register(Arc::clone(&orders)).unwrap();

    let mut seen_live = HashSet::new();
    let mut creator = |live: &HashSet<EventType>| {
        seen_live.clone_from(live);
        vec![Event::new(OrderPlaced::new(1)), Event::new(Heartbeat(2))]
    };
    bus.publish_iff_not_dead(
        &mut creator,
        &[EventType::of::<OrderPlaced>(), EventType::of::<Heartbeat>()],
    );

    assert_eq!(seen_live, HashSet::from([EventType::of::<OrderPlaced>()]));
    assert!(wait_until(DEFAULT_WAIT, || orders.log().len() == 1).await);
    settle().await;
    assert_eq!(orders.log().count_of::<OrderPlaced>(), 1);
    assert_eq!(orders.log().count_of::<Heartbeat>(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_events_matched_by_exact_type() {
    let bus = order_bus();
    let orders = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderEvent>()));
    bus.register(Arc::clone(&orders)).unwrap();

    // OrderEvent is live, but the created event is an OrderPlaced, which was
    // not a candidate.
    let mut creator = |_: &HashSet<EventType>| vec![Event::new(OrderPlaced::new(1))];
    bus.publish_iff_not_dead(&mut creator, &[EventType::of::<OrderEvent>()]);

    settle().await;
    assert!(orders.log().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conditional_publish_bypasses_catch_all() {
    let bus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    bus.register(Arc::clone(&recorder)).unwrap();
    let mut catch_all = bus.catch_all_channel().unwrap();

    let mut creator = |_: &HashSet<EventType>| vec![Event::new(OrderPlaced::new(1))];
    bus.publish_iff_not_dead(&mut creator, &[EventType::of::<OrderPlaced>()]);

    assert!(wait_until(DEFAULT_WAIT, || recorder.log().len() == 1).await);
    assert!(catch_all.try_recv().is_err());
    assert_eq!(bus.stats().catch_all.forwarded, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_conditional_publish_applies_event_filters() {
    let bus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    bus.register(Arc::clone(&recorder)).unwrap();
    bus.add_filter_for_event(
        EventType::of::<OrderPlaced>(),
        Arc::new(herald_events::AlwaysFalseFilter),
    );

    let mut creator = |_: &HashSet<EventType>| vec![Event::new(OrderPlaced::new(1))];
    bus.publish_iff_not_dead(&mut creator, &[EventType::of::<OrderPlaced>()]);

    settle().await;
    assert!(recorder.log().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_creator_is_counted() {
    let bus: EventBus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    bus.register(Arc::clone(&recorder)).unwrap();

    let mut creator = |_: &HashSet<EventType>| -> Vec<Event> { panic!("creator bug") };
    bus.publish_iff_not_dead(&mut creator, &[EventType::of::<OrderPlaced>()]);

    assert_eq!(bus.stats().conditional_publish_errors, 1);
    assert_eq!(bus.stats().publish_errors, 0);

    // The bus keeps working.
    bus.publish(OrderPlaced::new(2));
    assert!(wait_until(DEFAULT_WAIT, || recorder.log().len() == 1).await);
}
