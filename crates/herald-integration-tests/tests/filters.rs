//! Integration tests for event-level and consumer-level filters.

#![allow(clippy::arithmetic_side_effects)]

mod common;

use std::sync::Arc;

use herald_events::{AlwaysFalseFilter, AlwaysTrueFilter, Event, EventType, Filter, FnFilter};
use herald_test::{
    DEFAULT_WAIT, Heartbeat, OrderCancelled, OrderEvent, OrderPlaced, RecordingSubscriber,
    settle, wait_until,
};

use common::{only, order_bus};

fn even_orders() -> Filter {
    Arc::new(FnFilter::new("order_id % 2 == 0", |event: &Event| {
        event
            .downcast_ref::<OrderPlaced>()
            .is_some_and(|order| order.order_id % 2 == 0)
    }))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_filter_gates_exact_type() {
    let bus = order_bus();
    let orders = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderEvent>()));
    bus.register(Arc::clone(&orders)).unwrap();

    bus.add_filter_for_event(EventType::of::<OrderPlaced>(), even_orders());

    bus.publish(OrderPlaced::new(1));
    bus.publish(OrderPlaced::new(2));
    bus.publish(OrderCancelled::new(3));

    assert!(wait_until(DEFAULT_WAIT, || orders.log().len() == 2).await);
    settle().await;
    assert_eq!(orders.log().payloads::<OrderPlaced>(), vec![OrderPlaced::new(2)]);
    assert_eq!(orders.log().count_of::<OrderCancelled>(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_event_filter_management() {
    let bus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    bus.register(Arc::clone(&recorder)).unwrap();

    let placed = EventType::of::<OrderPlaced>();
    let reject: Filter = Arc::new(AlwaysFalseFilter);
    let accept: Filter = Arc::new(AlwaysTrueFilter);
    bus.add_filter_for_event(placed, Arc::clone(&reject));
    bus.add_filter_for_event(placed, Arc::clone(&accept));
    assert_eq!(bus.filters_for_event(placed).len(), 2);

    bus.publish(OrderPlaced::new(1));
    settle().await;
    assert!(recorder.log().is_empty());

    assert_eq!(bus.remove_filters_for_event(placed, &[reject]), 1);
    assert_eq!(bus.filters_for_event(placed)[0].serialize(), "true");

    bus.publish(OrderPlaced::new(2));
    assert!(wait_until(DEFAULT_WAIT, || recorder.log().len() == 1).await);

    assert!(bus.clear_filters_for_event(placed));
    assert!(!bus.clear_filters_for_event(placed));
    assert!(bus.filters_for_event(placed).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_filter_only_types_are_registered() {
    let bus = order_bus();
    bus.add_filter_for_event(EventType::of::<Heartbeat>(), Arc::new(AlwaysTrueFilter));
    assert!(bus
        .registered_event_types()
        .contains(&EventType::of::<Heartbeat>()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_consumer_filter_is_per_consumer() {
    let bus = order_bus();
    let muted = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    let open = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    let muted_info = only(
        bus.register_with_filter(Arc::clone(&muted), Some(Arc::new(AlwaysFalseFilter)))
            .unwrap(),
    );
    bus.register(Arc::clone(&open)).unwrap();

    bus.publish(OrderPlaced::new(1));
    bus.publish(OrderPlaced::new(2));

    assert!(wait_until(DEFAULT_WAIT, || open.log().len() == 2).await);
    assert!(
        wait_until(DEFAULT_WAIT, || {
            bus.consumer_stats(&muted_info)
                .is_some_and(|stats| stats.filtered == 2)
        })
        .await
    );
    assert!(muted.log().is_empty());

    assert!(bus.clear_filters_for_subscriber(&muted_info));
    assert!(bus.filters_for_subscriber(&muted_info).is_empty());
    bus.publish(OrderPlaced::new(3));
    assert!(wait_until(DEFAULT_WAIT, || muted.log().len() == 1).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_subscriber_filter_management() {
    let bus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    let info = only(bus.register(Arc::clone(&recorder)).unwrap());

    let even = even_orders();
    assert!(bus.add_filter_for_subscriber(&info, Arc::clone(&even)));
    assert_eq!(bus.filters_for_subscriber(&info).len(), 1);

    for id in 1..=4 {
        bus.publish(OrderPlaced::new(id));
    }
    assert!(wait_until(DEFAULT_WAIT, || recorder.log().len() == 2).await);
    settle().await;
    assert_eq!(
        recorder.log().payloads::<OrderPlaced>(),
        vec![OrderPlaced::new(2), OrderPlaced::new(4)]
    );

    assert_eq!(bus.remove_filters_for_subscriber(&info, &[even]), 1);
    assert!(bus.filters_for_subscriber(&info).is_empty());

    bus.unregister_instance(&recorder);
    assert!(!bus.add_filter_for_subscriber(&info, Arc::new(AlwaysTrueFilter)));
    assert!(bus.filters_for_subscriber(&info).is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_filter_rejects() {
    let bus = order_bus();
    let recorder = Arc::new(RecordingSubscriber::new().listen(EventType::of::<OrderPlaced>()));
    bus.register(Arc::clone(&recorder)).unwrap();

    bus.add_filter_for_event(
        EventType::of::<OrderPlaced>(),
        Arc::new(FnFilter::new("explodes", |_: &Event| panic!("filter bug"))),
    );

    bus.publish(OrderPlaced::new(1));
    settle().await;
    assert!(recorder.log().is_empty());
    assert_eq!(bus.stats().publish_errors, 0);
}
