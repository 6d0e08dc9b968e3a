//! Integration tests for synchronous dispatch.
//!
//! A sync-preferring consumer runs on the publishing thread only while the
//! bus switch allows it and the allow-list, if any, names it for the event
//! type. The gate is read on every enqueue.

mod common;

use std::sync::Arc;
use std::thread;

use herald_events::{
    BatchingStrategy, EventBusConfig, EventType, SubscriberConfig, SyncAllowlist,
};
use herald_test::{
    BatchRecordingSubscriber, DEFAULT_WAIT, OrderCancelled, OrderPlaced, RecordingSubscriber,
    wait_until,
};

use common::{ThreadTracker, order_bus, order_bus_with};

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_delivery_completes_before_publish_returns() {
    let bus = order_bus();
    let recorder = Arc::new(
        RecordingSubscriber::new()
            .listen(EventType::of::<OrderPlaced>())
            .sync(),
    );
    bus.register(Arc::clone(&recorder)).unwrap();

    bus.publish(OrderPlaced::new(1));
    assert_eq!(recorder.log().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_read_on_every_enqueue() {
    let bus = order_bus();
    let tracker = Arc::new(ThreadTracker::default());
    bus.register(Arc::clone(&tracker)).unwrap();
    let publisher = thread::current().id();

    bus.publish(OrderPlaced::new(1));
    assert_eq!(tracker.len(), 1);

    bus.sync_gate().set_allow_sync_subscribers(false);
    bus.publish(OrderPlaced::new(2));
    assert!(wait_until(DEFAULT_WAIT, || tracker.len() == 2).await);

    let threads = tracker.threads();
    assert_eq!(threads[0].1, publisher);
    assert_ne!(threads[1].1, publisher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_switch_off_from_config() {
    let bus = order_bus_with(EventBusConfig::default().with_allow_sync_subscribers(false));
    assert!(!bus.sync_gate().allow_sync_subscribers());
    let tracker = Arc::new(ThreadTracker::default());
    bus.register(Arc::clone(&tracker)).unwrap();

    bus.publish(OrderPlaced::new(1));
    assert!(wait_until(DEFAULT_WAIT, || tracker.len() == 1).await);
    assert_ne!(tracker.threads()[0].1, thread::current().id());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_allowlist_limits_sync_to_listed_types() {
    let bus = order_bus();
    let tracker = Arc::new(ThreadTracker::default());
    bus.register(Arc::clone(&tracker)).unwrap();
    bus.sync_gate()
        .set_allowlist(SyncAllowlist::new().allow("ThreadTracker", "OrderPlaced"));
    let publisher = thread::current().id();

    bus.publish(OrderPlaced::new(1));
    bus.publish(OrderCancelled::new(2));
    assert!(wait_until(DEFAULT_WAIT, || tracker.len() == 2).await);

    let threads = tracker.threads();
    let placed = threads
        .iter()
        .find(|(ty, _)| *ty == EventType::of::<OrderPlaced>())
        .unwrap();
    let cancelled = threads
        .iter()
        .find(|(ty, _)| *ty == EventType::of::<OrderCancelled>())
        .unwrap();
    assert_eq!(placed.1, publisher);
    assert_ne!(cancelled.1, publisher);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_allowlist_excludes_unlisted_subscribers() {
    let bus = order_bus();
    let tracker = Arc::new(ThreadTracker::default());
    bus.register(Arc::clone(&tracker)).unwrap();
    bus.sync_gate()
        .set_allowlist_json(r#"{"SomeoneElse": []}"#)
        .unwrap();

    bus.publish(OrderPlaced::new(1));
    assert!(wait_until(DEFAULT_WAIT, || tracker.len() == 1).await);
    assert_ne!(tracker.threads()[0].1, thread::current().id());

    // A malformed list is rejected and the previous one kept.
    assert!(bus.sync_gate().set_allowlist_json("not json").is_err());
    assert_eq!(bus.sync_gate().allowlist().map(|list| list.len()), Some(1));

    // An empty array allows every event type.
    bus.sync_gate()
        .set_allowlist_json(r#"{"ThreadTracker": []}"#)
        .unwrap();
    bus.publish(OrderCancelled::new(2));
    assert_eq!(tracker.len(), 2);

    bus.sync_gate().clear_allowlist();
    assert!(bus.sync_gate().allowlist().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_sync_dispatch_to_batch_consumer_delivers_single_batch() {
    let override_config = SubscriberConfig {
        batching: BatchingStrategy::Age,
        batch_age_ms: 3_600_000,
        sync_if_allowed: true,
        ..SubscriberConfig::default()
    };
    let bus = order_bus_with(
        EventBusConfig::default().with_subscriber("BatchRecordingSubscriber.batch", override_config),
    );
    let batcher = Arc::new(BatchRecordingSubscriber::by_age(
        EventType::of::<OrderPlaced>(),
        std::time::Duration::from_secs(3600),
    ));
    let infos = bus.register(Arc::clone(&batcher)).unwrap();
    assert!(infos[0].config().sync_if_allowed);

    bus.publish(OrderPlaced::new(1));
    bus.publish(OrderPlaced::new(2));
    assert_eq!(batcher.log().sizes(), vec![1, 1]);
}
