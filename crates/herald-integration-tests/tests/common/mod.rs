//! Shared helpers for integration tests.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::thread::ThreadId;
use std::time::{Duration, Instant};

use herald_events::{Entry, EventBus, EventBusConfig, EventType, SubscriberInfo};
use herald_events::{Event, Subscriber};
use herald_test::{OrderEvent, OrderPlaced, declare_order_hierarchy, init_test_logging};

/// Longest time a [`Latch`] holds a handler before giving up on its own.
const LATCH_LIMIT: Duration = Duration::from_secs(5);

/// A bus with the order hierarchy declared.
pub fn order_bus() -> EventBus {
    order_bus_with(EventBusConfig::default())
}

/// A bus built from `config` with the order hierarchy declared.
pub fn order_bus_with(config: EventBusConfig) -> EventBus {
    init_test_logging();
    let bus = EventBus::with_config(config);
    declare_order_hierarchy(&bus);
    bus
}

/// The single consumer a registration produced.
pub fn only(infos: Vec<SubscriberInfo>) -> SubscriberInfo {
    assert_eq!(infos.len(), 1, "expected exactly one consumer");
    infos.into_iter().next().unwrap()
}

/// Holds handlers until released.
///
/// Releases itself after a few seconds so a failing test cannot wedge the
/// blocking pool.
#[derive(Debug, Clone, Default)]
pub struct Latch {
    released: Arc<AtomicBool>,
    entered: Arc<AtomicUsize>,
}

impl Latch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Block the calling handler until [`release`](Self::release).
    pub fn hold(&self) {
        self.entered.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();
        while !self.released.load(Ordering::SeqCst) && started.elapsed() < LATCH_LIMIT {
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    pub fn release(&self) {
        self.released.store(true, Ordering::SeqCst);
    }

    /// Number of handler invocations that reached [`hold`](Self::hold).
    pub fn entered(&self) -> usize {
        self.entered.load(Ordering::SeqCst)
    }
}

/// Records order ids of `OrderPlaced` events, holding each delivery on a
/// latch first.
pub struct SlowOrders {
    pub latch: Latch,
    pub seen: herald_test::EventLog,
    pub queue_size: usize,
}

impl SlowOrders {
    pub fn new(queue_size: usize) -> Self {
        Self {
            latch: Latch::new(),
            seen: herald_test::EventLog::new(),
            queue_size,
        }
    }

    pub fn order_ids(&self) -> Vec<u64> {
        self.seen
            .payloads::<OrderPlaced>()
            .into_iter()
            .map(|order| order.order_id)
            .collect()
    }
}

impl Subscriber for SlowOrders {
    fn entries(self: Arc<Self>) -> Vec<Entry> {
        let queue_size = self.queue_size;
        vec![
            Entry::on_event(EventType::of::<OrderPlaced>(), move |event| {
                self.latch.hold();
                self.seen.push(event.clone());
                Ok(())
            })
            .queue_size(queue_size),
        ]
    }
}

/// Records the thread each `OrderEvent`-family delivery ran on.
#[derive(Default)]
pub struct ThreadTracker {
    threads: std::sync::Mutex<Vec<(EventType, ThreadId)>>,
}

impl ThreadTracker {
    pub fn threads(&self) -> Vec<(EventType, ThreadId)> {
        self.threads.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.threads.lock().unwrap().len()
    }
}

impl Subscriber for ThreadTracker {
    fn entries(self: Arc<Self>) -> Vec<Entry> {
        vec![
            Entry::on_event(EventType::of::<OrderEvent>(), move |event: &Event| {
                self.threads
                    .lock()
                    .unwrap()
                    .push((event.event_type(), std::thread::current().id()));
                Ok(())
            })
            .sync_if_allowed(true),
        ]
    }
}
