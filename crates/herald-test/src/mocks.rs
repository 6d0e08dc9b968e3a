//! Recording subscribers and stats sinks.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use herald_events::{
    BatchingStrategy, Entry, Event, EventType, Metric, StatsSink, Subscriber, SubscriberConfig,
};

/// Shared, append-only log of delivered events.
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<Event>>>,
}

impl EventLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an event.
    pub fn push(&self, event: Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    /// Number of recorded events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing has been recorded.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of the recorded events in delivery order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of recorded events whose payload is exactly a `T`.
    #[must_use]
    pub fn count_of<T: Any>(&self) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|event| event.is::<T>())
            .count()
    }

    /// Recorded payloads of type `T`, cloned.
    #[must_use]
    pub fn payloads<T: Any + Clone>(&self) -> Vec<T> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(|event| event.downcast_ref::<T>().cloned())
            .collect()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Subscriber that records every event delivered to it.
///
/// Contributes one single-event entry per listened type. Entries are named
/// after their type's short name, so bus configuration can target them as
/// `"RecordingSubscriber.OrderPlaced"`.
#[derive(Debug, Default)]
pub struct RecordingSubscriber {
    targets: Vec<EventType>,
    config: SubscriberConfig,
    log: EventLog,
}

impl RecordingSubscriber {
    /// A recorder listening to nothing yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also listen to `event_type` and its descendants.
    #[must_use]
    pub fn listen(mut self, event_type: EventType) -> Self {
        self.targets.push(event_type);
        self
    }

    /// Delivery settings applied to every entry.
    #[must_use]
    pub fn with_config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    /// Prefer synchronous delivery when the bus allows it.
    #[must_use]
    pub fn sync(mut self) -> Self {
        self.config.sync_if_allowed = true;
        self
    }

    /// Queue capacity of every entry.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = Some(size);
        self
    }

    /// The events received so far.
    #[must_use]
    pub fn log(&self) -> &EventLog {
        &self.log
    }
}

impl Subscriber for RecordingSubscriber {
    fn entries(self: Arc<Self>) -> Vec<Entry> {
        self.targets
            .iter()
            .map(|ty| {
                let log = self.log.clone();
                Entry::on_event(*ty, move |event| {
                    log.push(event.clone());
                    Ok(())
                })
                .named(ty.short_name())
                .with_config(self.config.clone())
            })
            .collect()
    }
}

/// Shared log of delivered batches, filtered as the handler saw them.
#[derive(Debug, Clone, Default)]
pub struct BatchLog {
    batches: Arc<Mutex<Vec<Vec<Event>>>>,
}

impl BatchLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a batch.
    pub fn push(&self, batch: Vec<Event>) {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(batch);
    }

    /// Number of delivered batches.
    #[must_use]
    pub fn len(&self) -> usize {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no batch has been delivered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Size of every delivered batch in delivery order.
    #[must_use]
    pub fn sizes(&self) -> Vec<usize> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(Vec::len)
            .collect()
    }

    /// Total events across all delivered batches.
    #[must_use]
    pub fn total_events(&self) -> usize {
        self.sizes().iter().copied().fold(0, usize::saturating_add)
    }

    /// Copy of the delivered batches.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Vec<Event>> {
        self.batches
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Subscriber with one batching entry over `element` and its descendants.
#[derive(Debug)]
pub struct BatchRecordingSubscriber {
    element: EventType,
    config: SubscriberConfig,
    log: BatchLog,
}

impl BatchRecordingSubscriber {
    /// Age batching over `element`.
    #[must_use]
    pub fn by_age(element: EventType, age: Duration) -> Self {
        Self {
            element,
            config: SubscriberConfig {
                batching: BatchingStrategy::Age,
                batch_age_ms: millis(age),
                ..SubscriberConfig::default()
            },
            log: BatchLog::new(),
        }
    }

    /// Size-or-age batching over `element`.
    #[must_use]
    pub fn by_size_or_age(element: EventType, size: usize, age: Duration) -> Self {
        Self {
            element,
            config: SubscriberConfig {
                batching: BatchingStrategy::SizeOrAge,
                batch_age_ms: millis(age),
                batch_size: size,
                ..SubscriberConfig::default()
            },
            log: BatchLog::new(),
        }
    }

    /// Queue capacity, in batches.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = Some(size);
        self
    }

    /// The batches received so far.
    #[must_use]
    pub fn log(&self) -> &BatchLog {
        &self.log
    }
}

impl Subscriber for BatchRecordingSubscriber {
    fn entries(self: Arc<Self>) -> Vec<Entry> {
        let log = self.log.clone();
        vec![
            Entry::on_batch_of(self.element, move |batch| {
                log.push(batch.iter().cloned().collect());
                Ok(())
            })
            .named("batch")
            .with_config(self.config.clone()),
        ]
    }
}

fn millis(age: Duration) -> u64 {
    u64::try_from(age.as_millis()).unwrap_or(u64::MAX)
}

/// Stats sink that remembers the last value of every counter and how many
/// duration samples each metric produced.
#[derive(Debug, Default)]
pub struct RecordingStats {
    values: Mutex<HashMap<(Metric, String), u64>>,
    samples: Mutex<HashMap<Metric, u64>>,
}

impl RecordingStats {
    /// Create an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Last value reported for `metric` under `scope`.
    #[must_use]
    pub fn value(&self, metric: Metric, scope: &str) -> Option<u64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(metric, scope.to_owned()))
            .copied()
    }

    /// Highest value reported for `metric` under any scope.
    #[must_use]
    pub fn max_value(&self, metric: Metric) -> Option<u64> {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|((m, _), _)| *m == metric)
            .map(|(_, value)| *value)
            .max()
    }

    /// Number of duration samples recorded for `metric`.
    #[must_use]
    pub fn samples(&self, metric: Metric) -> u64 {
        self.samples
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&metric)
            .copied()
            .unwrap_or(0)
    }
}

impl StatsSink for RecordingStats {
    fn record_duration(&self, metric: Metric, _scope: &str, _elapsed: Duration) {
        let mut samples = self.samples.lock().unwrap_or_else(PoisonError::into_inner);
        let count = samples.entry(metric).or_insert(0);
        *count = count.saturating_add(1);
    }

    fn record_value(&self, metric: Metric, scope: &str, value: u64) {
        self.values
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((metric, scope.to_owned()), value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::OrderPlaced;

    #[test]
    fn test_event_log() {
        let log = EventLog::new();
        assert!(log.is_empty());
        log.push(Event::new(OrderPlaced::new(1)));
        log.push(Event::new(7u32));
        assert_eq!(log.len(), 2);
        assert_eq!(log.count_of::<OrderPlaced>(), 1);
        assert_eq!(log.payloads::<OrderPlaced>(), vec![OrderPlaced::new(1)]);
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn test_recording_subscriber_entries() {
        let recorder = Arc::new(
            RecordingSubscriber::new()
                .listen(EventType::of::<OrderPlaced>())
                .listen(EventType::of::<u32>())
                .sync(),
        );
        let entries = Arc::clone(&recorder).entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name(), Some("OrderPlaced"));
        assert!(entries.iter().all(|e| e.config().sync_if_allowed));
    }

    #[test]
    fn test_batch_subscriber_config() {
        let recorder = Arc::new(
            BatchRecordingSubscriber::by_size_or_age(
                EventType::of::<OrderPlaced>(),
                2,
                Duration::from_millis(500),
            )
            .queue_size(3),
        );
        let entries = Arc::clone(&recorder).entries();
        let config = entries[0].config();
        assert_eq!(config.batching, BatchingStrategy::SizeOrAge);
        assert_eq!(config.batch_size, 2);
        assert_eq!(config.batch_age_ms, 500);
        assert_eq!(config.queue_size, Some(3));
    }

    #[test]
    fn test_recording_stats() {
        let stats = RecordingStats::new();
        stats.record_value(Metric::EnqueueRejected, "a", 1);
        stats.record_value(Metric::EnqueueRejected, "a", 3);
        stats.record_value(Metric::EnqueueRejected, "b", 2);
        stats.record_duration(Metric::Publish, "x", Duration::from_micros(5));

        assert_eq!(stats.value(Metric::EnqueueRejected, "a"), Some(3));
        assert_eq!(stats.max_value(Metric::EnqueueRejected), Some(3));
        assert_eq!(stats.samples(Metric::Publish), 1);
        assert_eq!(stats.samples(Metric::Filter), 0);
    }
}
