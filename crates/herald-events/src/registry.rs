//! Concurrent indexes of live consumers and event-level filters.

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;

use crate::consumer::Consumer;
use crate::event::EventType;
use crate::filter::{Filter, FilterSet};
use crate::subscriber::{ConsumerId, SubscriberClass};

/// Consumers indexed by target type, by subscriber class and by id, plus
/// filters indexed by event type.
///
/// The per-type consumer lists are immutable snapshots replaced on every
/// change, so publishers clone an `Arc` and iterate without holding a lock.
#[derive(Default)]
pub(crate) struct ConsumerRegistry {
    by_type: DashMap<EventType, Arc<[Arc<Consumer>]>>,
    by_class: DashMap<SubscriberClass, Vec<Arc<Consumer>>>,
    by_id: DashMap<ConsumerId, Arc<Consumer>>,
    event_filters: DashMap<EventType, FilterSet>,
}

impl ConsumerRegistry {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&self, consumer: &Arc<Consumer>) {
        let info = consumer.info();
        self.by_type
            .entry(info.event_type)
            .and_modify(|current| {
                let mut next = current.to_vec();
                next.push(Arc::clone(consumer));
                *current = next.into();
            })
            .or_insert_with(|| Arc::from(vec![Arc::clone(consumer)]));
        self.by_class
            .entry(info.class)
            .or_default()
            .push(Arc::clone(consumer));
        self.by_id.insert(info.id, Arc::clone(consumer));
    }

    /// Snapshot of the consumers indexed under exactly `ty`.
    pub(crate) fn consumers_for(&self, ty: EventType) -> Option<Arc<[Arc<Consumer>]>> {
        self.by_type.get(&ty).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn get(&self, id: ConsumerId) -> Option<Arc<Consumer>> {
        self.by_id.get(&id).map(|entry| Arc::clone(entry.value()))
    }

    pub(crate) fn all(&self) -> Vec<Arc<Consumer>> {
        self.by_id
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Remove every consumer of `class` from all indexes.
    pub(crate) fn remove_class(&self, class: SubscriberClass) -> Vec<Arc<Consumer>> {
        let removed = self
            .by_class
            .remove(&class)
            .map(|(_, consumers)| consumers)
            .unwrap_or_default();
        self.detach(&removed);
        removed
    }

    /// Remove the consumers of `class` matching `predicate` from all indexes.
    pub(crate) fn remove_matching(
        &self,
        class: SubscriberClass,
        predicate: impl Fn(&Consumer) -> bool,
    ) -> Vec<Arc<Consumer>> {
        let removed = {
            let Some(mut consumers) = self.by_class.get_mut(&class) else {
                return Vec::new();
            };
            let (removed, kept): (Vec<_>, Vec<_>) =
                consumers.drain(..).partition(|c| predicate(c.as_ref()));
            *consumers = kept;
            removed
        };
        self.by_class.remove_if(&class, |_, consumers| consumers.is_empty());
        self.detach(&removed);
        removed
    }

    /// Remove every consumer from all indexes. Event filters are kept.
    pub(crate) fn drain(&self) -> Vec<Arc<Consumer>> {
        let removed = self.all();
        self.by_type.clear();
        self.by_class.clear();
        self.by_id.clear();
        removed
    }

    fn detach(&self, consumers: &[Arc<Consumer>]) {
        for consumer in consumers {
            let info = consumer.info();
            self.by_id.remove(&info.id);

            if let Some(mut current) = self.by_type.get_mut(&info.event_type) {
                let next: Vec<_> = current
                    .iter()
                    .filter(|c| !Arc::ptr_eq(c, consumer))
                    .cloned()
                    .collect();
                *current = next.into();
            }
            self.by_type
                .remove_if(&info.event_type, |_, current| current.is_empty());
        }
    }

    /// Types with at least one consumer or at least one event filter.
    pub(crate) fn event_types(&self) -> HashSet<EventType> {
        self.by_type
            .iter()
            .map(|entry| *entry.key())
            .chain(self.event_filters.iter().map(|entry| *entry.key()))
            .collect()
    }

    pub(crate) fn event_filters(&self, ty: EventType) -> Option<Arc<Vec<Filter>>> {
        self.event_filters.get(&ty).map(|set| set.snapshot())
    }

    pub(crate) fn add_event_filter(&self, ty: EventType, filter: Filter) {
        self.event_filters
            .entry(ty)
            .or_insert_with(FilterSet::new)
            .add(filter);
    }

    pub(crate) fn remove_event_filters(&self, ty: EventType, filters: &[Filter]) -> usize {
        let removed = self
            .event_filters
            .get(&ty)
            .map_or(0, |set| set.remove(filters));
        self.event_filters.remove_if(&ty, |_, set| set.is_empty());
        removed
    }

    pub(crate) fn clear_event_filters(&self, ty: EventType) -> bool {
        self.event_filters.remove(&ty).is_some()
    }
}
