//! Sealed batches and the filtered view handed to batch handlers.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::event::Event;
use crate::filter::{Filter, FilterSet, apply_all};
use crate::stats::StatsSink;

/// Events delivered together as one unit. Immutable once sealed.
pub(crate) struct Batch {
    events: Vec<Event>,
}

impl Batch {
    pub(crate) fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub(crate) fn single(event: Event) -> Self {
        Self {
            events: vec![event],
        }
    }

    pub(crate) fn events(&self) -> &[Event] {
        &self.events
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn into_events(self) -> Vec<Event> {
        self.events
    }
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch").field("len", &self.events.len()).finish()
    }
}

/// Read-through view of a delivered batch.
///
/// Iteration skips elements rejected by the consumer's filters as they stand
/// when [`iter`](Self::iter) is called; nothing is copied. A batch whose
/// elements are all rejected is still delivered and simply yields nothing.
#[derive(Clone, Copy)]
pub struct BatchView<'a> {
    events: &'a [Event],
    filters: &'a FilterSet,
    stats: &'a dyn StatsSink,
    scope: &'a str,
}

impl<'a> BatchView<'a> {
    pub(crate) fn new(
        batch: &'a Batch,
        filters: &'a FilterSet,
        stats: &'a dyn StatsSink,
        scope: &'a str,
    ) -> Self {
        Self {
            events: batch.events(),
            filters,
            stats,
            scope,
        }
    }

    /// Iterate over the events that pass the consumer's filters.
    #[must_use]
    pub fn iter(&self) -> BatchIter<'a> {
        BatchIter {
            inner: self.events.iter(),
            filters: self.filters.snapshot(),
            stats: self.stats,
            scope: self.scope,
        }
    }

    /// Iterate over accepted payloads whose exact type is `T`.
    pub fn typed<T: Any>(&self) -> impl Iterator<Item = &'a T> + use<'a, T> {
        self.iter().filter_map(Event::downcast_ref::<T>)
    }

    /// Number of events in the batch before filtering.
    #[must_use]
    pub fn raw_len(&self) -> usize {
        self.events.len()
    }
}

impl fmt::Debug for BatchView<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchView")
            .field("raw_len", &self.events.len())
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl<'a> IntoIterator for BatchView<'a> {
    type Item = &'a Event;
    type IntoIter = BatchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a> IntoIterator for &BatchView<'a> {
    type Item = &'a Event;
    type IntoIter = BatchIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator over the accepted events of a [`BatchView`].
pub struct BatchIter<'a> {
    inner: std::slice::Iter<'a, Event>,
    filters: Arc<Vec<Filter>>,
    stats: &'a dyn StatsSink,
    scope: &'a str,
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = &'a Event;

    fn next(&mut self) -> Option<Self::Item> {
        let filters = &self.filters;
        let stats = self.stats;
        let scope = self.scope;
        self.inner
            .by_ref()
            .find(|event| apply_all(event, filters, stats, scope))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, self.inner.size_hint().1)
    }
}

impl fmt::Debug for BatchIter<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchIter")
            .field("remaining", &self.inner.len())
            .finish_non_exhaustive()
    }
}
