//! Event filters and their evaluation.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use tracing::warn;

use crate::event::Event;
use crate::panic_message;
use crate::stats::{Metric, StatsSink};

/// An opaque predicate over events.
///
/// Filters can be attached to an event type (evaluated once at publish time)
/// or to a single consumer (evaluated before each delivery). The bus only
/// combines filters with AND semantics; richer expressions belong inside one
/// filter.
pub trait EventFilter: Send + Sync {
    /// Whether the event passes.
    fn apply(&self, event: &Event) -> bool;

    /// Name of the language the filter was written in.
    fn language(&self) -> &str;

    /// Source form of the filter, for display and diagnostics.
    fn serialize(&self) -> String;
}

/// Shared handle to a filter. Identity is the allocation, not the contents.
pub type Filter = Arc<dyn EventFilter>;

/// Whether two filter handles refer to the same filter instance.
#[must_use]
pub fn same_filter(a: &Filter, b: &Filter) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Filter backed by a closure.
pub struct FnFilter<F> {
    description: String,
    predicate: F,
}

impl<F> FnFilter<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    /// Wrap `predicate`; `description` is what [`EventFilter::serialize`] returns.
    pub fn new(description: impl Into<String>, predicate: F) -> Self {
        Self {
            description: description.into(),
            predicate,
        }
    }
}

impl<F> EventFilter for FnFilter<F>
where
    F: Fn(&Event) -> bool + Send + Sync,
{
    fn apply(&self, event: &Event) -> bool {
        (self.predicate)(event)
    }

    fn language(&self) -> &'static str {
        "Rust"
    }

    fn serialize(&self) -> String {
        self.description.clone()
    }
}

impl<F> fmt::Debug for FnFilter<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnFilter")
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Filter that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysTrueFilter;

impl EventFilter for AlwaysTrueFilter {
    fn apply(&self, _event: &Event) -> bool {
        true
    }

    fn language(&self) -> &'static str {
        "Constant"
    }

    fn serialize(&self) -> String {
        "true".to_string()
    }
}

/// Filter that rejects everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlwaysFalseFilter;

impl EventFilter for AlwaysFalseFilter {
    fn apply(&self, _event: &Event) -> bool {
        false
    }

    fn language(&self) -> &'static str {
        "Constant"
    }

    fn serialize(&self) -> String {
        "false".to_string()
    }
}

/// Evaluate `filters` against `event`.
///
/// Returns `true` for an empty set; otherwise `true` only if every filter
/// accepts, stopping at the first rejection. Each application is timed
/// under `scope`. A panicking filter counts as a rejection.
pub(crate) fn apply_all(
    event: &Event,
    filters: &[Filter],
    stats: &dyn StatsSink,
    scope: &str,
) -> bool {
    filters.iter().all(|filter| {
        let started = Instant::now();
        let outcome = catch_unwind(AssertUnwindSafe(|| filter.apply(event)));
        stats.record_duration(Metric::Filter, scope, started.elapsed());

        outcome.unwrap_or_else(|panic| {
            warn!(
                scope,
                filter = %filter.serialize(),
                error = panic_message(panic.as_ref()),
                "Filter panicked; treating event as rejected"
            );
            false
        })
    })
}

/// Copy-on-write set of filters.
///
/// Readers take a snapshot without locking; writers replace the whole list.
pub(crate) struct FilterSet {
    filters: ArcSwap<Vec<Filter>>,
}

impl FilterSet {
    pub(crate) fn new() -> Self {
        Self {
            filters: ArcSwap::from_pointee(Vec::new()),
        }
    }

    pub(crate) fn snapshot(&self) -> Arc<Vec<Filter>> {
        self.filters.load_full()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.filters.load().is_empty()
    }

    /// Add `filter` unless this exact instance is already present.
    pub(crate) fn add(&self, filter: Filter) {
        self.filters.rcu(|current| {
            let mut next = Vec::clone(current);
            if !next.iter().any(|f| same_filter(f, &filter)) {
                next.push(Arc::clone(&filter));
            }
            next
        });
    }

    /// Remove each listed instance. Returns how many were removed.
    pub(crate) fn remove(&self, filters: &[Filter]) -> usize {
        let mut removed = 0usize;
        self.filters.rcu(|current| {
            let next: Vec<Filter> = current
                .iter()
                .filter(|f| !filters.iter().any(|gone| same_filter(f, gone)))
                .cloned()
                .collect();
            removed = current.len().saturating_sub(next.len());
            next
        });
        removed
    }

    pub(crate) fn clear(&self) {
        self.filters.store(Arc::new(Vec::new()));
    }
}

impl fmt::Debug for FilterSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FilterSet")
            .field("len", &self.filters.load().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::stats::NoopStats;
    use crate::stats::testing::RecordingStats;

    fn counting(calls: &Arc<AtomicUsize>, verdict: bool) -> Filter {
        let calls = Arc::clone(calls);
        Arc::new(FnFilter::new("counting", move |_: &Event| {
            calls.fetch_add(1, Ordering::SeqCst);
            verdict
        }))
    }

    #[test]
    fn test_empty_set_accepts() {
        assert!(apply_all(&Event::new(1u8), &[], &NoopStats, "test"));
    }

    #[test]
    fn test_and_semantics_short_circuit() {
        let calls = Arc::new(AtomicUsize::new(0));
        let filters = vec![
            counting(&calls, true),
            counting(&calls, false),
            counting(&calls, true),
        ];
        assert!(!apply_all(&Event::new(1u8), &filters, &NoopStats, "test"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_each_application_is_timed() {
        let stats = RecordingStats::default();
        let filters: Vec<Filter> = vec![Arc::new(AlwaysTrueFilter), Arc::new(AlwaysTrueFilter)];
        assert!(apply_all(&Event::new(1u8), &filters, &stats, "test"));
        assert_eq!(stats.duration_count(Metric::Filter), 2);
    }

    #[test]
    fn test_panicking_filter_rejects() {
        let filters: Vec<Filter> = vec![Arc::new(FnFilter::new("boom", |_: &Event| -> bool {
            panic!("filter failure")
        }))];
        assert!(!apply_all(&Event::new(1u8), &filters, &NoopStats, "test"));
    }

    #[test]
    fn test_payload_predicate() {
        let filter = FnFilter::new("value > 3", |e: &Event| {
            e.downcast_ref::<u32>().is_some_and(|v| *v > 3)
        });
        assert!(filter.apply(&Event::new(5u32)));
        assert!(!filter.apply(&Event::new(2u32)));
        assert_eq!(filter.serialize(), "value > 3");
        assert_eq!(filter.language(), "Rust");
    }

    #[test]
    fn test_constant_filters() {
        assert!(AlwaysTrueFilter.apply(&Event::new(())));
        assert!(!AlwaysFalseFilter.apply(&Event::new(())));
        assert_eq!(AlwaysTrueFilter.language(), "Constant");
        assert_eq!(AlwaysFalseFilter.serialize(), "false");
    }

    #[test]
    fn test_filter_set_identity() {
        let set = FilterSet::new();
        let a: Filter = Arc::new(AlwaysTrueFilter);
        let b: Filter = Arc::new(AlwaysTrueFilter);

        set.add(Arc::clone(&a));
        set.add(Arc::clone(&a));
        set.add(Arc::clone(&b));
        assert_eq!(set.snapshot().len(), 2);

        assert_eq!(set.remove(&[Arc::clone(&a)]), 1);
        let left = set.snapshot();
        assert_eq!(left.len(), 1);
        assert!(same_filter(&left[0], &b));

        set.clear();
        assert!(set.is_empty());
    }

    #[test]
    fn test_snapshot_is_stable_across_updates() {
        let set = FilterSet::new();
        set.add(Arc::new(AlwaysFalseFilter));
        let before = set.snapshot();
        set.clear();
        assert_eq!(before.len(), 1);
        assert!(set.snapshot().is_empty());
    }
}
