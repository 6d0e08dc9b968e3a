//! Declared type relationships and memoized ancestor resolution.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use tracing::{debug, trace};

use crate::event::EventType;

/// Registry of parent relationships between event types.
///
/// Rust has no runtime inheritance, so "supertypes" and "interfaces" are
/// declared explicitly: `declare(child, parent)` states that every event of
/// type `child` is also of interest to consumers of `parent`. Resolution is
/// a breadth-first walk over these declarations, memoized per type.
#[derive(Debug, Default)]
pub struct TypeHierarchy {
    parents: RwLock<HashMap<EventType, Vec<EventType>>>,
    resolved: DashMap<EventType, Arc<[EventType]>>,
}

impl TypeHierarchy {
    /// Create an empty hierarchy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare `parent` as a direct ancestor of `child`.
    ///
    /// Declaring the root type or a self-relationship is ignored, as is a
    /// relationship that already exists. Memoized resolutions are discarded
    /// so later lookups see the new relationship.
    pub fn declare(&self, child: EventType, parent: EventType) {
        if parent.is_root() || child == parent {
            return;
        }

        let mut parents = self.parents.write().unwrap_or_else(PoisonError::into_inner);
        let direct = parents.entry(child).or_default();
        if direct.contains(&parent) {
            return;
        }
        direct.push(parent);
        // Cleared while the write lock is held so no resolution computed
        // against the old relationships can be cached afterwards.
        self.resolved.clear();

        debug!(child = %child, parent = %parent, "Declared event type relationship");
    }

    /// Declare `P` as a direct ancestor of `C`.
    pub fn declare_of<C: ?Sized + 'static, P: ?Sized + 'static>(&self) {
        self.declare(EventType::of::<C>(), EventType::of::<P>());
    }

    /// Direct ancestors declared for `ty`.
    #[must_use]
    pub fn parents_of(&self, ty: EventType) -> Vec<EventType> {
        self.parents
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&ty)
            .cloned()
            .unwrap_or_default()
    }

    /// `ty` followed by all of its ancestors in breadth-first order, without
    /// duplicates and without the root type.
    #[must_use]
    pub fn resolve(&self, ty: EventType) -> Arc<[EventType]> {
        if let Some(hit) = self.resolved.get(&ty) {
            return Arc::clone(hit.value());
        }

        let parents = self.parents.read().unwrap_or_else(PoisonError::into_inner);
        let mut seen = HashSet::new();
        let mut order = Vec::new();
        let mut pending = VecDeque::from([ty]);

        while let Some(next) = pending.pop_front() {
            if next.is_root() || !seen.insert(next) {
                continue;
            }
            order.push(next);
            if let Some(direct) = parents.get(&next) {
                pending.extend(direct.iter().copied());
            }
        }

        let resolved: Arc<[EventType]> = order.into();
        self.resolved.insert(ty, Arc::clone(&resolved));
        drop(parents);

        trace!(event_type = %ty, count = resolved.len(), "Resolved event type ancestors");
        resolved
    }

    /// Whether an event of type `from` is deliverable to a consumer of `to`.
    #[must_use]
    pub fn is_assignable(&self, from: EventType, to: EventType) -> bool {
        to.is_root() || self.resolve(from).contains(&to)
    }

    /// Number of memoized resolutions.
    #[must_use]
    pub fn cached_len(&self) -> usize {
        self.resolved.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Base;
    struct Middle;
    struct Leaf;
    trait Tagged {}
    trait Audited {}

    fn hierarchy() -> TypeHierarchy {
        let h = TypeHierarchy::new();
        h.declare_of::<Middle, Base>();
        h.declare_of::<Leaf, Middle>();
        h.declare_of::<Leaf, dyn Tagged>();
        h.declare_of::<Middle, dyn Audited>();
        h.declare_of::<dyn Tagged, dyn Audited>();
        h
    }

    #[test]
    fn test_resolve_includes_self_first() {
        let h = TypeHierarchy::new();
        let resolved = h.resolve(EventType::of::<Leaf>());
        assert_eq!(&*resolved, &[EventType::of::<Leaf>()]);
    }

    #[test]
    fn test_resolve_breadth_first_without_duplicates() {
        let h = hierarchy();
        let resolved = h.resolve(EventType::of::<Leaf>());
        assert_eq!(
            &*resolved,
            &[
                EventType::of::<Leaf>(),
                EventType::of::<Middle>(),
                EventType::of::<dyn Tagged>(),
                EventType::of::<Base>(),
                EventType::of::<dyn Audited>(),
            ]
        );
    }

    #[test]
    fn test_root_is_never_resolved() {
        let h = TypeHierarchy::new();
        h.declare(EventType::of::<Leaf>(), EventType::root());
        assert!(h.parents_of(EventType::of::<Leaf>()).is_empty());
        assert!(!h.resolve(EventType::of::<Leaf>()).contains(&EventType::root()));
    }

    #[test]
    fn test_declare_invalidates_cache() {
        let h = TypeHierarchy::new();
        assert_eq!(h.resolve(EventType::of::<Leaf>()).len(), 1);
        assert_eq!(h.cached_len(), 1);

        h.declare_of::<Leaf, Base>();
        assert_eq!(h.cached_len(), 0);
        assert!(h.resolve(EventType::of::<Leaf>()).contains(&EventType::of::<Base>()));
    }

    #[test]
    fn test_duplicate_and_self_declarations_ignored() {
        let h = TypeHierarchy::new();
        h.declare_of::<Leaf, Base>();
        h.declare_of::<Leaf, Base>();
        h.declare_of::<Leaf, Leaf>();
        assert_eq!(h.parents_of(EventType::of::<Leaf>()), vec![EventType::of::<Base>()]);
    }

    #[test]
    fn test_is_assignable() {
        let h = hierarchy();
        let leaf = EventType::of::<Leaf>();
        assert!(h.is_assignable(leaf, EventType::of::<Base>()));
        assert!(h.is_assignable(leaf, EventType::of::<dyn Audited>()));
        assert!(h.is_assignable(leaf, EventType::root()));
        assert!(!h.is_assignable(EventType::of::<Base>(), leaf));
    }

    #[test]
    fn test_cycles_terminate() {
        let h = TypeHierarchy::new();
        h.declare_of::<Base, Leaf>();
        h.declare_of::<Leaf, Base>();
        assert_eq!(h.resolve(EventType::of::<Leaf>()).len(), 2);
    }
}
