//! Synchronous-dispatch gate.
//!
//! Synchronous delivery bypasses a consumer's queue and runs its handler on
//! the publishing thread. A subscription only gets it when it asks for it,
//! the bus-wide switch allows it, and the allow-list (if any) names the
//! subscriber for the event type. The gate is consulted on every enqueue, so
//! changes apply to the next event.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arc_swap::ArcSwapOption;
use tracing::info;

use crate::error::AllowlistError;
use crate::event::EventType;
use crate::subscriber::SubscriberClass;

/// Wildcard matching every event type.
pub const ALLOW_ALL_EVENTS: &str = "*";

/// Subscribers allowed to run synchronously, and for which event types.
///
/// Subscriber and event names match either the fully qualified type name or
/// the bare type name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncAllowlist {
    entries: HashMap<String, HashSet<String>>,
}

impl SyncAllowlist {
    /// An empty allow-list.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow `subscriber` to run synchronously for `event_type`.
    #[must_use]
    pub fn allow(mut self, subscriber: impl Into<String>, event_type: impl Into<String>) -> Self {
        self.entries
            .entry(subscriber.into())
            .or_default()
            .insert(event_type.into());
        self
    }

    /// Allow `subscriber` to run synchronously for every event type.
    #[must_use]
    pub fn allow_all(self, subscriber: impl Into<String>) -> Self {
        self.allow(subscriber, ALLOW_ALL_EVENTS)
    }

    /// Parse `{"Subscriber": ["EventType", ...]}`. An empty list allows
    /// every event type.
    ///
    /// # Errors
    ///
    /// Returns [`AllowlistError::Json`] if `json` is not an object of string
    /// arrays.
    pub fn from_json(json: &str) -> Result<Self, AllowlistError> {
        let raw: HashMap<String, Vec<String>> = serde_json::from_str(json)?;
        Ok(Self::from(raw))
    }

    /// Whether no subscriber is listed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of listed subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    fn allowed_events(&self, subscriber: SubscriberClass) -> Option<&HashSet<String>> {
        self.entries
            .get(subscriber.name())
            .or_else(|| self.entries.get(subscriber.short_name()))
    }

    /// Whether `subscriber` may run synchronously for `event_type`.
    #[must_use]
    pub fn permits(&self, subscriber: SubscriberClass, event_type: EventType) -> bool {
        self.allowed_events(subscriber).is_some_and(|events| {
            events.contains(ALLOW_ALL_EVENTS)
                || events.contains(event_type.name())
                || events.contains(event_type.short_name())
        })
    }
}

impl From<HashMap<String, Vec<String>>> for SyncAllowlist {
    fn from(raw: HashMap<String, Vec<String>>) -> Self {
        let entries = raw
            .into_iter()
            .map(|(subscriber, events)| {
                let events: HashSet<String> = if events.is_empty() {
                    HashSet::from([ALLOW_ALL_EVENTS.to_string()])
                } else {
                    events.into_iter().collect()
                };
                (subscriber, events)
            })
            .collect();
        Self { entries }
    }
}

/// Bus-owned state deciding synchronous delivery.
#[derive(Debug)]
pub struct SyncGate {
    allow_sync: AtomicBool,
    allowlist: ArcSwapOption<SyncAllowlist>,
}

impl Default for SyncGate {
    fn default() -> Self {
        Self::new(true)
    }
}

impl SyncGate {
    /// A gate with the given switch position and no allow-list.
    #[must_use]
    pub fn new(allow_sync: bool) -> Self {
        Self {
            allow_sync: AtomicBool::new(allow_sync),
            allowlist: ArcSwapOption::empty(),
        }
    }

    /// Whether sync-preferring subscribers may run synchronously at all.
    #[must_use]
    pub fn allow_sync_subscribers(&self) -> bool {
        self.allow_sync.load(Ordering::Acquire)
    }

    /// Flip the bus-wide switch.
    pub fn set_allow_sync_subscribers(&self, allow: bool) {
        let previous = self.allow_sync.swap(allow, Ordering::AcqRel);
        if previous != allow {
            info!(allow, "Synchronous subscribers switch changed");
        }
    }

    /// Current allow-list, if one is configured.
    #[must_use]
    pub fn allowlist(&self) -> Option<Arc<SyncAllowlist>> {
        self.allowlist.load_full()
    }

    /// Replace the allow-list. An empty list counts as no list.
    pub fn set_allowlist(&self, allowlist: SyncAllowlist) {
        info!(subscribers = allowlist.len(), "Sync allow-list updated");
        self.allowlist.store(Some(Arc::new(allowlist)));
    }

    /// Replace the allow-list from its JSON form.
    ///
    /// # Errors
    ///
    /// Returns [`AllowlistError`] for malformed JSON; the current list is kept.
    pub fn set_allowlist_json(&self, json: &str) -> Result<(), AllowlistError> {
        let allowlist = SyncAllowlist::from_json(json)?;
        self.set_allowlist(allowlist);
        Ok(())
    }

    /// Remove the allow-list.
    pub fn clear_allowlist(&self) {
        if self.allowlist.swap(None).is_some() {
            info!("Sync allow-list cleared");
        }
    }

    /// Whether a subscription preferring sync (`prefers_sync`) owned by
    /// `subscriber` runs synchronously for an event of `event_type`.
    #[must_use]
    pub fn is_sync(
        &self,
        prefers_sync: bool,
        subscriber: SubscriberClass,
        event_type: EventType,
    ) -> bool {
        if !prefers_sync || !self.allow_sync_subscribers() {
            return false;
        }
        match self.allowlist.load().as_deref() {
            Some(list) if !list.is_empty() => list.permits(subscriber, event_type),
            _ => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Auditor;
    struct Mailer;
    struct OrderPlaced;
    struct OrderShipped;

    fn auditor() -> SubscriberClass {
        SubscriberClass::of::<Auditor>()
    }

    #[test]
    fn test_requires_preference() {
        let gate = SyncGate::new(true);
        assert!(!gate.is_sync(false, auditor(), EventType::of::<OrderPlaced>()));
        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));
    }

    #[test]
    fn test_switch_read_on_every_check() {
        let gate = SyncGate::new(true);
        let ty = EventType::of::<OrderPlaced>();
        assert!(gate.is_sync(true, auditor(), ty));
        gate.set_allow_sync_subscribers(false);
        assert!(!gate.is_sync(true, auditor(), ty));
        gate.set_allow_sync_subscribers(true);
        assert!(gate.is_sync(true, auditor(), ty));
    }

    #[test]
    fn test_allowlist_restricts_by_event_type() {
        let gate = SyncGate::new(true);
        gate.set_allowlist(SyncAllowlist::new().allow("Auditor", "OrderPlaced"));

        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));
        assert!(!gate.is_sync(true, auditor(), EventType::of::<OrderShipped>()));
        assert!(!gate.is_sync(
            true,
            SubscriberClass::of::<Mailer>(),
            EventType::of::<OrderPlaced>()
        ));
    }

    #[test]
    fn test_allowlist_wildcard() {
        let gate = SyncGate::new(true);
        gate.set_allowlist(SyncAllowlist::new().allow_all(auditor().name()));
        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderShipped>()));
    }

    #[test]
    fn test_allowlist_json_empty_array_is_wildcard() {
        let gate = SyncGate::new(true);
        gate.set_allowlist_json(r#"{"Auditor": [], "Mailer": ["OrderShipped"]}"#)
            .unwrap();

        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));
        let mailer = SubscriberClass::of::<Mailer>();
        assert!(gate.is_sync(true, mailer, EventType::of::<OrderShipped>()));
        assert!(!gate.is_sync(true, mailer, EventType::of::<OrderPlaced>()));
    }

    #[test]
    fn test_malformed_json_keeps_previous_list() {
        let gate = SyncGate::new(true);
        gate.set_allowlist(SyncAllowlist::new().allow("Auditor", "OrderPlaced"));
        assert!(gate.set_allowlist_json("[1, 2").is_err());
        assert_eq!(gate.allowlist().map(|l| l.len()), Some(1));
    }

    #[test]
    fn test_empty_or_cleared_allowlist_allows_everyone() {
        let gate = SyncGate::new(true);
        gate.set_allowlist(SyncAllowlist::new());
        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));

        gate.set_allowlist(SyncAllowlist::new().allow("Mailer", "*"));
        assert!(!gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));
        gate.clear_allowlist();
        assert!(gate.allowlist().is_none());
        assert!(gate.is_sync(true, auditor(), EventType::of::<OrderPlaced>()));
    }
}
