//! Bus-level configuration.

use std::collections::HashMap;

use crate::catch_all::DEFAULT_CATCH_ALL_QUEUE_SIZE;
use crate::consumer::DEFAULT_MAX_QUEUE_RETRIES;
use crate::gate::SyncAllowlist;
use crate::subscriber::SubscriberConfig;

/// Default capacity of a consumer queue whose entry does not set one.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;

/// Settings an [`EventBus`](crate::EventBus) is built with.
///
/// The retry limit and the sync gate stay adjustable at runtime through the
/// bus; everything else is read once per registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventBusConfig {
    /// Queue capacity for entries that do not declare one.
    pub default_queue_size: usize,
    /// Evictions attempted before an event is dropped from a full queue.
    pub max_queue_retries: usize,
    /// Initial position of the sync switch.
    pub allow_sync_subscribers: bool,
    /// Initial sync allow-list.
    pub sync_allowlist: Option<SyncAllowlist>,
    /// Per-entry overrides keyed by `Subscriber.entry` or by entry name.
    pub subscribers: HashMap<String, SubscriberConfig>,
    /// Capacity of channels made by
    /// [`EventBus::catch_all_channel`](crate::EventBus::catch_all_channel).
    pub catch_all_queue_size: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            default_queue_size: DEFAULT_QUEUE_SIZE,
            max_queue_retries: DEFAULT_MAX_QUEUE_RETRIES,
            allow_sync_subscribers: true,
            sync_allowlist: None,
            subscribers: HashMap::new(),
            catch_all_queue_size: DEFAULT_CATCH_ALL_QUEUE_SIZE,
        }
    }
}

impl EventBusConfig {
    /// Set the default queue capacity. Zero keeps the built-in default.
    #[must_use]
    pub fn with_default_queue_size(mut self, size: usize) -> Self {
        self.default_queue_size = if size == 0 { DEFAULT_QUEUE_SIZE } else { size };
        self
    }

    /// Set the retry limit for full queues.
    #[must_use]
    pub fn with_max_queue_retries(mut self, retries: usize) -> Self {
        self.max_queue_retries = retries;
        self
    }

    /// Set the initial sync switch.
    #[must_use]
    pub fn with_allow_sync_subscribers(mut self, allow: bool) -> Self {
        self.allow_sync_subscribers = allow;
        self
    }

    /// Set the initial sync allow-list.
    #[must_use]
    pub fn with_sync_allowlist(mut self, allowlist: SyncAllowlist) -> Self {
        self.sync_allowlist = Some(allowlist);
        self
    }

    /// Override the configuration of entries matching `key`.
    #[must_use]
    pub fn with_subscriber(mut self, key: impl Into<String>, config: SubscriberConfig) -> Self {
        self.subscribers.insert(key.into(), config);
        self
    }

    /// Override lookup for a named entry of `class_short_name`.
    ///
    /// `Class.entry` wins over a bare `entry` key.
    pub(crate) fn subscriber_override(
        &self,
        class_short_name: &str,
        entry: &str,
    ) -> Option<&SubscriberConfig> {
        self.subscribers
            .get(&format!("{class_short_name}.{entry}"))
            .or_else(|| self.subscribers.get(entry))
    }
}

#[cfg(feature = "config")]
mod bridge {
    use herald_config::{BatchingMode, BusSection, Config, SubscriberSection};

    use super::EventBusConfig;
    use crate::gate::SyncAllowlist;
    use crate::subscriber::{BatchingStrategy, SubscriberConfig};

    impl From<BatchingMode> for BatchingStrategy {
        fn from(mode: BatchingMode) -> Self {
            match mode {
                BatchingMode::None => Self::None,
                BatchingMode::Age => Self::Age,
                BatchingMode::SizeOrAge => Self::SizeOrAge,
            }
        }
    }

    impl From<&SubscriberSection> for SubscriberConfig {
        fn from(section: &SubscriberSection) -> Self {
            Self {
                batching: section.batching.into(),
                batch_age_ms: section.batch_age_ms,
                batch_size: section.batch_size,
                queue_size: section.queue_size,
                sync_if_allowed: section.sync_if_allowed,
            }
        }
    }

    impl From<&BusSection> for EventBusConfig {
        fn from(section: &BusSection) -> Self {
            let sync_allowlist = (!section.sync_allowlist.is_empty())
                .then(|| SyncAllowlist::from(section.sync_allowlist.clone()));
            Self {
                default_queue_size: section.default_queue_size,
                max_queue_retries: section.max_queue_retries,
                allow_sync_subscribers: section.allow_sync_subscribers,
                sync_allowlist,
                subscribers: section
                    .subscribers
                    .iter()
                    .map(|(key, sub)| (key.clone(), SubscriberConfig::from(sub)))
                    .collect(),
                catch_all_queue_size: section.catch_all_queue_size,
            }
        }
    }

    impl From<&Config> for EventBusConfig {
        fn from(config: &Config) -> Self {
            Self::from(&config.bus)
        }
    }
}
