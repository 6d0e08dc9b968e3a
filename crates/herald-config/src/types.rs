//! Configuration types for the Herald event bus.
//!
//! Every struct implements [`Default`] with the production defaults so that
//! a bare `[section]` header in TOML yields a working configuration. The
//! types have no dependency on the bus crate; conversion into bus types
//! happens on the bus side.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Top-level Config
// ---------------------------------------------------------------------------

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Event bus behaviour.
    pub bus: BusSection,
    /// Log level, format and per-crate directives.
    pub logging: LoggingSection,
}

// ---------------------------------------------------------------------------
// BusSection
// ---------------------------------------------------------------------------

/// Event bus configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Queue capacity for subscriptions that do not set one.
    pub default_queue_size: usize,
    /// Oldest-entry evictions attempted before an event is dropped from a
    /// full queue.
    pub max_queue_retries: usize,
    /// Whether sync-preferring subscriptions may run on the publishing thread.
    pub allow_sync_subscribers: bool,
    /// Subscribers allowed to run synchronously, mapped to the event type
    /// names they may run synchronously for. An empty list means every type.
    pub sync_allowlist: HashMap<String, Vec<String>>,
    /// Per-subscription overrides keyed by `"Subscriber.entry"` or `"entry"`.
    pub subscribers: HashMap<String, SubscriberSection>,
    /// Capacity of catch-all channels created by the bus.
    pub catch_all_queue_size: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            default_queue_size: 1000,
            max_queue_retries: 5,
            allow_sync_subscribers: true,
            sync_allowlist: HashMap::new(),
            subscribers: HashMap::new(),
            catch_all_queue_size: 100,
        }
    }
}

/// How a subscription groups events before delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingMode {
    /// One event at a time.
    #[default]
    None,
    /// Everything accumulated during each batch age window.
    Age,
    /// Whichever comes first of the batch size and the batch age.
    SizeOrAge,
}

/// Delivery settings for one named subscription.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberSection {
    /// Batching mode.
    pub batching: BatchingMode,
    /// Batch age in milliseconds.
    pub batch_age_ms: u64,
    /// Batch size for `size_or_age`.
    pub batch_size: usize,
    /// Queue capacity. Unset uses `bus.default_queue_size`.
    pub queue_size: Option<usize>,
    /// Prefer running on the publishing thread when allowed.
    pub sync_if_allowed: bool,
}

impl Default for SubscriberSection {
    fn default() -> Self {
        Self {
            batching: BatchingMode::None,
            batch_age_ms: 0,
            batch_size: 1,
            queue_size: None,
            sync_if_allowed: false,
        }
    }
}

// ---------------------------------------------------------------------------
// LoggingSection
// ---------------------------------------------------------------------------

/// Logging and tracing configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global log level filter (`"trace"`, `"debug"`, `"info"`, `"warn"`,
    /// `"error"`).
    pub level: String,
    /// Output format: `"pretty"`, `"compact"`, `"json"` or `"full"`.
    pub format: String,
    /// Output stream: `"stdout"` or `"stderr"`.
    pub target: String,
    /// Per-crate tracing directives (e.g. `["herald_events=debug"]`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "compact".to_owned(),
            target: "stderr".to_owned(),
            directives: Vec::new(),
        }
    }
}
