//! Subscriber contract and registration entries.
//!
//! A subscriber describes what it wants to receive by returning a list of
//! [`Entry`] values from [`Subscriber::entries`]. Each entry becomes one
//! consumer with its own queue and worker once registered.

use std::any::{Any, TypeId, type_name};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::trace;
use uuid::Uuid;

use crate::batch::BatchView;
use crate::error::HandlerResult;
use crate::event::{Event, EventType, short_type_name};

/// Something that can be registered with the bus.
pub trait Subscriber: Any + Send + Sync {
    /// The handlers this subscriber contributes.
    ///
    /// Handlers usually capture a clone of `self` to reach subscriber state.
    fn entries(self: Arc<Self>) -> Vec<Entry>;

    /// Target type for dynamic subscribers.
    ///
    /// A dynamic subscriber decides its target at registration time instead
    /// of through its parameter type. Its parameter must then either be the
    /// root type (see [`Entry::on_any`]) or a type the target is assignable to.
    fn dynamic_event_type(&self) -> Option<EventType> {
        None
    }

    /// Configuration override for the entry named `name`.
    ///
    /// Consulted at registration for named entries; a returned config replaces
    /// every setting declared on the entry.
    fn config_for(&self, _name: &str) -> Option<SubscriberConfig> {
        None
    }
}

/// Identity of a subscriber type.
#[derive(Clone, Copy)]
pub struct SubscriberClass {
    id: TypeId,
    name: &'static str,
}

impl SubscriberClass {
    /// Class of `S`.
    #[must_use]
    pub fn of<S: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<S>(),
            name: type_name::<S>(),
        }
    }

    /// Fully qualified type name.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Type name without its module path.
    #[must_use]
    pub fn short_name(&self) -> &'static str {
        short_type_name(self.name)
    }
}

impl PartialEq for SubscriberClass {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriberClass {}

impl Hash for SubscriberClass {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for SubscriberClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("SubscriberClass").field(&self.name).finish()
    }
}

impl fmt::Display for SubscriberClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short_name())
    }
}

/// How a consumer groups events before delivery.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchingStrategy {
    /// Deliver events one at a time.
    #[default]
    None,
    /// Deliver everything accumulated during each batch age window.
    Age,
    /// Deliver when the batch reaches its size or its age, whichever first.
    SizeOrAge,
}

impl fmt::Display for BatchingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Age => "age",
            Self::SizeOrAge => "size_or_age",
        })
    }
}

/// Delivery settings of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SubscriberConfig {
    /// Batching strategy.
    pub batching: BatchingStrategy,
    /// Batch age in milliseconds (age-based strategies).
    pub batch_age_ms: u64,
    /// Batch size (size-or-age only).
    pub batch_size: usize,
    /// Queue capacity; in batches for batching strategies. `None` uses the
    /// bus default.
    pub queue_size: Option<usize>,
    /// Prefer inline delivery on the publishing thread when the bus allows it.
    pub sync_if_allowed: bool,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            batching: BatchingStrategy::None,
            batch_age_ms: 0,
            batch_size: 1,
            queue_size: None,
            sync_if_allowed: false,
        }
    }
}

impl SubscriberConfig {
    /// Batch age as a duration.
    #[must_use]
    pub fn batch_age(&self) -> Duration {
        Duration::from_millis(self.batch_age_ms)
    }
}

/// Parameter descriptor of a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Param {
    /// A single event of this type.
    Event(EventType),
    /// A batch of events; the element type may be unknown.
    Iterable(Option<EventType>),
}

impl Param {
    /// Type events must be assignable to, if known.
    #[must_use]
    pub fn target(&self) -> Option<EventType> {
        match self {
            Self::Event(ty) => Some(*ty),
            Self::Iterable(element) => *element,
        }
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Event(ty) => write!(f, "{ty}"),
            Self::Iterable(Some(ty)) => write!(f, "batch of {ty}"),
            Self::Iterable(None) => f.write_str("batch of ?"),
        }
    }
}

/// Parameter list of a handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    params: Vec<Param>,
}

impl Signature {
    /// A signature with the given parameters.
    #[must_use]
    pub fn new(params: Vec<Param>) -> Self {
        Self { params }
    }

    /// A one-parameter signature.
    #[must_use]
    pub fn single(param: Param) -> Self {
        Self {
            params: vec![param],
        }
    }

    /// Declared parameters.
    #[must_use]
    pub fn params(&self) -> &[Param] {
        &self.params
    }

    /// The parameter of a one-parameter signature.
    #[must_use]
    pub fn only_param(&self) -> Option<Param> {
        match self.params.as_slice() {
            [param] => Some(*param),
            _ => None,
        }
    }
}

/// Single-event handler.
pub type EventHandler = Arc<dyn Fn(&Event) -> HandlerResult + Send + Sync>;

/// Batch handler.
pub type BatchHandler = Arc<dyn Fn(BatchView<'_>) -> HandlerResult + Send + Sync>;

/// Callable part of an entry.
#[derive(Clone)]
pub enum Handler {
    /// Receives events one at a time.
    Single(EventHandler),
    /// Receives batches.
    Batch(BatchHandler),
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Single(_) => f.write_str("Handler::Single"),
            Self::Batch(_) => f.write_str("Handler::Batch"),
        }
    }
}

/// One handler of a subscriber, with its parameter and delivery settings.
#[derive(Debug, Clone)]
pub struct Entry {
    name: Option<String>,
    signature: Signature,
    handler: Handler,
    config: SubscriberConfig,
    payload: Option<EventType>,
}

impl Entry {
    /// Handle single events whose payload is a `T`.
    ///
    /// Only payloads of exactly `T` reach `handler`. Events of descendant
    /// types routed to this entry through the type hierarchy are skipped and
    /// show up in the consumer's `skipped` count; use [`Entry::on_event`] to
    /// receive them as envelopes.
    pub fn on<T, F>(handler: F) -> Self
    where
        T: Any + Send + Sync,
        F: Fn(&T) -> HandlerResult + Send + Sync + 'static,
    {
        let handler: EventHandler = Arc::new(move |event: &Event| {
            if let Some(value) = event.downcast_ref::<T>() {
                handler(value)
            } else {
                trace!(
                    expected = type_name::<T>(),
                    actual = event.event_type().name(),
                    "Typed handler skipped descendant event"
                );
                Ok(())
            }
        });
        let mut entry = Self::from_parts(
            Signature::single(Param::Event(EventType::of::<T>())),
            Handler::Single(handler),
        );
        entry.payload = Some(EventType::of::<T>());
        entry
    }

    /// Handle single events of `event_type` and its descendants as envelopes.
    pub fn on_event<F>(event_type: EventType, handler: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_parts(
            Signature::single(Param::Event(event_type)),
            Handler::Single(Arc::new(handler)),
        )
    }

    /// Handle events of any type. Only valid for dynamic subscribers.
    pub fn on_any<F>(handler: F) -> Self
    where
        F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
    {
        Self::on_event(EventType::root(), handler)
    }

    /// Handle batches of `T`. Requires a batching strategy.
    pub fn on_batch<T, F>(handler: F) -> Self
    where
        T: ?Sized + 'static,
        F: Fn(BatchView<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::on_batch_of(EventType::of::<T>(), handler)
    }

    /// Handle batches of `element` and its descendants. Requires a batching
    /// strategy.
    pub fn on_batch_of<F>(element: EventType, handler: F) -> Self
    where
        F: Fn(BatchView<'_>) -> HandlerResult + Send + Sync + 'static,
    {
        Self::from_parts(
            Signature::single(Param::Iterable(Some(element))),
            Handler::Batch(Arc::new(handler)),
        )
    }

    /// Assemble an entry from a signature and handler produced elsewhere.
    #[must_use]
    pub fn from_parts(signature: Signature, handler: Handler) -> Self {
        Self {
            name: None,
            signature,
            handler,
            config: SubscriberConfig::default(),
            payload: None,
        }
    }

    /// Name the entry, enabling configuration overrides keyed by name.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the batching strategy.
    #[must_use]
    pub fn batching(mut self, strategy: BatchingStrategy) -> Self {
        self.config.batching = strategy;
        self
    }

    /// Set the batch age.
    #[must_use]
    pub fn batch_age(mut self, age: Duration) -> Self {
        self.config.batch_age_ms = u64::try_from(age.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the batch size.
    #[must_use]
    pub fn batch_size(mut self, size: usize) -> Self {
        self.config.batch_size = size;
        self
    }

    /// Set the queue capacity.
    #[must_use]
    pub fn queue_size(mut self, size: usize) -> Self {
        self.config.queue_size = Some(size);
        self
    }

    /// Prefer synchronous delivery when allowed.
    #[must_use]
    pub fn sync_if_allowed(mut self, sync: bool) -> Self {
        self.config.sync_if_allowed = sync;
        self
    }

    /// Replace every delivery setting.
    #[must_use]
    pub fn with_config(mut self, config: SubscriberConfig) -> Self {
        self.config = config;
        self
    }

    /// Entry name.
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Parameter list.
    #[must_use]
    pub fn signature(&self) -> &Signature {
        &self.signature
    }

    /// Declared delivery settings.
    #[must_use]
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// The handler.
    #[must_use]
    pub fn handler(&self) -> &Handler {
        &self.handler
    }

    /// The only payload type the handler accepts, for typed entries.
    ///
    /// Events of other types routed to the entry are skipped, not delivered.
    #[must_use]
    pub fn payload_type(&self) -> Option<EventType> {
        self.payload
    }

    /// Human-readable label used in logs and errors.
    pub(crate) fn describe(&self, index: usize) -> String {
        let params = self
            .signature
            .params()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        match &self.name {
            Some(name) => format!("entry `{name}` ({params})"),
            None => format!("entry #{index} ({params})"),
        }
    }
}

/// Unique identifier of a live consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub(crate) fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Description of a registered consumer.
#[derive(Debug, Clone)]
pub struct SubscriberInfo {
    pub(crate) id: ConsumerId,
    pub(crate) class: SubscriberClass,
    pub(crate) entry: String,
    pub(crate) event_type: EventType,
    pub(crate) config: SubscriberConfig,
}

impl SubscriberInfo {
    /// Consumer identifier.
    #[must_use]
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    /// Type of the subscriber that contributed the entry.
    #[must_use]
    pub fn class(&self) -> SubscriberClass {
        self.class
    }

    /// Entry label.
    #[must_use]
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Type the consumer is indexed under.
    #[must_use]
    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    /// Effective delivery settings after overrides.
    #[must_use]
    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }
}

impl PartialEq for SubscriberInfo {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for SubscriberInfo {}

impl Hash for SubscriberInfo {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for SubscriberInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}::{} <- {}", self.class, self.entry, self.event_type)
    }
}
