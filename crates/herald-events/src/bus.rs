//! The event bus: registration, routing and publish.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::runtime::{Handle, TryCurrentError};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::catch_all::{CatchAllSink, CatchAllStats};
use crate::config::EventBusConfig;
use crate::consumer::{Consumer, ConsumerStats, DispatchContext};
use crate::error::RegistrationError;
use crate::event::{Event, EventType};
use crate::filter::{Filter, apply_all};
use crate::gate::SyncGate;
use crate::hierarchy::TypeHierarchy;
use crate::panic_message;
use crate::registry::ConsumerRegistry;
use crate::stats::{Metric, NoopStats, StatsSink, Timer};
use crate::subscriber::{
    ConsumerId, Entry, Subscriber, SubscriberClass, SubscriberConfig, SubscriberInfo,
};
use crate::validate::{ResolvedEntry, validate_entries};

/// Produces events for a conditional publish.
///
/// Called at most once per [`EventBus::publish_iff_not_dead`], and only when
/// at least one candidate type has a live consumer. Receives the candidate
/// types that do.
pub trait EventCreator {
    /// Build the events to publish.
    fn create_events(&mut self, live_types: &HashSet<EventType>) -> Vec<Event>;
}

impl<F> EventCreator for F
where
    F: FnMut(&HashSet<EventType>) -> Vec<Event>,
{
    fn create_events(&mut self, live_types: &HashSet<EventType>) -> Vec<Event> {
        self(live_types)
    }
}

/// Bus-level counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Failures swallowed by [`EventBus::publish_event`].
    pub publish_errors: u64,
    /// Failures swallowed by [`EventBus::publish_iff_not_dead`].
    pub conditional_publish_errors: u64,
    /// Live consumers.
    pub consumers: usize,
    /// Catch-all counters.
    pub catch_all: CatchAllStats,
}

/// Builder for [`EventBus`].
#[derive(Debug, Default)]
pub struct EventBusBuilder {
    config: EventBusConfig,
    stats: Option<Arc<dyn StatsSink>>,
    runtime: Option<Handle>,
}

impl EventBusBuilder {
    /// Use `config`.
    #[must_use]
    pub fn config(mut self, config: EventBusConfig) -> Self {
        self.config = config;
        self
    }

    /// Send stats samples to `stats` instead of discarding them.
    #[must_use]
    pub fn stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    /// Run workers and reap schedules on `runtime`.
    #[must_use]
    pub fn runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }

    /// Build the bus.
    ///
    /// # Panics
    ///
    /// Panics if no runtime was supplied and this is called outside a tokio
    /// runtime. Use [`try_build`](Self::try_build) to handle that case.
    #[must_use]
    pub fn build(self) -> EventBus {
        let runtime = self.runtime.clone().unwrap_or_else(Handle::current);
        self.build_on(runtime)
    }

    /// Build the bus, failing if no runtime is available.
    ///
    /// # Errors
    ///
    /// Returns [`TryCurrentError`] if no runtime was supplied and none is
    /// current.
    pub fn try_build(self) -> Result<EventBus, TryCurrentError> {
        let runtime = match self.runtime.clone() {
            Some(runtime) => runtime,
            None => Handle::try_current()?,
        };
        Ok(self.build_on(runtime))
    }

    fn build_on(self, runtime: Handle) -> EventBus {
        let config = self.config;
        let gate = Arc::new(SyncGate::new(config.allow_sync_subscribers));
        if let Some(allowlist) = config.sync_allowlist.clone() {
            gate.set_allowlist(allowlist);
        }
        let stats = self.stats.unwrap_or_else(|| Arc::new(NoopStats));
        let ctx = Arc::new(DispatchContext::new(
            gate,
            stats,
            config.max_queue_retries,
            runtime,
        ));

        debug!(
            default_queue_size = config.default_queue_size,
            max_queue_retries = config.max_queue_retries,
            allow_sync_subscribers = config.allow_sync_subscribers,
            "Event bus created"
        );

        EventBus {
            inner: Arc::new(BusInner {
                config,
                hierarchy: TypeHierarchy::new(),
                registry: ConsumerRegistry::new(),
                catch_all: CatchAllSink::new(),
                ctx,
                publish_errors: AtomicU64::new(0),
                conditional_publish_errors: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
        }
    }
}

/// In-process publish/subscribe bus.
///
/// Events are routed by runtime type: a consumer registered for `T` receives
/// every published event whose type is `T` or declares `T` as an ancestor in
/// the bus [`TypeHierarchy`]. Each consumer owns a bounded queue and a worker,
/// so a slow subscriber only delays itself. Publishing never blocks and
/// never fails.
///
/// Clones share the same bus. The bus shuts down when the last clone is
/// dropped or [`shutdown`](Self::shutdown) is called.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    config: EventBusConfig,
    hierarchy: TypeHierarchy,
    registry: ConsumerRegistry,
    catch_all: CatchAllSink,
    ctx: Arc<DispatchContext>,
    publish_errors: AtomicU64,
    conditional_publish_errors: AtomicU64,
    shut_down: AtomicBool,
}

impl EventBus {
    /// A bus with default configuration on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// A bus with `config` on the current runtime.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use]
    pub fn with_config(config: EventBusConfig) -> Self {
        Self::builder().config(config).build()
    }

    /// Start building a bus.
    #[must_use]
    pub fn builder() -> EventBusBuilder {
        EventBusBuilder::default()
    }

    /// Configuration the bus was built with.
    #[must_use]
    pub fn config(&self) -> &EventBusConfig {
        &self.inner.config
    }

    /// Declared type relationships used for routing.
    #[must_use]
    pub fn hierarchy(&self) -> &TypeHierarchy {
        &self.inner.hierarchy
    }

    /// Declare `P` an ancestor of `C`: consumers of `P` receive `C` events.
    pub fn declare<C: ?Sized + 'static, P: ?Sized + 'static>(&self) {
        self.inner.hierarchy.declare_of::<C, P>();
    }

    // ------------------------------------------------------------------
    // Publish
    // ------------------------------------------------------------------

    /// Publish `value`.
    pub fn publish<T: Any + Send + Sync>(&self, value: T) {
        self.publish_event(Event::new(value));
    }

    /// Publish an event envelope.
    ///
    /// Applies the filters attached to the event's exact type, then hands the
    /// event to every consumer of the type and of each of its ancestors, then
    /// to the catch-all sink. Failures are counted and logged, never
    /// returned.
    pub fn publish_event(&self, event: Event) {
        let inner = &*self.inner;
        if inner.is_shut_down() {
            trace!(event_type = %event.event_type(), "Bus shut down; publish ignored");
            return;
        }

        let scope = event.event_type().name();
        let _timer = Timer::start(&*inner.ctx.stats, Metric::Publish, scope);

        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| inner.dispatch(&event))) {
            let total = bump(&inner.publish_errors);
            inner
                .ctx
                .stats
                .record_value(Metric::PublishError, scope, total);
            error!(
                event_type = %event.event_type(),
                error = panic_message(panic.as_ref()),
                "Publish failed"
            );
        }
    }

    /// Publish only if someone is listening.
    ///
    /// Each candidate type is live when it or one of its ancestors has a
    /// consumer. With no live candidate `creator` is not called. Otherwise it
    /// receives the live candidates and each event it returns is filtered
    /// and handed to the consumers captured for the event's exact type. An
    /// event whose exact type is not one of the live candidates is dropped.
    /// The catch-all sink does not receive conditionally published events.
    pub fn publish_iff_not_dead<C>(&self, creator: &mut C, candidates: &[EventType])
    where
        C: EventCreator + ?Sized,
    {
        let inner = &*self.inner;
        if inner.is_shut_down() {
            trace!("Bus shut down; conditional publish ignored");
            return;
        }

        let _timer = Timer::start(
            &*inner.ctx.stats,
            Metric::ConditionalPublish,
            "conditional",
        );

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            inner.dispatch_conditional(creator, candidates);
        }));
        if let Err(panic) = outcome {
            let total = bump(&inner.conditional_publish_errors);
            inner
                .ctx
                .stats
                .record_value(Metric::ConditionalPublishError, "conditional", total);
            error!(
                candidates = candidates.len(),
                error = panic_message(panic.as_ref()),
                "Conditional publish failed"
            );
        }
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Register every entry of `subscriber`.
    ///
    /// Returns one [`SubscriberInfo`] per created consumer.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::InvalidSubscriber`] with every violation
    /// found when any entry is invalid; nothing is registered in that case.
    /// Also fails for subscribers without entries or a shut down bus.
    pub fn register<S: Subscriber>(
        &self,
        subscriber: Arc<S>,
    ) -> Result<Vec<SubscriberInfo>, RegistrationError> {
        self.register_with_filter(subscriber, None)
    }

    /// Register `subscriber`, attaching `filter` to each created consumer.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_with_filter<S: Subscriber>(
        &self,
        subscriber: Arc<S>,
        filter: Option<Filter>,
    ) -> Result<Vec<SubscriberInfo>, RegistrationError> {
        let inner = &*self.inner;
        if inner.is_shut_down() {
            return Err(RegistrationError::ShutDown);
        }

        let class = SubscriberClass::of::<S>();
        let dynamic = subscriber.dynamic_event_type();
        let entries = Arc::clone(&subscriber).entries();
        if entries.is_empty() {
            return Err(RegistrationError::NoEntries {
                subscriber: class.name().to_string(),
            });
        }

        let resolved: Vec<ResolvedEntry> = entries
            .into_iter()
            .enumerate()
            .map(|(index, entry)| ResolvedEntry {
                config: inner.effective_config(subscriber.as_ref(), class, &entry),
                label: entry.describe(index),
                entry,
            })
            .collect();

        if let Err(e) = validate_entries(class, dynamic, &resolved, &inner.hierarchy) {
            warn!(subscriber = %class, error = %e, "Subscriber rejected");
            return Err(e);
        }

        let instance: Arc<dyn Any + Send + Sync> = subscriber;
        let mut infos = Vec::with_capacity(resolved.len());

        for ResolvedEntry {
            entry,
            config,
            label,
        } in resolved
        {
            let target = entry.signature().only_param().and_then(|p| p.target());
            let Some(event_type) = dynamic.or(target) else {
                continue;
            };
            let capacity = config
                .queue_size
                .filter(|&size| size > 0)
                .unwrap_or(inner.config.default_queue_size);

            let info = SubscriberInfo {
                id: ConsumerId::new(),
                class,
                entry: label,
                event_type,
                config,
            };
            let consumer = Consumer::spawn(
                info.clone(),
                Arc::clone(&instance),
                entry.handler().clone(),
                entry.payload_type(),
                capacity,
                &inner.ctx,
            );
            if let Some(filter) = &filter {
                consumer.filters().add(Arc::clone(filter));
            }
            inner.registry.insert(&consumer);
            infos.push(info);
        }

        info!(
            subscriber = %class,
            consumers = infos.len(),
            dynamic = dynamic.is_some(),
            "Subscriber registered"
        );
        Ok(infos)
    }

    /// Unregister every instance of subscriber type `S`.
    ///
    /// Returns the distinct instances that were registered. Their consumers
    /// are shut down before this returns.
    pub fn unregister_class<S: Subscriber>(&self) -> Vec<Arc<S>> {
        let class = SubscriberClass::of::<S>();
        let removed = self.inner.registry.remove_class(class);
        if removed.is_empty() {
            debug!(subscriber = %class, "Subscriber not registered; nothing to unregister");
            return Vec::new();
        }

        let mut instances: Vec<Arc<S>> = Vec::new();
        for consumer in &removed {
            consumer.shutdown();
            let Ok(instance) = Arc::clone(consumer.instance()).downcast::<S>() else {
                continue;
            };
            if !instances.iter().any(|known| Arc::ptr_eq(known, &instance)) {
                instances.push(instance);
            }
        }

        info!(
            subscriber = %class,
            consumers = removed.len(),
            instances = instances.len(),
            "Subscriber unregistered"
        );
        instances
    }

    /// Unregister one subscriber instance, removing all of its consumers.
    ///
    /// Returns whether anything was removed.
    pub fn unregister_instance<S: Subscriber>(&self, subscriber: &Arc<S>) -> bool {
        let class = SubscriberClass::of::<S>();
        let target = Arc::as_ptr(subscriber);
        let removed = self.inner.registry.remove_matching(class, |consumer| {
            std::ptr::addr_eq(Arc::as_ptr(consumer.instance()), target)
        });
        if removed.is_empty() {
            debug!(subscriber = %class, "Instance not registered; nothing to unregister");
            return false;
        }

        for consumer in &removed {
            consumer.shutdown();
        }
        info!(
            subscriber = %class,
            consumers = removed.len(),
            "Subscriber instance unregistered"
        );
        true
    }

    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    /// Attach `filter` to events of exactly `event_type`, checked once per
    /// publish before routing.
    pub fn add_filter_for_event(&self, event_type: EventType, filter: Filter) {
        debug!(event_type = %event_type, filter = %filter.serialize(), "Event filter added");
        self.inner.registry.add_event_filter(event_type, filter);
    }

    /// Detach `filters` from `event_type`. Returns how many were removed.
    pub fn remove_filters_for_event(&self, event_type: EventType, filters: &[Filter]) -> usize {
        self.inner.registry.remove_event_filters(event_type, filters)
    }

    /// Detach every filter from `event_type`.
    pub fn clear_filters_for_event(&self, event_type: EventType) -> bool {
        self.inner.registry.clear_event_filters(event_type)
    }

    /// Filters attached to `event_type`.
    #[must_use]
    pub fn filters_for_event(&self, event_type: EventType) -> Vec<Filter> {
        self.inner
            .registry
            .event_filters(event_type)
            .map(|filters| filters.to_vec())
            .unwrap_or_default()
    }

    /// Attach `filter` to one consumer. Returns `false` if the consumer is
    /// not registered.
    pub fn add_filter_for_subscriber(&self, subscriber: &SubscriberInfo, filter: Filter) -> bool {
        match self.inner.registry.get(subscriber.id()) {
            Some(consumer) => {
                consumer.filters().add(filter);
                true
            },
            None => {
                debug!(consumer = %subscriber, "Consumer not registered; filter not added");
                false
            },
        }
    }

    /// Detach `filters` from one consumer. Returns how many were removed.
    pub fn remove_filters_for_subscriber(
        &self,
        subscriber: &SubscriberInfo,
        filters: &[Filter],
    ) -> usize {
        self.inner
            .registry
            .get(subscriber.id())
            .map_or(0, |consumer| consumer.filters().remove(filters))
    }

    /// Detach every filter from one consumer.
    pub fn clear_filters_for_subscriber(&self, subscriber: &SubscriberInfo) -> bool {
        let Some(consumer) = self.inner.registry.get(subscriber.id()) else {
            return false;
        };
        let had_filters = !consumer.filters().is_empty();
        consumer.filters().clear();
        had_filters
    }

    /// Filters attached to one consumer.
    #[must_use]
    pub fn filters_for_subscriber(&self, subscriber: &SubscriberInfo) -> Vec<Filter> {
        self.inner
            .registry
            .get(subscriber.id())
            .map(|consumer| consumer.filters().snapshot().to_vec())
            .unwrap_or_default()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Every live consumer.
    #[must_use]
    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.inner
            .registry
            .all()
            .iter()
            .map(|consumer| consumer.info().clone())
            .collect()
    }

    /// Consumers registered for exactly `event_type`.
    #[must_use]
    pub fn subscribers_for(&self, event_type: EventType) -> Vec<SubscriberInfo> {
        self.inner
            .registry
            .consumers_for(event_type)
            .map(|consumers| consumers.iter().map(|c| c.info().clone()).collect())
            .unwrap_or_default()
    }

    /// Types with at least one consumer or event filter.
    #[must_use]
    pub fn registered_event_types(&self) -> HashSet<EventType> {
        self.inner.registry.event_types()
    }

    /// Counters of one consumer, if it is still registered.
    #[must_use]
    pub fn consumer_stats(&self, subscriber: &SubscriberInfo) -> Option<ConsumerStats> {
        self.inner
            .registry
            .get(subscriber.id())
            .map(|consumer| consumer.stats())
    }

    /// Seal a batching consumer's current batch without waiting for its
    /// age.
    ///
    /// Returns `false` if the consumer is unknown or its batch could not be
    /// sealed because another reap was running or its sealed queue is full. Consumers
    /// without batching and empty batches report `true`.
    pub fn reap_now(&self, subscriber: &SubscriberInfo) -> bool {
        self.inner
            .registry
            .get(subscriber.id())
            .is_some_and(|consumer| consumer.reap_now())
    }

    /// Bus-level counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let inner = &*self.inner;
        BusStats {
            publish_errors: inner.publish_errors.load(Ordering::Relaxed),
            conditional_publish_errors: inner.conditional_publish_errors.load(Ordering::Relaxed),
            consumers: inner.registry.len(),
            catch_all: inner.catch_all.stats(),
        }
    }

    // ------------------------------------------------------------------
    // Catch-all
    // ------------------------------------------------------------------

    /// Forward every published event to `sink`. Returns `false` if a sink is
    /// already attached.
    pub fn enable_catch_all(&self, sink: mpsc::Sender<Event>) -> bool {
        self.inner.catch_all.enable(sink)
    }

    /// Create a channel of the configured catch-all capacity and attach its
    /// sender. Returns `None` if a sink is already attached.
    #[must_use]
    pub fn catch_all_channel(&self) -> Option<mpsc::Receiver<Event>> {
        let (sender, receiver) = mpsc::channel(self.inner.config.catch_all_queue_size.max(1));
        self.enable_catch_all(sender).then_some(receiver)
    }

    /// Detach the catch-all sink.
    pub fn disable_catch_all(&self) -> bool {
        self.inner.catch_all.disable()
    }

    /// Whether a catch-all sink is attached.
    #[must_use]
    pub fn is_catch_all_enabled(&self) -> bool {
        self.inner.catch_all.is_enabled()
    }

    // ------------------------------------------------------------------
    // Runtime settings
    // ------------------------------------------------------------------

    /// The sync gate. Changes apply to the next enqueue.
    #[must_use]
    pub fn sync_gate(&self) -> &SyncGate {
        &self.inner.ctx.gate
    }

    /// Set the eviction retry limit for full queues.
    pub fn set_max_queue_retries(&self, retries: usize) {
        let previous = self
            .inner
            .ctx
            .max_retries
            .swap(retries, Ordering::Relaxed);
        if previous != retries {
            info!(previous, retries, "Max queue retries changed");
        }
    }

    /// Current eviction retry limit.
    #[must_use]
    pub fn max_queue_retries(&self) -> usize {
        self.inner.ctx.max_retries.load(Ordering::Relaxed)
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Shut down every consumer, the catch-all sink and the reaper.
    ///
    /// Later publishes are ignored and later registrations fail.
    pub fn shutdown(&self) {
        self.inner.shutdown();
    }

    /// Whether [`shutdown`](Self::shutdown) has run.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("consumers", &self.inner.registry.len())
            .field("catch_all", &self.inner.catch_all.is_enabled())
            .field("shut_down", &self.inner.is_shut_down())
            .finish_non_exhaustive()
    }
}

impl BusInner {
    fn is_shut_down(&self) -> bool {
        self.shut_down.load(Ordering::Acquire)
    }

    fn passes_event_filters(&self, event: &Event) -> bool {
        let ty = event.event_type();
        self.registry
            .event_filters(ty)
            .is_none_or(|filters| apply_all(event, &filters, &*self.ctx.stats, ty.name()))
    }

    fn dispatch(&self, event: &Event) {
        let ty = event.event_type();
        if !self.passes_event_filters(event) {
            debug!(event_type = %ty, "Event rejected by event filters");
            return;
        }

        let mut delivered = 0usize;
        for target in self.hierarchy.resolve(ty).iter() {
            if let Some(consumers) = self.registry.consumers_for(*target) {
                for consumer in consumers.iter() {
                    consumer.enqueue(event);
                }
                delivered = delivered.saturating_add(consumers.len());
            }
        }
        trace!(event_type = %ty, consumers = delivered, "Event routed");

        self.catch_all.enqueue(event, &*self.ctx.stats);
    }

    fn dispatch_conditional<C>(&self, creator: &mut C, candidates: &[EventType])
    where
        C: EventCreator + ?Sized,
    {
        let mut live: HashMap<EventType, Vec<Arc<Consumer>>> = HashMap::new();
        for &candidate in candidates {
            let mut consumers = Vec::new();
            for target in self.hierarchy.resolve(candidate).iter() {
                if let Some(found) = self.registry.consumers_for(*target) {
                    consumers.extend(found.iter().cloned());
                }
            }
            if !consumers.is_empty() {
                live.insert(candidate, consumers);
            }
        }

        if live.is_empty() {
            trace!(candidates = candidates.len(), "No live candidate; creator skipped");
            return;
        }

        let live_types: HashSet<EventType> = live.keys().copied().collect();
        for event in creator.create_events(&live_types) {
            let ty = event.event_type();
            if !self.passes_event_filters(&event) {
                debug!(event_type = %ty, "Event rejected by event filters");
                continue;
            }
            match live.get(&ty) {
                Some(consumers) => {
                    for consumer in consumers {
                        consumer.enqueue(&event);
                    }
                },
                None => {
                    debug!(event_type = %ty, "Created event matches no live candidate; dropped");
                },
            }
        }
    }

    /// Configuration for `entry`: the subscriber's own override, then the
    /// bus override map, then what the entry declares. Unnamed entries always
    /// use their declared configuration.
    fn effective_config<S: Subscriber>(
        &self,
        subscriber: &S,
        class: SubscriberClass,
        entry: &Entry,
    ) -> SubscriberConfig {
        let Some(name) = entry.name() else {
            return entry.config().clone();
        };

        if let Some(config) = subscriber.config_for(name) {
            debug!(subscriber = %class, entry = name, "Using subscriber-provided config");
            return config;
        }
        if let Some(config) = self.config.subscriber_override(class.short_name(), name) {
            debug!(subscriber = %class, entry = name, "Using bus config override");
            return config.clone();
        }
        entry.config().clone()
    }

    fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::AcqRel) {
            return;
        }

        let consumers = self.registry.drain();
        for consumer in &consumers {
            consumer.shutdown();
        }
        self.catch_all.disable();
        self.ctx.reaper.shutdown();
        self.ctx.shutdown.cancel();

        info!(consumers = consumers.len(), "Event bus shut down");
    }
}

impl Drop for BusInner {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed).saturating_add(1)
}
