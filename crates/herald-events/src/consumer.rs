//! Consumers: one handler bound to one queue and one worker.

use std::any::Any;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, AtomicUsize, Ordering};

use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::batch::{Batch, BatchView};
use crate::event::{Event, EventType};
use crate::filter::{FilterSet, apply_all};
use crate::gate::SyncGate;
use crate::panic_message;
use crate::queue::{BatchingQueue, Delivery};
use crate::reaper::BatchReaper;
use crate::stats::{Metric, StatsSink, Timer};
use crate::subscriber::{BatchingStrategy, Handler, SubscriberInfo};

/// Default number of eviction retries when a consumer queue is full.
pub const DEFAULT_MAX_QUEUE_RETRIES: usize = 5;

/// State shared by the bus and every consumer it creates.
#[derive(Debug)]
pub(crate) struct DispatchContext {
    pub(crate) gate: Arc<SyncGate>,
    pub(crate) stats: Arc<dyn StatsSink>,
    pub(crate) max_retries: AtomicUsize,
    pub(crate) runtime: Handle,
    pub(crate) reaper: BatchReaper,
    /// Parent of every consumer's worker token.
    pub(crate) shutdown: CancellationToken,
}

impl DispatchContext {
    pub(crate) fn new(
        gate: Arc<SyncGate>,
        stats: Arc<dyn StatsSink>,
        max_retries: usize,
        runtime: Handle,
    ) -> Self {
        Self {
            gate,
            stats,
            max_retries: AtomicUsize::new(max_retries),
            reaper: BatchReaper::new(runtime.clone()),
            runtime,
            shutdown: CancellationToken::new(),
        }
    }
}

/// Point-in-time counters of one consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    /// Deliveries waiting for the worker (sealed batches for batching consumers).
    pub queue_len: usize,
    /// Queue capacity.
    pub queue_capacity: usize,
    /// Events accumulated in the current, unsealed batch.
    pub buffered: usize,
    /// Whether the queue is currently refusing new events.
    pub overflowing: bool,
    /// Evictions performed to make room for new events.
    pub retries: u64,
    /// Events dropped because the queue stayed full.
    pub rejections: u64,
    /// Successful handler invocations.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub handler_failures: u64,
    /// Single events rejected by the consumer's filters.
    pub filtered: u64,
    /// Events routed to a typed handler whose payload is not the handler's
    /// type.
    pub skipped: u64,
}

#[derive(Debug, Default)]
struct Counters {
    retries: AtomicU64,
    rejections: AtomicU64,
    delivered: AtomicU64,
    handler_failures: AtomicU64,
    filtered: AtomicU64,
    skipped: AtomicU64,
}

fn bump(counter: &AtomicU64) -> u64 {
    counter.fetch_add(1, Ordering::Relaxed).saturating_add(1)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum State {
    Running = 0,
    ShuttingDown = 1,
    Stopped = 2,
}

impl State {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::ShuttingDown,
            _ => Self::Stopped,
        }
    }
}

/// Live binding of one entry: handler, filters, queue and worker.
///
/// Lifecycle is `Running → ShuttingDown → Stopped`. Once
/// [`shutdown`](Self::shutdown) returns no new handler invocation starts.
pub(crate) struct Consumer {
    info: SubscriberInfo,
    scope: String,
    instance: Arc<dyn Any + Send + Sync>,
    handler: Handler,
    payload: Option<EventType>,
    queue: Arc<BatchingQueue>,
    filters: FilterSet,
    ctx: Arc<DispatchContext>,
    state: AtomicU8,
    cancel: CancellationToken,
    reap_schedule: Option<CancellationToken>,
    counters: Counters,
}

impl Consumer {
    /// Create the consumer and start its worker (and reap schedule, when
    /// batching).
    pub(crate) fn spawn(
        info: SubscriberInfo,
        instance: Arc<dyn Any + Send + Sync>,
        handler: Handler,
        payload: Option<EventType>,
        queue_capacity: usize,
        ctx: &Arc<DispatchContext>,
    ) -> Arc<Self> {
        let config = info.config.clone();
        let queue = Arc::new(BatchingQueue::new(
            config.batching,
            queue_capacity,
            config.batch_size,
        ));
        let scope = info.to_string();

        let reap_schedule = (config.batching != BatchingStrategy::None).then(|| {
            ctx.reaper
                .schedule(Arc::downgrade(&queue), config.batch_age(), scope.clone())
        });

        let consumer = Arc::new(Self {
            info,
            scope,
            instance,
            handler,
            payload,
            queue,
            filters: FilterSet::new(),
            ctx: Arc::clone(ctx),
            state: AtomicU8::new(State::Running as u8),
            cancel: ctx.shutdown.child_token(),
            reap_schedule,
            counters: Counters::default(),
        });

        ctx.runtime.spawn(Arc::clone(&consumer).run());
        debug!(
            consumer = %consumer.scope,
            batching = %config.batching,
            queue_capacity,
            "Consumer started"
        );
        consumer
    }

    pub(crate) fn info(&self) -> &SubscriberInfo {
        &self.info
    }

    pub(crate) fn instance(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.instance
    }

    pub(crate) fn filters(&self) -> &FilterSet {
        &self.filters
    }

    fn state(&self) -> State {
        State::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.state() == State::Running
    }

    /// Hand `event` to this consumer.
    ///
    /// Runs the handler inline when the sync gate allows it. Otherwise offers
    /// the event to the queue without waiting; a full queue evicts its oldest
    /// delivery and retries, up to the bus retry limit, before dropping the
    /// event.
    pub(crate) fn enqueue(&self, event: &Event) {
        if !self.is_running() {
            trace!(consumer = %self.scope, "Consumer not running; event ignored");
            return;
        }

        let stats = &*self.ctx.stats;
        let _timer = Timer::start(stats, Metric::Enqueue, &self.scope);
        let prefers_sync = self.info.config.sync_if_allowed;
        if self
            .ctx
            .gate
            .is_sync(prefers_sync, self.info.class, event.event_type())
        {
            trace!(consumer = %self.scope, "Dispatching synchronously");
            self.process(Delivery::Single(event.clone()));
            return;
        }

        let max_retries = self.ctx.max_retries.load(Ordering::Relaxed);
        let mut pending = event.clone();
        let mut retries = 0usize;

        loop {
            match self.queue.offer(pending) {
                Ok(()) => {
                    if retries > 0 {
                        debug!(consumer = %self.scope, retries, "Event accepted after evictions");
                    }
                    break;
                },
                Err(rejected) => {
                    if retries >= max_retries {
                        let total = bump(&self.counters.rejections);
                        stats.record_value(Metric::EnqueueRejected, &self.scope, total);
                        warn!(
                            consumer = %self.scope,
                            event_type = %rejected.event_type(),
                            retries,
                            "Consumer queue full; event rejected"
                        );
                        break;
                    }
                    retries = retries.saturating_add(1);
                    let total = bump(&self.counters.retries);
                    stats.record_value(Metric::QueueRetry, &self.scope, total);
                    if self.queue.try_take().is_some() {
                        trace!(consumer = %self.scope, "Evicted oldest delivery");
                    }
                    pending = rejected;
                },
            }
        }

        stats.record_value(
            Metric::QueueSize,
            &self.scope,
            u64::try_from(self.queue.len()).unwrap_or(u64::MAX),
        );
    }

    /// Deliver one unit of work to the handler.
    fn process(&self, delivery: Delivery) {
        if !self.is_running() {
            return;
        }

        let stats = &*self.ctx.stats;
        let _timer = Timer::start(stats, Metric::Consumption, &self.scope);

        match (&self.handler, delivery) {
            (Handler::Single(handler), Delivery::Single(event)) => {
                self.deliver_single(handler.as_ref(), &event);
            },
            (Handler::Single(handler), Delivery::Batch(batch)) => {
                for event in batch.events() {
                    self.deliver_single(handler.as_ref(), event);
                }
            },
            (Handler::Batch(handler), Delivery::Batch(batch)) => {
                self.deliver_batch(handler.as_ref(), &batch);
            },
            (Handler::Batch(handler), Delivery::Single(event)) => {
                self.deliver_batch(handler.as_ref(), &Batch::single(event));
            },
        }
    }

    fn deliver_single(
        &self,
        handler: &(dyn Fn(&Event) -> crate::HandlerResult + Send + Sync),
        event: &Event,
    ) {
        if self
            .payload
            .is_some_and(|payload| payload != event.event_type())
        {
            bump(&self.counters.skipped);
            trace!(
                consumer = %self.scope,
                event_type = %event.event_type(),
                "Typed handler skipped event of another type"
            );
            return;
        }
        let filters = self.filters.snapshot();
        if !apply_all(event, &filters, &*self.ctx.stats, &self.scope) {
            bump(&self.counters.filtered);
            trace!(consumer = %self.scope, "Event rejected by consumer filters");
            return;
        }
        self.invoke(|| handler(event));
    }

    fn deliver_batch(
        &self,
        handler: &(dyn Fn(BatchView<'_>) -> crate::HandlerResult + Send + Sync),
        batch: &Batch,
    ) {
        let view = BatchView::new(batch, &self.filters, &*self.ctx.stats, &self.scope);
        self.invoke(|| handler(view));
    }

    fn invoke(&self, call: impl FnOnce() -> crate::HandlerResult) {
        match catch_unwind(AssertUnwindSafe(call)) {
            Ok(Ok(())) => {
                bump(&self.counters.delivered);
            },
            Ok(Err(e)) => {
                bump(&self.counters.handler_failures);
                warn!(consumer = %self.scope, error = %e, "Subscriber handler failed");
            },
            Err(panic) => {
                bump(&self.counters.handler_failures);
                warn!(
                    consumer = %self.scope,
                    error = panic_message(panic.as_ref()),
                    "Subscriber handler panicked"
                );
            },
        }
    }

    async fn run(self: Arc<Self>) {
        trace!(consumer = %self.scope, "Consumer worker running");

        loop {
            let delivery = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                delivery = self.queue.take() => delivery,
            };

            let consumer = Arc::clone(&self);
            let job = tokio::task::spawn_blocking(move || consumer.process(delivery));

            tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                outcome = job => {
                    if let Err(e) = outcome {
                        warn!(consumer = %self.scope, error = %e, "Consumer job aborted");
                    }
                },
            }
        }

        trace!(consumer = %self.scope, "Consumer worker exited");
    }

    /// Seal the current batch now. Returns `false` if the sealed queue is full
    /// or another reap is in progress.
    pub(crate) fn reap_now(&self) -> bool {
        self.queue.reap()
    }

    /// Stop the worker, drop queued events and detach filters.
    ///
    /// Fire-and-forget: an invocation already running completes, nothing
    /// queued is delivered.
    pub(crate) fn shutdown(&self) {
        if self
            .state
            .compare_exchange(
                State::Running as u8,
                State::ShuttingDown as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        self.cancel.cancel();
        if let Some(schedule) = &self.reap_schedule {
            schedule.cancel();
        }
        self.queue.clear();
        self.filters.clear();
        self.state.store(State::Stopped as u8, Ordering::Release);

        info!(consumer = %self.scope, "Consumer shut down");
    }

    pub(crate) fn stats(&self) -> ConsumerStats {
        let counters = &self.counters;
        ConsumerStats {
            queue_len: self.queue.len(),
            queue_capacity: self.queue.capacity(),
            buffered: self.queue.buffered(),
            overflowing: self.queue.is_overflowing(),
            retries: counters.retries.load(Ordering::Relaxed),
            rejections: counters.rejections.load(Ordering::Relaxed),
            delivered: counters.delivered.load(Ordering::Relaxed),
            handler_failures: counters.handler_failures.load(Ordering::Relaxed),
            filtered: counters.filtered.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Debug for Consumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Consumer")
            .field("info", &self.info)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}
