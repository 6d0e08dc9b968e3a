//! Pluggable stats hooks.
//!
//! Every timed operation on the dispatch path reports a duration sample and
//! every counter reports its updated value to a [`StatsSink`]. The bus
//! defaults to [`NoopStats`]; [`TracingStats`] forwards samples to `tracing`
//! at trace level.

use std::fmt;
use std::time::{Duration, Instant};

use tracing::trace;

/// Measured operations and counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    /// Duration of a `publish` call.
    Publish,
    /// Duration of a conditional publish call.
    ConditionalPublish,
    /// Duration of a single filter application.
    Filter,
    /// Duration of handing an event to a consumer queue.
    Enqueue,
    /// Duration of one handler invocation including per-consumer filtering.
    Consumption,
    /// Total retries after a full consumer queue.
    QueueRetry,
    /// Total events dropped because a consumer queue stayed full.
    EnqueueRejected,
    /// Pending deliveries in a consumer queue.
    QueueSize,
    /// Total failures swallowed by `publish`.
    PublishError,
    /// Total failures swallowed by conditional publish.
    ConditionalPublishError,
    /// Total events the catch-all sink could not accept.
    CatchAllDrop,
}

impl Metric {
    /// Stable metric name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Publish => "publish",
            Self::ConditionalPublish => "conditional_publish",
            Self::Filter => "filter",
            Self::Enqueue => "enqueue",
            Self::Consumption => "consumption",
            Self::QueueRetry => "queue_retry",
            Self::EnqueueRejected => "enqueue_rejected",
            Self::QueueSize => "queue_size",
            Self::PublishError => "publish_error",
            Self::ConditionalPublishError => "conditional_publish_error",
            Self::CatchAllDrop => "catch_all_drop",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receiver of stats samples.
///
/// `scope` names the component the sample belongs to: an event type for
/// publish-side metrics, a consumer description for consumer metrics.
/// Implementations are called on the publish path and must not block.
pub trait StatsSink: Send + Sync + fmt::Debug {
    /// Record how long an operation took.
    fn record_duration(&self, metric: Metric, scope: &str, elapsed: Duration);

    /// Record the current value of a counter or gauge.
    fn record_value(&self, metric: Metric, scope: &str, value: u64);
}

/// Sink that discards every sample.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStats;

impl StatsSink for NoopStats {
    fn record_duration(&self, _metric: Metric, _scope: &str, _elapsed: Duration) {}

    fn record_value(&self, _metric: Metric, _scope: &str, _value: u64) {}
}

/// Sink that emits each sample as a `trace!` event.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStats;

impl StatsSink for TracingStats {
    fn record_duration(&self, metric: Metric, scope: &str, elapsed: Duration) {
        trace!(
            metric = metric.as_str(),
            scope,
            elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX),
            "stats duration"
        );
    }

    fn record_value(&self, metric: Metric, scope: &str, value: u64) {
        trace!(metric = metric.as_str(), scope, value, "stats value");
    }
}

/// Records the elapsed time of its own lifetime on drop.
pub(crate) struct Timer<'a> {
    sink: &'a dyn StatsSink,
    metric: Metric,
    scope: &'a str,
    started: Instant,
}

impl<'a> Timer<'a> {
    pub(crate) fn start(sink: &'a dyn StatsSink, metric: Metric, scope: &'a str) -> Self {
        Self {
            sink,
            metric,
            scope,
            started: Instant::now(),
        }
    }
}

impl Drop for Timer<'_> {
    fn drop(&mut self) {
        self.sink
            .record_duration(self.metric, self.scope, self.started.elapsed());
    }
}
