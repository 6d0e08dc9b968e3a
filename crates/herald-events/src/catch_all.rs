//! Catch-all sink receiving every published event.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwapOption;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, info, warn};

use crate::event::Event;
use crate::stats::{Metric, StatsSink};

/// Default capacity for catch-all channels created through
/// [`EventBus::catch_all_channel`](crate::EventBus::catch_all_channel).
pub const DEFAULT_CATCH_ALL_QUEUE_SIZE: usize = 100;

/// Counters of the catch-all sink.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatchAllStats {
    /// Events handed to the sink.
    pub forwarded: u64,
    /// Events the sink could not accept.
    pub dropped: u64,
}

/// Forwards events to an externally owned bounded channel.
///
/// Disabled until a sink is attached. Offers never wait, are never retried
/// and never evict: a full sink loses the event.
#[derive(Debug)]
pub(crate) struct CatchAllSink {
    sink: ArcSwapOption<mpsc::Sender<Event>>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl CatchAllSink {
    pub(crate) fn new() -> Self {
        Self {
            sink: ArcSwapOption::empty(),
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Attach `sink` if none is attached. Returns whether it was attached.
    pub(crate) fn enable(&self, sink: mpsc::Sender<Event>) -> bool {
        let previous = self
            .sink
            .compare_and_swap(&None::<Arc<mpsc::Sender<Event>>>, Some(Arc::new(sink)));
        let enabled = previous.is_none();
        if enabled {
            info!("Catch-all sink enabled");
        } else {
            debug!("Catch-all sink already enabled; new sink ignored");
        }
        enabled
    }

    /// Detach the current sink. Returns whether one was attached.
    pub(crate) fn disable(&self) -> bool {
        let disabled = self.sink.swap(None).is_some();
        if disabled {
            info!("Catch-all sink disabled");
        }
        disabled
    }

    pub(crate) fn is_enabled(&self) -> bool {
        self.sink.load().is_some()
    }

    pub(crate) fn enqueue(&self, event: &Event, stats: &dyn StatsSink) {
        let guard = self.sink.load();
        let Some(sink) = guard.as_ref() else {
            return;
        };

        match sink.try_send(event.clone()) {
            Ok(()) => {
                self.forwarded.fetch_add(1, Ordering::Relaxed);
            },
            Err(TrySendError::Full(_)) => {
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed).saturating_add(1);
                stats.record_value(Metric::CatchAllDrop, "catch-all", dropped);
                debug!(
                    event_type = %event.event_type(),
                    dropped,
                    "Catch-all sink full; event dropped"
                );
            },
            Err(TrySendError::Closed(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Catch-all sink closed by its receiver; disabling");
                // Only detach the sink that failed, not a newer replacement.
                self.sink.compare_and_swap(&*guard, None);
            },
        }
    }

    pub(crate) fn stats(&self) -> CatchAllStats {
        CatchAllStats {
            forwarded: self.forwarded.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}
