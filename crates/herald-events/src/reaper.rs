//! Shared scheduler that periodically seals batches.

use std::sync::Weak;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::queue::BatchingQueue;

/// Drives one cheap reap task per batching consumer on the runtime's timer.
///
/// Tasks hold only a weak reference to their queue and stop on their own
/// once the queue is gone, when their token is cancelled, or when the
/// reaper shuts down.
#[derive(Debug)]
pub(crate) struct BatchReaper {
    runtime: Handle,
    shutdown: CancellationToken,
}

impl BatchReaper {
    pub(crate) fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            shutdown: CancellationToken::new(),
        }
    }

    /// Reap `queue` every `period`, starting one period from now.
    ///
    /// Cancel the returned token to stop this schedule.
    pub(crate) fn schedule(
        &self,
        queue: Weak<BatchingQueue>,
        period: Duration,
        scope: String,
    ) -> CancellationToken {
        let token = self.shutdown.child_token();
        if self.is_shut_down() {
            trace!(consumer = %scope, "Reaper shut down; batch schedule not started");
            return token;
        }
        let stop = token.clone();
        let period = period.max(Duration::from_millis(1));

        self.runtime.spawn(async move {
            let start = Instant::now()
                .checked_add(period)
                .unwrap_or_else(Instant::now);
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => {},
                }

                let Some(queue) = queue.upgrade() else {
                    break;
                };
                if !queue.reap() {
                    trace!(consumer = %scope, "Batch reap deferred");
                }
            }

            debug!(consumer = %scope, "Batch reaper stopped");
        });

        token
    }

    pub(crate) fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub(crate) fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }
}
