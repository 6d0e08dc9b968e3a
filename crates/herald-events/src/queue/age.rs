//! Age and size-or-age batching.
//!
//! Events accumulate in a mutable current batch. A reap seals the current
//! batch into a bounded queue of sealed batches that the consumer worker
//! drains. When the sealed queue is full the reap fails, the current batch is
//! left as it is and an overflow flag is raised; while the flag is up every
//! offer must first succeed in reaping, so the current batch cannot grow
//! without bound behind a stalled consumer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tracing::trace;

use super::bounded::BoundedQueue;
use crate::batch::Batch;
use crate::event::Event;

pub(crate) struct AgeBatchingQueue {
    current: Mutex<Vec<Event>>,
    sealed: BoundedQueue<Batch>,
    sealed_full: AtomicBool,
    /// Held by the timer or an explicit reap. Offers never take it.
    reaping: AtomicBool,
    /// Seal as soon as the current batch holds this many events.
    batch_size: Option<usize>,
}

impl AgeBatchingQueue {
    /// Age-only batching; `sealed_capacity` bounds the number of sealed batches.
    pub(crate) fn age(sealed_capacity: usize) -> Self {
        Self::with_size_limit(sealed_capacity, None)
    }

    /// Size-or-age batching.
    pub(crate) fn size_or_age(sealed_capacity: usize, batch_size: usize) -> Self {
        Self::with_size_limit(sealed_capacity, Some(batch_size.max(1)))
    }

    fn with_size_limit(sealed_capacity: usize, batch_size: Option<usize>) -> Self {
        Self {
            current: Mutex::new(Vec::new()),
            sealed: BoundedQueue::new(sealed_capacity),
            sealed_full: AtomicBool::new(false),
            reaping: AtomicBool::new(false),
            batch_size,
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Vec<Event>> {
        self.current.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add `event` to the current batch.
    ///
    /// Fails, handing the event back, only when a required reap fails: the
    /// overflow flag is up, or a size-limited batch is already full and could
    /// not be sealed.
    pub(crate) fn offer(&self, event: Event) -> Result<(), Event> {
        let mut current = self.lock_current();

        if self.sealed_full.load(Ordering::Acquire) && !self.reap_locked(&mut current) {
            return Err(event);
        }

        if let Some(limit) = self.batch_size {
            if current.len() >= limit && !self.reap_locked(&mut current) {
                return Err(event);
            }
        }

        current.push(event);

        if let Some(limit) = self.batch_size {
            if current.len() >= limit {
                // A failed seal leaves the flag up; the next offer retries it.
                self.reap_locked(&mut current);
            }
        }

        Ok(())
    }

    /// Seal the current batch unless another reap is already running.
    ///
    /// Returns `true` when the current batch is empty afterwards. A reap in
    /// progress elsewhere skips this one and reports `false`. An in-flight
    /// append only delays the reap for the length of one push.
    pub(crate) fn reap(&self) -> bool {
        let Some(_reaping) = ReapGuard::try_acquire(&self.reaping) else {
            trace!("Batch reap skipped, another reap in progress");
            return false;
        };
        let mut current = self.lock_current();
        self.reap_locked(&mut current)
    }

    fn reap_locked(&self, current: &mut Vec<Event>) -> bool {
        if current.is_empty() {
            return true;
        }

        let batch = Batch::new(std::mem::take(current));
        match self.sealed.offer(batch) {
            Ok(()) => {
                self.sealed_full.store(false, Ordering::Release);
                true
            },
            Err(rejected) => {
                *current = rejected.into_events();
                self.sealed_full.store(true, Ordering::Release);
                false
            },
        }
    }

    pub(crate) fn try_take(&self) -> Option<Batch> {
        self.sealed.try_take()
    }

    pub(crate) async fn take(&self) -> Batch {
        self.sealed.take().await
    }

    /// Number of sealed batches waiting for the worker.
    pub(crate) fn sealed_len(&self) -> usize {
        self.sealed.len()
    }

    pub(crate) fn sealed_capacity(&self) -> usize {
        self.sealed.capacity()
    }

    pub(crate) fn current_len(&self) -> usize {
        self.lock_current().len()
    }

    pub(crate) fn is_overflowing(&self) -> bool {
        self.sealed_full.load(Ordering::Acquire)
    }

    pub(crate) fn clear(&self) {
        self.lock_current().clear();
        self.sealed.clear();
        self.sealed_full.store(false, Ordering::Release);
    }
}

/// Exclusive claim on the reap slot, released on drop.
struct ReapGuard<'a>(&'a AtomicBool);

impl<'a> ReapGuard<'a> {
    fn try_acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for ReapGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
