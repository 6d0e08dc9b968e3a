//! Consumer-side buffering, selected by batching strategy.

mod age;
mod bounded;

pub(crate) use age::AgeBatchingQueue;
pub(crate) use bounded::BoundedQueue;

use crate::batch::Batch;
use crate::event::Event;
use crate::subscriber::BatchingStrategy;

/// One unit of work for a consumer worker.
#[derive(Debug)]
pub(crate) enum Delivery {
    Single(Event),
    Batch(Batch),
}

/// The buffer between publishers and a consumer's worker.
pub(crate) enum BatchingQueue {
    /// No batching: events pass through one at a time.
    Direct(BoundedQueue<Event>),
    /// Age or size-or-age batching.
    Batched(AgeBatchingQueue),
}

impl BatchingQueue {
    /// Build the queue for a strategy. For batching strategies `capacity`
    /// counts sealed batches, not events.
    pub(crate) fn new(strategy: BatchingStrategy, capacity: usize, batch_size: usize) -> Self {
        match strategy {
            BatchingStrategy::None => Self::Direct(BoundedQueue::new(capacity)),
            BatchingStrategy::Age => Self::Batched(AgeBatchingQueue::age(capacity)),
            BatchingStrategy::SizeOrAge => {
                Self::Batched(AgeBatchingQueue::size_or_age(capacity, batch_size))
            },
        }
    }

    /// Non-blocking offer; the event is handed back when it cannot be accepted.
    pub(crate) fn offer(&self, event: Event) -> Result<(), Event> {
        match self {
            Self::Direct(queue) => queue.offer(event),
            Self::Batched(queue) => queue.offer(event),
        }
    }

    /// Non-blocking take, used both by tests and to evict the oldest
    /// delivery when the queue is full.
    pub(crate) fn try_take(&self) -> Option<Delivery> {
        match self {
            Self::Direct(queue) => queue.try_take().map(Delivery::Single),
            Self::Batched(queue) => queue.try_take().map(Delivery::Batch),
        }
    }

    pub(crate) async fn take(&self) -> Delivery {
        match self {
            Self::Direct(queue) => Delivery::Single(queue.take().await),
            Self::Batched(queue) => Delivery::Batch(queue.take().await),
        }
    }

    /// Seal the current batch. A no-op that succeeds for direct queues.
    pub(crate) fn reap(&self) -> bool {
        match self {
            Self::Direct(_) => true,
            Self::Batched(queue) => queue.reap(),
        }
    }

    /// Deliveries waiting for the worker.
    pub(crate) fn len(&self) -> usize {
        match self {
            Self::Direct(queue) => queue.len(),
            Self::Batched(queue) => queue.sealed_len(),
        }
    }

    /// Events accumulated in the current, not yet sealed, batch.
    pub(crate) fn buffered(&self) -> usize {
        match self {
            Self::Direct(_) => 0,
            Self::Batched(queue) => queue.current_len(),
        }
    }

    pub(crate) fn is_overflowing(&self) -> bool {
        match self {
            Self::Direct(queue) => queue.is_full(),
            Self::Batched(queue) => queue.is_overflowing(),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        match self {
            Self::Direct(queue) => queue.capacity(),
            Self::Batched(queue) => queue.sealed_capacity(),
        }
    }

    #[cfg(test)]
    pub(crate) fn is_batching(&self) -> bool {
        matches!(self, Self::Batched(_))
    }

    pub(crate) fn clear(&self) {
        match self {
            Self::Direct(queue) => queue.clear(),
            Self::Batched(queue) => queue.clear(),
        }
    }
}
