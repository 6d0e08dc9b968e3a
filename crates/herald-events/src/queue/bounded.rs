//! Fixed-capacity FIFO with non-blocking offers and an async take.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

/// Bounded FIFO shared between publishers and a single consumer worker.
///
/// `offer` and `try_take` never wait. `take` suspends until an item is
/// available and is cancel-safe: an item is only removed when it is returned.
pub(crate) struct BoundedQueue<T> {
    items: Mutex<VecDeque<T>>,
    capacity: usize,
    available: Notify,
}

impl<T> BoundedQueue<T> {
    /// Capacity is clamped to at least one slot.
    pub(crate) fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            items: Mutex::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            available: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append `item`, handing it back if the queue is full.
    pub(crate) fn offer(&self, item: T) -> Result<(), T> {
        {
            let mut items = self.lock();
            if items.len() >= self.capacity {
                return Err(item);
            }
            items.push_back(item);
        }
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn try_take(&self) -> Option<T> {
        self.lock().pop_front()
    }

    pub(crate) async fn take(&self) -> T {
        loop {
            let notified = self.available.notified();
            if let Some(item) = self.try_take() {
                return item;
            }
            notified.await;
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    pub(crate) fn is_full(&self) -> bool {
        self.lock().len() >= self.capacity
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    pub(crate) fn clear(&self) {
        self.lock().clear();
    }
}
