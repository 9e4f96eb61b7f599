//! Bounded per-server work queues for checksum scheduling.

use std::collections::VecDeque;
use std::sync::Mutex;

use tokio::sync::Notify;

/// Two-phase FIFO handed to checksum workers.
///
/// While accepting, [`get`](TabletQueue::get) waits for new items. After
/// [`shutdown`](TabletQueue::shutdown) it drains the remaining items without
/// blocking and then returns `None`, so workers can poll it safely from
/// their completion path.
pub struct TabletQueue<T> {
    inner: Mutex<Inner<T>>,
    available: Notify,
    capacity: usize,
}

struct Inner<T> {
    items: VecDeque<T>,
    shut_down: bool,
}

impl<T> TabletQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                items: VecDeque::with_capacity(capacity),
                shut_down: false,
            }),
            available: Notify::new(),
            capacity,
        }
    }

    /// Enqueue one item. Putting into a full or shut-down queue is a caller
    /// bug: capacity is sized to the total expected items up front.
    pub fn put(&self, item: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        assert!(!inner.shut_down, "put on a shut-down queue");
        assert!(inner.items.len() < self.capacity, "queue over capacity");
        inner.items.push_back(item);
        drop(inner);
        self.available.notify_one();
    }

    /// Close the queue for further puts. Pending and future `get` calls stop
    /// blocking once the remaining items drain.
    pub fn shutdown(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.shut_down = true;
        drop(inner);
        self.available.notify_waiters();
    }

    /// Pop the next item in FIFO order. Resolves to `None` once the queue is
    /// both empty and shut down.
    pub async fn get(&self) -> Option<T> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking state so a concurrent
            // shutdown between the check and the await is not missed.
            notified.as_mut().enable();
            {
                let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(item) = inner.items.pop_front() {
                    return Some(item);
                }
                if inner.shut_down {
                    return None;
                }
            }
            notified.await;
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
