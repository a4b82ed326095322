//! Volatile Queue (C8): a bounded, blocking LIFO between the reading
//! engine and the publisher.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

use edge_model::Readout;

pub const VOLATILE_QUEUE_MAXSIZE: usize = 10_000;

/// Either a readout, or the sentinel that tells the publisher and spill
/// controller to drain and exit (REDESIGN FLAG: an explicit variant
/// rather than an empty/None item, so "queue had a shutdown marker in it"
/// can never be confused with "queue is simply empty").
#[derive(Debug, Clone)]
pub enum QueueItem {
    Readout(Readout),
    Shutdown,
}

struct Inner {
    items: VecDeque<QueueItem>,
}

pub struct VolatileQueue {
    capacity: usize,
    inner: Mutex<Inner>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl VolatileQueue {
    pub fn new(capacity: usize) -> Self {
        VolatileQueue {
            capacity,
            inner: Mutex::new(Inner { items: VecDeque::new() }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Push to the head, so the next `get()` sees it first (LIFO). Blocks
    /// while the queue is at capacity — the spill queue is expected to
    /// relieve pressure before this ever matters in practice (§4.8).
    pub fn put(&self, item: QueueItem) {
        let mut guard = self.inner.lock().unwrap();
        while guard.items.len() >= self.capacity {
            guard = self.not_full.wait(guard).unwrap();
        }
        guard.items.push_front(item);
        self.not_empty.notify_one();
    }

    /// Non-blocking put used by the spill controller when moving an item
    /// durable → volatile; the controller itself enforces the depth
    /// heuristic that keeps this from overflowing in steady state.
    pub fn try_put(&self, item: QueueItem) -> bool {
        let mut guard = self.inner.lock().unwrap();
        if guard.items.len() >= self.capacity {
            return false;
        }
        guard.items.push_front(item);
        self.not_empty.notify_one();
        true
    }

    /// Block until an item (or the shutdown sentinel) is available.
    pub fn get(&self) -> QueueItem {
        let mut guard = self.inner.lock().unwrap();
        loop {
            if let Some(item) = guard.items.pop_front() {
                self.not_full.notify_one();
                return item;
            }
            guard = self.not_empty.wait(guard).unwrap();
        }
    }

    /// Pop the oldest (tail) item without blocking, for the spill
    /// controller's "push the stalest item durable" direction — spilling
    /// from the tail preserves the freshest-first LIFO order.
    pub fn try_pop_tail(&self) -> Option<QueueItem> {
        let mut guard = self.inner.lock().unwrap();
        let item = guard.items.pop_back();
        if item.is_some() {
            self.not_full.notify_one();
        }
        item
    }

    pub fn size(&self) -> usize {
        self.inner.lock().unwrap().items.len()
    }

    /// Drain every remaining readout (sentinel excluded) for the
    /// shutdown-time C8 → C9 flush.
    pub fn drain_readouts(&self) -> Vec<Readout> {
        let mut guard = self.inner.lock().unwrap();
        guard
            .items
            .drain(..)
            .filter_map(|i| match i {
                QueueItem::Readout(r) => Some(r),
                QueueItem::Shutdown => None,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use edge_model::readout::Metadata;

    fn sample_readout() -> Readout {
        Readout { t: 0, r: vec![], m: Metadata::default() }
    }

    #[test]
    fn lifo_order_freshest_first() {
        let q = VolatileQueue::new(10);
        q.put(QueueItem::Readout(sample_readout()));
        q.put(QueueItem::Shutdown);
        match q.get() {
            QueueItem::Shutdown => {}
            other => panic!("expected shutdown first, got {:?}", other),
        }
    }

    #[test]
    fn try_put_fails_at_capacity() {
        let q = VolatileQueue::new(1);
        assert!(q.try_put(QueueItem::Readout(sample_readout())));
        assert!(!q.try_put(QueueItem::Readout(sample_readout())));
    }
}
