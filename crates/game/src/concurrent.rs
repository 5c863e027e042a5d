//! Bounded FIFO handoff between worker threads.
//!
//! FIFO per producer; ordering between producers is whatever the lock gives
//! and must not be relied on. When the queue is full the oldest element is
//! dropped: every boundary this queue serves carries most-recent-wins
//! traffic (inputs, control retries, snapshots).

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};
use std::time::Duration;

#[derive(Debug)]
pub struct WorkQueue<T> {
    inner: Mutex<QueueInner<T>>,
    available: Condvar,
    capacity: usize,
}

#[derive(Debug)]
struct QueueInner<T> {
    items: VecDeque<T>,
    dropped: u64,
}

impl<T> WorkQueue<T> {
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            available: Condvar::new(),
            capacity,
        }
    }

    pub fn push(&self, value: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.items.len() >= self.capacity {
            inner.items.pop_front();
            inner.dropped += 1;
        }
        inner.items.push_back(value);
        drop(inner);
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.pop_front()
    }

    pub fn wait_pop(&self) -> T {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(value) = inner.items.pop_front() {
                return value;
            }
            inner = self
                .available
                .wait(inner)
                .unwrap_or_else(|e| e.into_inner());
        }
    }

    /// Blocks up to `timeout`; `None` lets worker loops re-check their stop
    /// flag instead of parking forever.
    pub fn wait_pop_timeout(&self, timeout: Duration) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(value) = inner.items.pop_front() {
            return Some(value);
        }
        let (mut inner, result) = self
            .available
            .wait_timeout(inner, timeout)
            .unwrap_or_else(|e| e.into_inner());
        let _ = result;
        inner.items.pop_front()
    }

    pub fn drain(&self) -> Vec<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.drain(..).collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.clear();
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .items
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dropped(&self) -> u64 {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn fifo_per_producer() {
        let queue = WorkQueue::new(16);
        for i in 0..5 {
            queue.push(i);
        }
        let drained = queue.drain();
        assert_eq!(drained, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = WorkQueue::new(3);
        for i in 0..5 {
            queue.push(i);
        }
        assert_eq!(queue.dropped(), 2);
        assert_eq!(queue.drain(), vec![2, 3, 4]);
    }

    #[test]
    fn wait_pop_crosses_threads() {
        let queue = Arc::new(WorkQueue::new(4));
        let producer = Arc::clone(&queue);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            producer.push(7u32);
        });
        assert_eq!(queue.wait_pop(), 7);
        handle.join().unwrap();
    }

    #[test]
    fn wait_pop_timeout_returns_none_when_idle() {
        let queue: WorkQueue<u32> = WorkQueue::new(4);
        assert_eq!(queue.wait_pop_timeout(Duration::from_millis(10)), None);
    }
}
