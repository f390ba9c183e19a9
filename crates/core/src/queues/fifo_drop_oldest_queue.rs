use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;
use tokio::sync::Notify;

/// Bounded FIFO shared by the bus (pushing) and one worker (popping).
/// When full, the oldest entry makes room for the new one.
pub struct FifoDropOldestQueue<T> {
    buf: Mutex<VecDeque<T>>,
    capacity: usize,
    wake: Arc<Notify>,
}

impl<T> FifoDropOldestQueue<T> {
    /// `capacity` is clamped to at least 1.
    pub fn new(capacity: usize, wake: Arc<Notify>) -> Self {
        let capacity = capacity.max(1);
        Self {
            buf: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
            wake,
        }
    }

    /// Appends `value` and hands back whatever was evicted to make room.
    pub fn push(&self, value: T) -> Option<T> {
        let evicted = {
            let mut buf = self.buf.lock();
            let evicted = if buf.len() == self.capacity {
                buf.pop_front()
            } else {
                None
            };
            buf.push_back(value);
            evicted
        };
        self.wake.notify_one();
        evicted
    }

    pub fn pop(&self) -> Option<T> {
        self.buf.lock().pop_front()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evicts_oldest_when_full() {
        let queue = FifoDropOldestQueue::new(2, Arc::new(Notify::new()));
        assert_eq!(queue.push(1), None);
        assert_eq!(queue.push(2), None);
        assert_eq!(queue.push(3), Some(1));
        assert_eq!(queue.len(), 2);

        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
        assert!(queue.is_empty());
    }

    #[test]
    fn zero_capacity_holds_one() {
        let queue = FifoDropOldestQueue::new(0, Arc::new(Notify::new()));
        assert_eq!(queue.capacity(), 1);
        queue.push('a');
        assert_eq!(queue.push('b'), Some('a'));
    }
}
