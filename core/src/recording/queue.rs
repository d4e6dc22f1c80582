use crossbeam_queue::ArrayQueue;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, Thread};

/// Bounded hand-off between the acquisition thread and the writer.
///
/// `push` never blocks: when the queue is full the oldest item is dropped and the push
/// reports it. `pop` parks the single reader until an item arrives or the queue is
/// closed and drained.
pub struct WriteQueue<T> {
    items: ArrayQueue<T>,
    closed: AtomicBool,
    reader: Mutex<Option<Thread>>,
}

impl<T> WriteQueue<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: ArrayQueue::new(capacity.max(1)),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        }
    }

    /// Returns `true` when an older item had to be dropped to make room. Pushing to a
    /// closed queue discards the item.
    pub fn push(&self, item: T) -> bool {
        if self.closed.load(Ordering::Acquire) {
            return false;
        }
        let dropped = self.items.force_push(item).is_some();
        self.wake_reader();
        dropped
    }

    pub fn pop(&self) -> Option<T> {
        loop {
            if let Some(item) = self.items.pop() {
                return Some(item);
            }
            if self.closed.load(Ordering::Acquire) {
                return self.items.pop();
            }
            self.register_reader();
            // Re-check after registering so a push racing the registration is not missed.
            if self.items.is_empty() && !self.closed.load(Ordering::Acquire) {
                thread::park();
            }
        }
    }

    /// Stops accepting items. Items already queued are still handed out.
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.wake_reader();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn register_reader(&self) {
        let mut reader = self.reader.lock().unwrap_or_else(PoisonError::into_inner);
        if reader.is_none() {
            *reader = Some(thread::current());
        }
    }

    fn wake_reader(&self) {
        if let Some(reader) = self.reader.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            reader.unpark();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn full_queue_drops_oldest() {
        let queue = WriteQueue::new(2);
        assert!(!queue.push(1));
        assert!(!queue.push(2));
        assert!(queue.push(3));
        queue.close();
        assert_eq!(queue.pop(), Some(2));
        assert_eq!(queue.pop(), Some(3));
        assert_eq!(queue.pop(), None);
    }

    #[test]
    fn close_wakes_a_blocked_reader() {
        let queue = Arc::new(WriteQueue::<u8>::new(4));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || queue.pop())
        };
        thread::sleep(Duration::from_millis(20));
        queue.close();
        assert_eq!(reader.join().unwrap(), None);
        assert!(!queue.push(9));
        assert!(queue.is_empty());
    }

    #[test]
    fn parked_reader_receives_every_item_in_order() {
        let queue = Arc::new(WriteQueue::<u32>::new(512));
        let reader = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                let mut seen = Vec::new();
                while let Some(item) = queue.pop() {
                    seen.push(item);
                }
                seen
            })
        };
        for item in 0..300 {
            assert!(!queue.push(item));
            if item % 50 == 0 {
                thread::sleep(Duration::from_millis(5));
            }
        }
        queue.close();
        assert_eq!(reader.join().unwrap(), (0..300).collect::<Vec<_>>());
    }
}
