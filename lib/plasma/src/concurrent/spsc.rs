use crate::concurrent::bits::{is_power_of_two, CachePadded};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicUsize, Ordering};

/// Wait-free single-producer single-consumer queue used for cross-agent
/// events (Conductor to Sender, Receiver to Conductor and so on). Exactly one
/// thread may call the producer methods and exactly one the consumer methods;
/// the head and tail counters each have a single writer, so plain
/// acquire/release pairs are sufficient.
pub struct OneToOneQueue<T> {
    head: CachePadded<AtomicUsize>,
    tail: CachePadded<AtomicUsize>,
    mask: usize,
    slots: Box<[UnsafeCell<Option<T>>]>,
}

unsafe impl<T: Send> Send for OneToOneQueue<T> {}
unsafe impl<T: Send> Sync for OneToOneQueue<T> {}

impl<T> OneToOneQueue<T> {
    pub fn with_capacity(capacity: usize) -> OneToOneQueue<T> {
        if !is_power_of_two(capacity as u64) {
            panic!("Queue capacity must be a power of two, got {}", capacity);
        }

        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || UnsafeCell::new(None));

        OneToOneQueue {
            head: CachePadded(AtomicUsize::new(0)),
            tail: CachePadded(AtomicUsize::new(0)),
            mask: capacity - 1,
            slots: slots.into_boxed_slice(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Producer side. Returns the value back when the queue is full.
    pub fn offer(&self, value: T) -> Result<(), T> {
        let tail = self.tail.0.load(Ordering::Relaxed);
        let head = self.head.0.load(Ordering::Acquire);

        if tail - head == self.slots.len() {
            return Err(value);
        }

        unsafe { *self.slots[tail & self.mask].get() = Some(value) };
        self.tail.0.store(tail + 1, Ordering::Release);
        Ok(())
    }

    /// Consumer side.
    pub fn poll(&self) -> Option<T> {
        let head = self.head.0.load(Ordering::Relaxed);
        let tail = self.tail.0.load(Ordering::Acquire);

        if head == tail {
            return None;
        }

        let value = unsafe { (*self.slots[head & self.mask].get()).take() };
        self.head.0.store(head + 1, Ordering::Release);
        value
    }

    /// Consumer side: drains up to `limit` values into the handler, returning
    /// the number consumed.
    pub fn drain<F: FnMut(T)>(&self, mut handler: F, limit: usize) -> usize {
        let mut count = 0;

        while count < limit {
            match self.poll() {
                Some(value) => {
                    handler(value);
                    count += 1;
                }
                None => break,
            }
        }

        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_offer_poll() {
        let queue = OneToOneQueue::with_capacity(4);

        assert!(queue.offer(1).is_ok());
        assert!(queue.offer(2).is_ok());
        assert_eq!(queue.poll(), Some(1));
        assert_eq!(queue.poll(), Some(2));
        assert_eq!(queue.poll(), None);
    }

    #[test]
    fn test_full_queue_rejects() {
        let queue = OneToOneQueue::with_capacity(2);

        assert!(queue.offer(1).is_ok());
        assert!(queue.offer(2).is_ok());
        assert_eq!(queue.offer(3), Err(3));

        assert_eq!(queue.poll(), Some(1));
        assert!(queue.offer(3).is_ok());
    }

    #[test]
    fn test_drain_bounded() {
        let queue = OneToOneQueue::with_capacity(8);
        for i in 0..5 {
            queue.offer(i).unwrap();
        }

        let mut seen = Vec::new();
        let count = queue.drain(|v| seen.push(v), 3);

        assert_eq!(count, 3);
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(queue.poll(), Some(3));
    }

    #[test]
    fn test_cross_thread_ordering() {
        let queue = Arc::new(OneToOneQueue::with_capacity(1024));
        let producer = Arc::clone(&queue);

        let handle = thread::spawn(move || {
            for i in 0..10_000u64 {
                while producer.offer(i).is_err() {
                    thread::yield_now();
                }
            }
        });

        let mut expected = 0u64;
        while expected < 10_000 {
            if let Some(value) = queue.poll() {
                assert_eq!(value, expected);
                expected += 1;
            }
        }

        handle.join().unwrap();
    }

    #[test]
    #[should_panic]
    fn test_non_power_of_two_capacity_panics() {
        OneToOneQueue::<u32>::with_capacity(6);
    }
}
