//! Bounded lock-free MPMC queue (Vyukov algorithm).
//!
//! Each slot carries a sequence counter. A push succeeds when the target
//! slot's sequence equals the enqueue ticket; a pop succeeds when it equals
//! the ticket plus one. The sign of the difference distinguishes full from
//! contended. Both operations are wait-free per attempt; callers retry
//! under contention.

use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

#[repr(align(64))]
struct CachePadded<T>(T);

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub struct ArrayQueue<T> {
    slots: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for ArrayQueue<T> {}
unsafe impl<T: Send> Sync for ArrayQueue<T> {}

impl<T> ArrayQueue<T> {
    /// Create a queue with the given capacity.
    ///
    /// # Panics
    /// Panics if `capacity` is not a power of two or is smaller than 2.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity >= 2 && capacity.is_power_of_two(),
            "capacity must be a power of two >= 2"
        );
        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self {
            slots,
            mask: capacity - 1,
            enqueue_pos: CachePadded(AtomicUsize::new(0)),
            dequeue_pos: CachePadded(AtomicUsize::new(0)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Attempt to enqueue. Returns the value back when the queue is full.
    pub fn try_push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos as isize;

            if diff == 0 {
                // The slot is free for this ticket; claim it.
                match self.enqueue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        unsafe { (*slot.value.get()).write(value) };
                        slot.sequence.store(pos.wrapping_add(1), Ordering::Release);
                        return Ok(());
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return Err(value);
            } else {
                pos = self.enqueue_pos.0.load(Ordering::Relaxed);
            }
        }
    }

    /// Attempt to dequeue. Returns `None` when the queue is empty.
    pub fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.0.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);
            let diff = seq as isize - pos.wrapping_add(1) as isize;

            if diff == 0 {
                match self.dequeue_pos.0.compare_exchange_weak(
                    pos,
                    pos.wrapping_add(1),
                    Ordering::Relaxed,
                    Ordering::Relaxed,
                ) {
                    Ok(_) => {
                        let value = unsafe { (*slot.value.get()).assume_init_read() };
                        slot.sequence
                            .store(pos.wrapping_add(self.slots.len()), Ordering::Release);
                        return Some(value);
                    }
                    Err(current) => pos = current,
                }
            } else if diff < 0 {
                return None;
            } else {
                pos = self.dequeue_pos.0.load(Ordering::Relaxed);
            }
        }
    }
}

impl<T> Drop for ArrayQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_push_pop_single_thread() {
        let q = ArrayQueue::new(4);
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert_eq!(q.try_pop(), Some(1));
        assert_eq!(q.try_pop(), Some(2));
        assert_eq!(q.try_pop(), None);
    }

    #[test]
    fn test_full_queue_rejects() {
        let q = ArrayQueue::new(2);
        assert!(q.try_push(1).is_ok());
        assert!(q.try_push(2).is_ok());
        assert_eq!(q.try_push(3), Err(3));
        assert_eq!(q.try_pop(), Some(1));
        assert!(q.try_push(3).is_ok());
    }

    #[test]
    #[should_panic(expected = "power of two")]
    fn test_non_power_of_two_capacity_panics() {
        let _ = ArrayQueue::<u32>::new(3);
    }

    #[test]
    fn test_wraparound() {
        let q = ArrayQueue::new(2);
        for i in 0..100 {
            assert!(q.try_push(i).is_ok());
            assert_eq!(q.try_pop(), Some(i));
        }
    }

    #[test]
    fn test_mpmc_no_loss_no_duplication() {
        const PRODUCERS: usize = 4;
        const CONSUMERS: usize = 4;
        const PER_PRODUCER: usize = 10_000;

        let q = Arc::new(ArrayQueue::new(64));
        let mut handles = Vec::new();

        for p in 0..PRODUCERS {
            let q = Arc::clone(&q);
            handles.push(thread::spawn(move || {
                for i in 0..PER_PRODUCER {
                    let mut v = (p, i);
                    loop {
                        match q.try_push(v) {
                            Ok(()) => break,
                            Err(back) => {
                                v = back;
                                thread::yield_now();
                            }
                        }
                    }
                }
            }));
        }

        let popped = Arc::new(AtomicUsize::new(0));
        let mut consumers = Vec::new();
        for _ in 0..CONSUMERS {
            let q = Arc::clone(&q);
            let popped = Arc::clone(&popped);
            consumers.push(thread::spawn(move || {
                let mut seen = Vec::new();
                while popped.load(Ordering::Relaxed) < PRODUCERS * PER_PRODUCER {
                    match q.try_pop() {
                        Some(v) => {
                            seen.push(v);
                            popped.fetch_add(1, Ordering::Relaxed);
                        }
                        None => thread::yield_now(),
                    }
                }
                seen
            }));
        }

        for h in handles {
            h.join().unwrap();
        }

        let mut all: Vec<(usize, usize)> = Vec::new();
        for c in consumers {
            let seen = c.join().unwrap();
            // FIFO per producer: within one consumer, the items observed
            // from a given producer must be strictly increasing.
            for p in 0..PRODUCERS {
                let sequence: Vec<usize> =
                    seen.iter().filter(|(sp, _)| *sp == p).map(|(_, i)| *i).collect();
                assert!(
                    sequence.windows(2).all(|w| w[0] < w[1]),
                    "per-producer FIFO violated"
                );
            }
            all.extend(seen);
        }

        assert_eq!(all.len(), PRODUCERS * PER_PRODUCER, "lost or duplicated items");

        // Every (producer, index) pair must appear exactly once.
        let mut per_producer: Vec<Vec<usize>> = vec![Vec::new(); PRODUCERS];
        for (p, i) in &all {
            per_producer[*p].push(*i);
        }
        for seq in per_producer.iter_mut() {
            seq.sort_unstable();
            assert_eq!(seq.len(), PER_PRODUCER);
            for (expect, got) in seq.iter().enumerate() {
                assert_eq!(expect, *got);
            }
        }
    }

    #[test]
    fn test_fifo_single_producer_single_consumer() {
        let q = Arc::new(ArrayQueue::new(8));
        let producer = {
            let q = Arc::clone(&q);
            thread::spawn(move || {
                for i in 0..5000u32 {
                    let mut v = i;
                    while let Err(back) = q.try_push(v) {
                        v = back;
                        thread::yield_now();
                    }
                }
            })
        };

        let mut next = 0u32;
        while next < 5000 {
            if let Some(v) = q.try_pop() {
                assert_eq!(v, next, "FIFO order violated");
                next += 1;
            } else {
                thread::yield_now();
            }
        }
        producer.join().unwrap();
    }
}
