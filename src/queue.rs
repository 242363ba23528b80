//! Bounded lock-free MPMC ring buffer holding ready task handles.
//!
//! Every worker pushes and pops concurrently, so each slot carries a sequence
//! number that encodes whose turn it is: a slot whose sequence equals the
//! enqueue cursor is free, one whose sequence is cursor + 1 holds a value for
//! the matching dequeue. The cursors only move through a successful CAS, and
//! the release store on the sequence publishes the slot contents to whichever
//! thread claims it next.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slot<T> {
    sequence: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

pub(crate) struct ReadyQueue<T> {
    buffer: Box<[Slot<T>]>,
    mask: usize,
    enqueue_pos: CachePadded<AtomicUsize>,
    dequeue_pos: CachePadded<AtomicUsize>,
}

unsafe impl<T: Send> Send for ReadyQueue<T> {}
unsafe impl<T: Send> Sync for ReadyQueue<T> {}

impl<T> ReadyQueue<T> {
    /// Creates a queue holding at least `capacity` elements. The ring size is
    /// rounded up to the next power of two so the cursors can wrap by mask.
    pub(crate) fn new(capacity: usize) -> ReadyQueue<T> {
        assert!(capacity > 0, "queue capacity must be positive");
        let cap = capacity.next_power_of_two();

        let buffer = (0..cap)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();

        ReadyQueue {
            buffer,
            mask: cap - 1,
            enqueue_pos: CachePadded::new(AtomicUsize::new(0)),
            dequeue_pos: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Pushes a value, or hands it back if the ring is full. Lock-free: a
    /// stalled competitor cannot block this call forever, only force retries.
    pub(crate) fn push(&self, value: T) -> Result<(), T> {
        let mut pos = self.enqueue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);

            match seq as isize - pos as isize {
                0 => {
                    // The slot is free at this cursor; claim it.
                    match self.enqueue_pos.compare_exchange_weak(
                        pos,
                        pos + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            unsafe { (*slot.value.get()).write(value) };
                            slot.sequence.store(pos + 1, Ordering::Release);
                            return Ok(());
                        }
                        Err(current) => pos = current,
                    }
                }
                diff if diff < 0 => return Err(value),
                _ => pos = self.enqueue_pos.load(Ordering::Relaxed),
            }
        }
    }

    /// Pops the oldest value, or `None` when no element is observable. Never
    /// waits; an empty or contended queue reports `None` and the caller
    /// decides how to back off.
    pub(crate) fn try_pop(&self) -> Option<T> {
        let mut pos = self.dequeue_pos.load(Ordering::Relaxed);

        loop {
            let slot = &self.buffer[pos & self.mask];
            let seq = slot.sequence.load(Ordering::Acquire);

            match seq as isize - (pos + 1) as isize {
                0 => {
                    match self.dequeue_pos.compare_exchange_weak(
                        pos,
                        pos + 1,
                        Ordering::Relaxed,
                        Ordering::Relaxed,
                    ) {
                        Ok(_) => {
                            let value = unsafe { (*slot.value.get()).assume_init_read() };
                            // Mark the slot free for the lap after next.
                            slot.sequence.store(pos + self.mask + 1, Ordering::Release);
                            return Some(value);
                        }
                        Err(current) => pos = current,
                    }
                }
                diff if diff < 0 => return None,
                _ => pos = self.dequeue_pos.load(Ordering::Relaxed),
            }
        }
    }

    /// Approximate occupancy. A racy snapshot of both cursors; useful as a
    /// readiness hint, never for correctness decisions.
    #[allow(dead_code)]
    pub(crate) fn len(&self) -> usize {
        let enq = self.enqueue_pos.load(Ordering::Relaxed);
        let deq = self.dequeue_pos.load(Ordering::Relaxed);
        enq.saturating_sub(deq)
    }
}

impl<T> Drop for ReadyQueue<T> {
    fn drop(&mut self) {
        while self.try_pop().is_some() {}
    }
}
