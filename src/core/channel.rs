//! Bounded producer→consumer handoff with a recycled slot pool.
//!
//! Capture producers obtain a writable slot with [`Channel::retain`], fill it
//! and [`Channel::push`] it; the decode worker [`Channel::pull`]s slots in
//! FIFO order and hands them back with [`Channel::release`]. Both sides block
//! rather than drop: a slow consumer exerts back-pressure on the producer
//! through the bounded slot pool. [`Channel::close`] marks end-of-stream;
//! `pull` then drains the queue and returns `None`.

use std::collections::VecDeque;
use std::sync::{Condvar, Mutex};

const DEFAULT_CAPACITY: usize = 256;

struct Inner<T> {
    queue: VecDeque<Box<T>>,
    pool: Vec<Box<T>>,
    allocated: usize,
    capacity: usize,
    closed: bool,
}

/// Multi-producer, single-consumer FIFO of recycled slots.
pub struct Channel<T> {
    inner: Mutex<Inner<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T: Default> Channel<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                queue: VecDeque::new(),
                pool: Vec::new(),
                allocated: 0,
                capacity: capacity.max(1),
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    /// Obtain a writable slot, blocking while all slots are in flight.
    pub fn retain(&self) -> Box<T> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(slot) = inner.pool.pop() {
                return slot;
            }
            if inner.allocated < inner.capacity {
                inner.allocated += 1;
                return Box::new(T::default());
            }
            inner = self.not_full.wait(inner).unwrap();
        }
    }

    /// Enqueue a filled slot and wake a waiting consumer.
    pub fn push(&self, slot: Box<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.queue.push_back(slot);
        self.not_empty.notify_one();
    }

    /// Dequeue the next slot in FIFO order. Blocks while the channel is empty
    /// and open; returns `None` once it is closed and drained.
    pub fn pull(&self) -> Option<Box<T>> {
        let mut inner = self.inner.lock().unwrap();
        loop {
            if let Some(slot) = inner.queue.pop_front() {
                return Some(slot);
            }
            if inner.closed {
                return None;
            }
            inner = self.not_empty.wait(inner).unwrap();
        }
    }

    /// Return a consumed slot to the pool and wake a blocked producer.
    pub fn release(&self, slot: Box<T>) {
        let mut inner = self.inner.lock().unwrap();
        inner.pool.push(slot);
        self.not_full.notify_one();
    }

    /// Mark end-of-stream. Queued slots remain pullable.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.closed = true;
        self.not_empty.notify_all();
    }
}

impl<T: Default> Default for Channel<T> {
    fn default() -> Self {
        Self::new()
    }
}
