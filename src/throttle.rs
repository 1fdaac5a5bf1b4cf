//! Counting semaphore doubling as a reader/writer lock.
//!
//! The shard map is guarded by a semaphore of capacity N: a reader takes
//! one permit, a writer takes all N in a single operation, so writers
//! cannot be starved by a trickle of readers each sneaking in one permit
//! while the writer collects the rest.

use parking_lot::{Condvar, Mutex};

pub(crate) struct Semaphore {
    capacity: usize,
    available: Mutex<usize>,
    released: Condvar,
}

impl Semaphore {
    pub(crate) fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "semaphore needs at least one permit");
        Self {
            capacity,
            available: Mutex::new(capacity),
            released: Condvar::new(),
        }
    }

    fn acquire(&self, permits: usize) -> SemaphoreGuard<'_> {
        debug_assert!(permits <= self.capacity);
        let mut available = self.available.lock();
        while *available < permits {
            self.released.wait(&mut available);
        }
        *available -= permits;
        SemaphoreGuard {
            semaphore: self,
            permits,
        }
    }

    /// Shared access; N may be held concurrently.
    pub(crate) fn read(&self) -> SemaphoreGuard<'_> {
        self.acquire(1)
    }

    /// Exclusive access; waits for all readers to drain.
    pub(crate) fn write(&self) -> SemaphoreGuard<'_> {
        self.acquire(self.capacity)
    }

    fn release(&self, permits: usize) {
        let mut available = self.available.lock();
        *available += permits;
        self.released.notify_all();
    }
}

pub(crate) struct SemaphoreGuard<'a> {
    semaphore: &'a Semaphore,
    permits: usize,
}

impl Drop for SemaphoreGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.release(self.permits);
    }
}
