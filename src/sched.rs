//! Two-queue process scheduler.
//!
//! Query work starts in the interactive queue with a short deadline. A
//! worker that keeps its slot past the deadline yields and is downgraded to
//! the smaller batch queue, so a stream of small queries keeps its tail
//! latency while large queries still make progress. The exclusive mode
//! takes every slot and is used while the shard set is replaced.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerOpts {
    /// Bypass all accounting; every acquire succeeds.
    pub disabled: bool,
    /// Slots in the interactive queue.
    pub interactive_capacity: usize,
    /// `interactive_capacity / batch_div` slots form the batch queue.
    pub batch_div: usize,
    /// Time an interactive slot may run before a yield downgrades it.
    pub interactive_duration: Duration,
}

impl SchedulerOpts {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            disabled: false,
            interactive_capacity: capacity.max(1),
            batch_div: 4,
            interactive_duration: Duration::from_millis(5),
        }
    }

    /// Parses a `disable,batchdiv=N,interactive_ms=N` tuning string.
    /// Unknown keys are ignored with a warning.
    pub fn parse(tuning: &str, capacity: usize) -> Self {
        let mut opts = Self::with_capacity(capacity);
        for entry in tuning.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (key, value) = match entry.split_once('=') {
                Some((key, value)) => (key.trim(), Some(value.trim())),
                None => (entry, None),
            };
            match (key, value) {
                ("disable", _) => opts.disabled = true,
                ("batchdiv", Some(value)) => match value.parse::<usize>() {
                    Ok(div) if div > 0 => opts.batch_div = div,
                    _ => warn!(entry, "ignoring bad batchdiv"),
                },
                ("interactive_ms", Some(value)) => match value.parse::<u64>() {
                    Ok(ms) => opts.interactive_duration = Duration::from_millis(ms),
                    Err(_) => warn!(entry, "ignoring bad interactive_ms"),
                },
                _ => warn!(entry, "ignoring unknown scheduler tuning"),
            }
        }
        opts
    }

    fn batch_capacity(&self) -> usize {
        (self.interactive_capacity / self.batch_div).max(1)
    }
}

#[derive(Debug, Default)]
struct Queues {
    interactive: usize,
    batch: usize,
}

pub struct Scheduler {
    opts: SchedulerOpts,
    queues: Mutex<Queues>,
    released: Condvar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Interactive,
    Batch,
    Unlimited,
}

/// One granted processing slot. Dropping releases it.
pub struct Slot<'a> {
    scheduler: &'a Scheduler,
    mode: Mode,
    deadline: Instant,
}

impl Scheduler {
    pub fn new(opts: SchedulerOpts) -> Self {
        Self {
            opts,
            queues: Mutex::new(Queues::default()),
            released: Condvar::new(),
        }
    }

    pub fn opts(&self) -> &SchedulerOpts {
        &self.opts
    }

    /// Non-blocking interactive acquire.
    pub fn try_acquire(&self) -> Option<Slot<'_>> {
        if self.opts.disabled {
            return Some(self.unlimited_slot());
        }
        let mut queues = self.queues.lock();
        if queues.interactive < self.opts.interactive_capacity {
            queues.interactive += 1;
            Some(self.interactive_slot())
        } else {
            None
        }
    }

    /// Blocking interactive acquire, giving up at `deadline`.
    pub fn acquire(&self, deadline: Option<Instant>) -> Option<Slot<'_>> {
        if self.opts.disabled {
            return Some(self.unlimited_slot());
        }
        let mut queues = self.queues.lock();
        while queues.interactive >= self.opts.interactive_capacity {
            match deadline {
                Some(deadline) => {
                    if self.released.wait_until(&mut queues, deadline).timed_out() {
                        return None;
                    }
                }
                None => self.released.wait(&mut queues),
            }
        }
        queues.interactive += 1;
        Some(self.interactive_slot())
    }

    /// Takes the entire interactive and batch capacity. Used while the
    /// shard set is swapped.
    pub fn exclusive(&self) -> Exclusive<'_> {
        if self.opts.disabled {
            return Exclusive {
                scheduler: self,
                held: false,
            };
        }
        let mut queues = self.queues.lock();
        while queues.interactive > 0 || queues.batch > 0 {
            self.released.wait(&mut queues);
        }
        queues.interactive = self.opts.interactive_capacity;
        queues.batch = self.opts.batch_capacity();
        Exclusive {
            scheduler: self,
            held: true,
        }
    }

    fn interactive_slot(&self) -> Slot<'_> {
        Slot {
            scheduler: self,
            mode: Mode::Interactive,
            deadline: Instant::now() + self.opts.interactive_duration,
        }
    }

    fn unlimited_slot(&self) -> Slot<'_> {
        Slot {
            scheduler: self,
            mode: Mode::Unlimited,
            deadline: Instant::now() + Duration::from_secs(3600),
        }
    }
}

impl Slot<'_> {
    /// Downgrades an interactive slot whose deadline has passed into the
    /// batch queue, waiting for batch capacity if it is full. The hot path
    /// is a single clock read while the deadline is still ahead.
    pub fn maybe_yield(&mut self) {
        if self.mode != Mode::Interactive || Instant::now() < self.deadline {
            return;
        }
        let scheduler = self.scheduler;
        let mut queues = scheduler.queues.lock();
        while queues.batch >= scheduler.opts.batch_capacity() {
            scheduler.released.wait(&mut queues);
        }
        queues.interactive -= 1;
        queues.batch += 1;
        self.mode = Mode::Batch;
        drop(queues);
        scheduler.released.notify_all();
    }

    pub fn is_interactive(&self) -> bool {
        self.mode == Mode::Interactive
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        match self.mode {
            Mode::Unlimited => return,
            Mode::Interactive => self.scheduler.queues.lock().interactive -= 1,
            Mode::Batch => self.scheduler.queues.lock().batch -= 1,
        }
        self.scheduler.released.notify_all();
    }
}

pub struct Exclusive<'a> {
    scheduler: &'a Scheduler,
    held: bool,
}

impl Drop for Exclusive<'_> {
    fn drop(&mut self) {
        if self.held {
            let mut queues = self.scheduler.queues.lock();
            queues.interactive = 0;
            queues.batch = 0;
            drop(queues);
            self.scheduler.released.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_opts(capacity: usize) -> SchedulerOpts {
        SchedulerOpts {
            disabled: false,
            interactive_capacity: capacity,
            batch_div: 4,
            // Immediately expired, so maybe_yield always downgrades.
            interactive_duration: Duration::ZERO,
        }
    }

    #[test]
    fn parse_tuning_string() {
        let opts = SchedulerOpts::parse("batchdiv=2,interactive_ms=50", 8);
        assert!(!opts.disabled);
        assert_eq!(opts.batch_div, 2);
        assert_eq!(opts.interactive_duration, Duration::from_millis(50));
        assert_eq!(opts.batch_capacity(), 4);

        let opts = SchedulerOpts::parse("disable", 8);
        assert!(opts.disabled);

        let opts = SchedulerOpts::parse("mystery,batchdiv=0", 8);
        assert_eq!(opts.batch_div, 4);
    }

    #[test]
    fn interactive_capacity_is_enforced() {
        let scheduler = Scheduler::new(test_opts(8));
        let mut held: Vec<Slot> = (0..8)
            .map(|_| scheduler.try_acquire().expect("capacity available"))
            .collect();

        // Ninth acquire fails immediately.
        assert!(scheduler.try_acquire().is_none());

        // Yielding one slot past its deadline downgrades it to batch and
        // frees an interactive slot.
        held[0].maybe_yield();
        assert!(!held[0].is_interactive());
        let ninth = scheduler.try_acquire().expect("slot freed by yield");

        // Fill batch to its cap of two.
        held[1].maybe_yield();
        let tenth = scheduler.try_acquire().expect("second yield frees another");

        // All interactive slots are taken again; a timed acquire gives up.
        let deadline = Instant::now() + Duration::from_millis(30);
        assert!(scheduler.acquire(Some(deadline)).is_none());

        drop(ninth);
        let replacement = scheduler.try_acquire();
        assert!(replacement.is_some());
        drop(replacement);
        drop(tenth);
        drop(held);
    }

    #[test]
    fn disabled_scheduler_never_blocks() {
        let scheduler = Scheduler::new(SchedulerOpts::parse("disable", 1));
        let slots: Vec<Slot> = (0..32)
            .map(|_| scheduler.try_acquire().expect("disabled"))
            .collect();
        drop(slots);
    }

    #[test]
    fn exclusive_waits_for_slots() {
        let scheduler = Scheduler::new(test_opts(2));
        {
            let _slot = scheduler.try_acquire().unwrap();
            assert_eq!(scheduler.queues.lock().interactive, 1);
        }
        let exclusive = scheduler.exclusive();
        assert!(scheduler.try_acquire().is_none());
        drop(exclusive);
        assert!(scheduler.try_acquire().is_some());
    }
}
