//! Cooperative cancellation for searches.
//!
//! A [`CancellationToken`] is handed to every worker participating in one
//! search. Workers poll [`CancellationToken::is_cancelled`] at their
//! suspension points (and every [`CANCEL_CHECK_INTERVAL`] iterations inside
//! hot loops) and unwind with partial results when it fires. Cancelling is
//! idempotent; the first caller to flip the token learns it did so.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// How many loop iterations may pass between cancellation checks.
pub const CANCEL_CHECK_INTERVAL: usize = 1024;

#[derive(Debug)]
struct Inner {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
}

/// Shared cancellation flag with an optional deadline.
///
/// Clones observe the same flag. The deadline is part of the token so that
/// workers need a single check for both explicit cancellation and timeout.
#[derive(Debug, Clone)]
pub struct CancellationToken {
    inner: Arc<Inner>,
}

impl CancellationToken {
    /// A token that only fires when [`cancel`](Self::cancel) is called.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// A token that additionally fires once `deadline` passes.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(Some(deadline))
    }

    /// A token firing `timeout` from now.
    pub fn after(timeout: Duration) -> Self {
        Self::build(Some(Instant::now() + timeout))
    }

    fn build(deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                cancelled: AtomicBool::new(false),
                deadline,
            }),
        }
    }

    /// Fires the token. Returns true for the call that actually flipped the
    /// flag; later calls are no-ops.
    pub fn cancel(&self) -> bool {
        !self.inner.cancelled.swap(true, Ordering::SeqCst)
    }

    pub fn is_cancelled(&self) -> bool {
        if self.inner.cancelled.load(Ordering::SeqCst) {
            return true;
        }
        match self.inner.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
