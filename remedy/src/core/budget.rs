//! Per-call time budget and cooperative cancellation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;

/// Why a budgeted call stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Interrupted {
    #[error("call cancelled by caller")]
    Cancelled,
    #[error("call deadline exceeded")]
    DeadlineExceeded,
}

/// Absolute deadline plus a shared cancellation flag.
///
/// Cloning shares the flag, so a [`CancelHandle`] taken from any clone
/// cancels all of them.
#[derive(Debug, Clone)]
pub struct Deadline {
    at: Instant,
    cancelled: Arc<AtomicBool>,
}

impl Deadline {
    pub fn after(timeout: Duration) -> Self {
        Self {
            at: Instant::now() + timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn at(&self) -> Instant {
        self.at
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            cancelled: Arc::clone(&self.cancelled),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Return the remaining budget, or why there is none left.
    ///
    /// Cancellation wins over expiry when both apply.
    pub fn remaining(&self) -> Result<Duration, Interrupted> {
        if self.is_cancelled() {
            return Err(Interrupted::Cancelled);
        }
        let remaining = self
            .at
            .checked_duration_since(Instant::now())
            .unwrap_or(Duration::ZERO);
        if remaining.is_zero() {
            return Err(Interrupted::DeadlineExceeded);
        }
        Ok(remaining)
    }
}

/// Raises the cancellation flag of the [`Deadline`] it came from.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}
