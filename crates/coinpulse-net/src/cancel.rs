//! Cancellation token for cooperative cancellation of async operations.
//!
//! Shared across the retry loop's suspension points: cancelling the token
//! stops the next attempt from starting and skips the pending backoff sleep.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::Failure;

/// A cancellation token that can be cloned and shared across tasks.
///
/// When `cancel()` is called on any clone, all clones observe the
/// cancellation.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Request cancellation. All clones of this token observe it.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Check cancellation and return an error if cancelled.
    pub fn check(&self) -> Result<(), CancelledError> {
        if self.is_cancelled() {
            Err(CancelledError)
        } else {
            Ok(())
        }
    }
}

/// Error returned when an operation is cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancelledError;

impl std::fmt::Display for CancelledError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Operation was cancelled")
    }
}

impl std::error::Error for CancelledError {}

// Cancellation is terminal: an Unknown failure is never retried.
impl From<CancelledError> for Failure {
    fn from(err: CancelledError) -> Self {
        Failure::unknown(err.to_string())
    }
}
