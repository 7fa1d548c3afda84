//! Cooperative cancellation for cache operations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{CacheError, Result};

/// A cloneable cancellation signal checked at every suspension point.
///
/// Cancellation is cooperative: triggering the token never interrupts an
/// operation mid-transaction. Operations check the token before each
/// upstream fetch and before each storage transaction, abort cleanly, and
/// surface [`CacheError::Cancelled`]; locks and transactions are released on
/// that path exactly as on any other error path.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Creates a token in the non-cancelled state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals cancellation to every clone of this token.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancellationToken::cancel`] has been called.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Errors with [`CacheError::Cancelled`] when the token has fired.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(CacheError::Cancelled)
        } else {
            Ok(())
        }
    }
}
