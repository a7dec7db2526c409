//! Cooperative cancellation.
//!
//! Orchestrators check the token at file boundaries: between tree-walk
//! entries, between archive entries, between transfer pairs. Cancellation
//! flushes and closes whatever is open; partial files stay on disk for
//! the caller to reap.

use crate::errors::{BagError, BagResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Returns `Err(Cancelled)` once [`CancelToken::cancel`] has been
    /// observed.
    pub fn checkpoint(&self) -> BagResult<()> {
        if self.is_cancelled() {
            Err(BagError::Cancelled)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkpoint_reflects_state() {
        let token = CancelToken::new();
        assert!(token.checkpoint().is_ok());

        let clone = token.clone();
        clone.cancel();
        assert!(token.is_cancelled());
        assert!(matches!(token.checkpoint(), Err(BagError::Cancelled)));
    }
}
