//! Request-scoped cancellation.
//!
//! Every operation accepts a [`CancelToken`] threaded from the RPC layer. The
//! token combines the server shutdown flag with the per-request deadline: the
//! pagination engine polls it between scan batches, mutation handlers poll it
//! before committing. Cancellation observed after a commit point has no
//! effect; the write has already happened.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::error::ApiError;

#[derive(Clone, Debug, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelToken {
    /// A token that never fires; useful for tests and offline tooling.
    pub fn never() -> Self {
        Self::default()
    }

    /// A token wired to an externally owned flag (e.g. server shutdown).
    pub fn from_flag(flag: Arc<AtomicBool>) -> Self {
        Self {
            flag,
            deadline: None,
        }
    }

    /// Returns a copy that additionally expires at `deadline`.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        Self {
            flag: self.flag.clone(),
            deadline: Some(deadline),
        }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.flag.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// Errors with the cancelled kind when the token has fired.
    pub fn check(&self, context: &'static str) -> Result<(), ApiError> {
        if self.is_cancelled() {
            Err(ApiError::Cancelled { context })
        } else {
            Ok(())
        }
    }
}
