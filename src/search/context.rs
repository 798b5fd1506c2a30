use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::core::error::{Error, Result};

/// Deadline and cancellation token carried by one query.
///
/// Executors call [`SearchContext::checkpoint`] at leaf-set boundaries:
/// after each term expansion, between posting-list merges and between
/// scoring chunks.
#[derive(Clone)]
pub struct SearchContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl SearchContext {
    pub fn new(deadline: Option<Instant>) -> Self {
        SearchContext {
            deadline,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn unbounded() -> Self {
        SearchContext::new(None)
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    pub fn checkpoint(&self) -> Result<()> {
        if self.cancelled.load(Ordering::Relaxed) {
            return Err(Error::Cancelled("query cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::Cancelled("query deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}
