//! Cooperative cancellation
//!
//! Detectors poll the token at group boundaries (and every
//! `CANCEL_POLL_INTERVAL` packets while grouping).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::types::DetectionError;

/// Packets scanned between two polls during a grouping pass
pub const CANCEL_POLL_INTERVAL: usize = 4096;

#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    flag: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Visible to every clone of this token
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<(), DetectionError> {
        if self.is_cancelled() {
            Err(DetectionError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Cheap poll for hot loops: only checks every `CANCEL_POLL_INTERVAL` items
    pub fn poll(&self, position: usize) -> Result<(), DetectionError> {
        if position % CANCEL_POLL_INTERVAL == 0 {
            self.check()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_is_shared_between_clones() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());

        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(DetectionError::Cancelled));
    }

    #[test]
    fn test_poll_only_checks_on_interval() {
        let token = CancellationToken::new();
        token.cancel();
        assert!(token.poll(1).is_ok());
        assert!(token.poll(0).is_err());
        assert!(token.poll(CANCEL_POLL_INTERVAL * 3).is_err());
    }
}
