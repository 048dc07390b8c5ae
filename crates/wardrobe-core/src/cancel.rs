//! Cooperative cancellation for migration runs.
//!
//! The orchestrator checks the token before starting each entity; work that
//! already started runs to completion so the ID mapping never loses a
//! remote record that was actually created.

use crate::{Result, WardrobeError};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared cancellation flag. Clones observe the same state.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Entities not yet started will not be attempted.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// `Err(WardrobeError::Cancelled)` once cancellation was requested.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(WardrobeError::Cancelled)
        } else {
            Ok(())
        }
    }
}
