//! Single-flight bookkeeping for full sweeps.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScanStatus {
    pub in_progress: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_result_count: Option<usize>,
}

/// Shared sweep status. At most one [`ScanGuard`] exists at a time.
#[derive(Debug, Default)]
pub struct ScanState {
    status: Mutex<ScanStatus>,
}

impl ScanState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn status(&self) -> ScanStatus {
        self.status.lock().clone()
    }

    pub fn is_in_progress(&self) -> bool {
        self.status.lock().in_progress
    }

    /// Mark a sweep as running, or fail with [`Error::ScanInProgress`].
    /// Check and set happen under one lock.
    pub fn try_begin(self: &Arc<Self>) -> Result<ScanGuard> {
        let mut status = self.status.lock();
        if status.in_progress {
            return Err(Error::ScanInProgress);
        }
        status.in_progress = true;
        Ok(ScanGuard {
            state: Arc::clone(self),
        })
    }
}

/// Holds the in-progress flag. Dropping the guard clears it on every exit
/// path; only [`ScanGuard::complete`] records a result.
#[derive(Debug)]
pub struct ScanGuard {
    state: Arc<ScanState>,
}

impl ScanGuard {
    pub fn complete(self, result_count: usize) {
        let mut status = self.state.status.lock();
        status.last_run_at = Some(Utc::now());
        status.last_result_count = Some(result_count);
    }
}

impl Drop for ScanGuard {
    fn drop(&mut self) {
        self.state.status.lock().in_progress = false;
    }
}
