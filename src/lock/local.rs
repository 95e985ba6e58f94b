use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use super::{AdvisoryLock, LockHandle};
use crate::errors::LockError;

/// Single-process lock with the same contract as [`super::MarkerFileLock`].
///
/// Holds no filesystem state, so it cannot go stale; the wait budget still
/// applies.
#[derive(Debug)]
pub struct InProcessLock {
    name: PathBuf,
    wait_budget: Duration,
    holder: Mutex<Option<String>>,
    freed: Condvar,
}

impl InProcessLock {
    pub fn new(name: impl Into<PathBuf>, wait_budget: Duration) -> Self {
        Self {
            name: name.into(),
            wait_budget,
            holder: Mutex::new(None),
            freed: Condvar::new(),
        }
    }
}

impl AdvisoryLock for InProcessLock {
    fn acquire(&self) -> Result<LockHandle, LockError> {
        let started = Instant::now();
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());

        while holder.is_some() {
            let waited = started.elapsed();
            if waited >= self.wait_budget {
                return Err(LockError::Contention {
                    path: self.name.clone(),
                    waited,
                });
            }
            let (guard, _) = self
                .freed
                .wait_timeout(holder, self.wait_budget - waited)
                .unwrap_or_else(|e| e.into_inner());
            holder = guard;
        }

        let handle = LockHandle::new(self.name.clone());
        *holder = Some(handle.token.clone());
        Ok(handle)
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let mut holder = self.holder.lock().unwrap_or_else(|e| e.into_inner());
        if holder.as_deref() == Some(handle.token.as_str()) {
            *holder = None;
            self.freed.notify_one();
        }
        Ok(())
    }
}
