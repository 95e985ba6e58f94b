//! Advisory locking over shared workspace state.
//!
//! Two implementations sit behind [`AdvisoryLock`]:
//!
//! | Type             | Scope                        | Mechanism                                  |
//! |------------------|------------------------------|--------------------------------------------|
//! | `MarkerFileLock` | processes on one machine     | create-only marker file, time-based breaking |
//! | `InProcessLock`  | threads in a single process  | `Mutex` + `Condvar`                        |
//!
//! `MarkerFileLock` is a spinlock with time-based ownership recovery, not a
//! leasing protocol. A holder that stalls longer than the staleness threshold
//! can have its lock broken underneath it, and staleness is judged from the
//! marker's modification time, so all contenders must share one clock. It
//! is not safe across machines or on network filesystems with skewed clocks.
//!
//! Breaking a stale marker is a stat followed by an unlink, not an atomic
//! compare-and-delete. Two contenders can both judge the same marker stale;
//! if one breaks it and creates its own marker before the other unlinks,
//! the second removes a live marker and both end up holding the lock. The
//! window is one stat-to-unlink gap and only opens after a holder has
//! already exceeded the staleness threshold.

mod local;
mod marker;

pub use local::InProcessLock;
pub use marker::MarkerFileLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

use crate::errors::LockError;

/// Tuning for lock acquisition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockOptions {
    /// A marker older than this is assumed abandoned and broken.
    pub stale_after: Duration,
    /// Back-off between contended attempts.
    pub retry_interval: Duration,
    /// Total time to keep retrying before reporting contention.
    pub wait_budget: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            stale_after: Duration::from_secs(30),
            retry_interval: Duration::from_millis(50),
            wait_budget: Duration::from_secs(5),
        }
    }
}

/// Proof of a successful acquisition. Hand it back to `release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockHandle {
    pub path: PathBuf,
    /// Unique per acquisition; release is refused for any other token.
    pub token: String,
    pub pid: u32,
    pub acquired_at: DateTime<Utc>,
}

impl LockHandle {
    pub(crate) fn new(path: PathBuf) -> Self {
        Self {
            path,
            token: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            acquired_at: Utc::now(),
        }
    }
}

/// Mutual exclusion that only binds participants who honor it.
pub trait AdvisoryLock: Send + Sync {
    fn acquire(&self) -> Result<LockHandle, LockError>;

    /// Release a held lock. A no-op if the lock is gone or was reassigned.
    fn release(&self, handle: LockHandle) -> Result<(), LockError>;
}

/// Run `f` while holding `lock`, releasing on every path.
pub fn with_lock<T, F>(lock: &dyn AdvisoryLock, f: F) -> anyhow::Result<T>
where
    F: FnOnce() -> anyhow::Result<T>,
{
    let handle = lock.acquire()?;
    let path = handle.path.clone();
    let result = f();
    if let Err(e) = lock.release(handle) {
        warn!(path = %path.display(), error = %e, "Failed to release lock");
    }
    result
}
