use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{AdvisoryLock, LockHandle, LockOptions};
use crate::errors::LockError;

/// Contents of a lock marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct Marker {
    pid: u32,
    token: String,
    created_at: chrono::DateTime<chrono::Utc>,
}

/// Cross-process lock backed by an exclusively-created marker file.
#[derive(Debug, Clone)]
pub struct MarkerFileLock {
    path: PathBuf,
    options: LockOptions,
}

impl MarkerFileLock {
    pub fn new(path: PathBuf, options: LockOptions) -> Self {
        Self { path, options }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> LockError {
        LockError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn try_create(&self, handle: &LockHandle) -> std::io::Result<()> {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)?;
        let marker = Marker {
            pid: handle.pid,
            token: handle.token.clone(),
            created_at: handle.acquired_at,
        };
        let json = serde_json::to_vec(&marker)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        file.write_all(&json)?;
        file.sync_all()
    }

    /// Age of the current marker, or `None` if it vanished in the meantime.
    fn marker_age(&self) -> Option<Duration> {
        let modified = fs::metadata(&self.path).and_then(|m| m.modified()).ok()?;
        Some(
            SystemTime::now()
                .duration_since(modified)
                .unwrap_or(Duration::ZERO),
        )
    }

    fn read_marker(&self) -> std::io::Result<Option<Marker>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content).ok()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

impl AdvisoryLock for MarkerFileLock {
    fn acquire(&self) -> Result<LockHandle, LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }

        let started = Instant::now();
        let handle = LockHandle::new(self.path.clone());

        loop {
            match self.try_create(&handle) {
                Ok(()) => {
                    debug!(path = %self.path.display(), "Lock acquired");
                    return Ok(handle);
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(e) => return Err(self.io_error(e)),
            }

            match self.marker_age() {
                // Released between our attempt and the stat; retry at once.
                None => continue,
                // Not atomic with the stat above; see the module docs.
                Some(age) if age > self.options.stale_after => {
                    warn!(
                        path = %self.path.display(),
                        age_ms = age.as_millis() as u64,
                        "Breaking stale lock marker"
                    );
                    match fs::remove_file(&self.path) {
                        Ok(()) => continue,
                        Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                        Err(e) => return Err(self.io_error(e)),
                    }
                }
                Some(_) => {}
            }

            let waited = started.elapsed();
            if waited >= self.options.wait_budget {
                return Err(LockError::Contention {
                    path: self.path.clone(),
                    waited,
                });
            }
            std::thread::sleep(self.options.retry_interval);
        }
    }

    fn release(&self, handle: LockHandle) -> Result<(), LockError> {
        let marker = match self.read_marker().map_err(|e| self.io_error(e))? {
            Some(marker) => marker,
            None => {
                debug!(path = %self.path.display(), "Release skipped: no readable marker");
                return Ok(());
            }
        };

        if marker.token != handle.token {
            warn!(
                path = %self.path.display(),
                holder_pid = marker.pid,
                "Release skipped: lock was reassigned after a stale break"
            );
            return Ok(());
        }

        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(self.io_error(e)),
        }
    }
}
