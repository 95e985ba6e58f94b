//! Shared, lock-protected index of projects in a workspace.
//!
//! Several autopilot processes may touch `projects.json` at once, so every
//! mutation is a read-modify-write inside the workspace lock.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::debug;

use crate::lock::{AdvisoryLock, with_lock};
use crate::store;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectEntry {
    pub name: String,
    pub registered_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_campaign_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct IndexFile {
    #[serde(default)]
    projects: Vec<ProjectEntry>,
}

pub struct ProjectIndex {
    path: PathBuf,
    lock: Arc<dyn AdvisoryLock>,
}

impl ProjectIndex {
    pub fn new(path: PathBuf, lock: Arc<dyn AdvisoryLock>) -> Self {
        Self { path, lock }
    }

    pub fn list(&self) -> Vec<ProjectEntry> {
        store::read_json_or_default::<IndexFile>(&self.path).projects
    }

    /// Add a project if absent. Returns true if it was newly registered.
    pub fn register(&self, name: &str) -> Result<bool> {
        self.update(|index| {
            if index.projects.iter().any(|p| p.name == name) {
                return false;
            }
            index.projects.push(ProjectEntry {
                name: name.to_string(),
                registered_at: Utc::now(),
                last_campaign_at: None,
            });
            index.projects.sort_by(|a, b| a.name.cmp(&b.name));
            true
        })
    }

    /// Record that a campaign started for `name`, registering it if needed.
    pub fn touch(&self, name: &str) -> Result<()> {
        self.update(|index| {
            let now = Utc::now();
            match index.projects.iter_mut().find(|p| p.name == name) {
                Some(entry) => entry.last_campaign_at = Some(now),
                None => {
                    index.projects.push(ProjectEntry {
                        name: name.to_string(),
                        registered_at: now,
                        last_campaign_at: Some(now),
                    });
                    index.projects.sort_by(|a, b| a.name.cmp(&b.name));
                }
            }
        })
    }

    fn update<T>(&self, f: impl FnOnce(&mut IndexFile) -> T) -> Result<T> {
        with_lock(self.lock.as_ref(), || {
            let mut index: IndexFile = store::read_json_or_default(&self.path);
            let out = f(&mut index);
            store::write_json_atomic(&self.path, &index)?;
            debug!(path = %self.path.display(), projects = index.projects.len(), "Project index updated");
            Ok(out)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lock::{LockOptions, MarkerFileLock};
    use std::time::Duration;
    use tempfile::tempdir;

    fn make_index(dir: &std::path::Path) -> ProjectIndex {
        let opts = LockOptions {
            retry_interval: Duration::from_millis(2),
            ..LockOptions::default()
        };
        ProjectIndex::new(
            dir.join("projects.json"),
            Arc::new(MarkerFileLock::new(dir.join("projects.json.lock"), opts)),
        )
    }

    #[test]
    fn test_register_is_idempotent() {
        let dir = tempdir().unwrap();
        let index = make_index(dir.path());
        assert!(index.register("shop").unwrap());
        assert!(!index.register("shop").unwrap());
        assert_eq!(index.list().len(), 1);
        assert!(!dir.path().join("projects.json.lock").exists());
    }

    #[test]
    fn test_touch_registers_and_stamps() {
        let dir = tempdir().unwrap();
        let index = make_index(dir.path());
        index.register("b").unwrap();
        index.touch("a").unwrap();
        index.touch("b").unwrap();

        let entries = index.list();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].name, "a");
        assert!(entries.iter().all(|e| e.last_campaign_at.is_some()));
    }

    #[test]
    fn test_concurrent_registrations_are_not_lost() {
        let dir = tempdir().unwrap();
        let root = dir.path().to_path_buf();
        let workers: Vec<_> = (0..6)
            .map(|i| {
                let root = root.clone();
                std::thread::spawn(move || {
                    make_index(&root).register(&format!("project-{i}")).unwrap();
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(make_index(dir.path()).list().len(), 6);
    }

    #[test]
    fn test_corrupt_index_degrades_to_empty() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("projects.json"), "[[[").unwrap();
        let index = make_index(dir.path());
        assert!(index.list().is_empty());
        index.register("fresh").unwrap();
        assert_eq!(index.list().len(), 1);
    }
}
