use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::process;
use std::thread;
use std::time::{Duration, Instant};

use crate::models::{Build, DeploymentStatus, Environment, EnvironmentGroup, Release, System};

/// Every collection a local backend serves
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    #[serde(default)]
    pub systems: Vec<System>,
    #[serde(default)]
    pub releases: Vec<Release>,
    #[serde(default)]
    pub builds: Vec<Build>,
    #[serde(default)]
    pub environments: Vec<Environment>,
    #[serde(default)]
    pub environment_groups: Vec<EnvironmentGroup>,
    #[serde(default)]
    pub deployments: Vec<DeploymentRecord>,
}

/// One system deployed in one environment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DeploymentRecord {
    pub id: String,
    pub environment_id: String,
    pub system_id: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub status: DeploymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Clone, Copy)]
enum LockMode {
    Shared,
    Exclusive,
}

/// YAML snapshot file guarded by a sibling `.lock` file, so several CLI
/// processes can share one local inventory
pub struct SnapshotStorage {
    file_path: PathBuf,
    lock_path: PathBuf,
    lock_timeout: Duration,
}

impl SnapshotStorage {
    pub fn new<P: AsRef<Path>>(file_path: P) -> Self {
        let file_path = file_path.as_ref().to_path_buf();
        let lock_path = file_path.with_extension("yaml.lock");
        Self {
            file_path,
            lock_path,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.file_path
    }

    /// Polls for the lock until it is granted or the timeout passes.
    /// The lock is released when the returned handle is dropped.
    fn lock(&self, mode: LockMode) -> Result<File> {
        if let Some(dir) = self.lock_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let handle = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(&self.lock_path)
            .with_context(|| format!("Cannot open lock file {:?}", self.lock_path))?;

        let deadline = Instant::now() + self.lock_timeout;
        loop {
            let attempt = match mode {
                LockMode::Shared => FileExt::try_lock_shared(&handle),
                LockMode::Exclusive => FileExt::try_lock_exclusive(&handle),
            };
            match attempt {
                Ok(()) => return Ok(handle),
                Err(e) if e.kind() == ErrorKind::WouldBlock && Instant::now() < deadline => {
                    thread::sleep(LOCK_POLL_INTERVAL);
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    anyhow::bail!(
                        "Inventory file {:?} is locked by another process",
                        self.file_path
                    );
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Cannot lock {:?}", self.lock_path))
                }
            }
        }
    }

    /// Loads the snapshot; a missing file reads as empty
    pub fn load(&self) -> Result<Snapshot> {
        let _guard = self.lock(LockMode::Shared)?;
        self.read_unlocked()
    }

    /// Replaces the file contents under an exclusive lock
    pub fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let mut guard = self.lock(LockMode::Exclusive)?;
        stamp_holder(&mut guard);
        self.write_unlocked(snapshot)
    }

    /// Reloads, applies `update_fn`, and writes back while holding the lock
    ///
    /// The snapshot is only written when `update_fn` returns true.
    pub fn update_atomically<F>(&self, update_fn: F) -> Result<Snapshot>
    where
        F: FnOnce(&mut Snapshot) -> bool,
    {
        let mut guard = self.lock(LockMode::Exclusive)?;
        stamp_holder(&mut guard);

        let mut snapshot = self.read_unlocked()?;
        if update_fn(&mut snapshot) {
            self.write_unlocked(&snapshot)?;
        }
        Ok(snapshot)
    }

    fn read_unlocked(&self) -> Result<Snapshot> {
        if !self.file_path.exists() {
            return Ok(Snapshot::default());
        }
        let file = File::open(&self.file_path)
            .with_context(|| format!("Cannot open {:?}", self.file_path))?;
        serde_yaml::from_reader(BufReader::new(file))
            .with_context(|| format!("Invalid inventory YAML in {:?}", self.file_path))
    }

    /// Writes to a temp file and renames it over the snapshot, so readers
    /// never see a half-written file
    fn write_unlocked(&self, snapshot: &Snapshot) -> Result<()> {
        if let Some(dir) = self.file_path.parent() {
            fs::create_dir_all(dir)?;
        }
        let yaml = serde_yaml::to_string(snapshot)?;
        let tmp_path = self.file_path.with_extension("yaml.tmp");
        fs::write(&tmp_path, yaml).with_context(|| format!("Cannot write {:?}", tmp_path))?;
        fs::rename(&tmp_path, &self.file_path)
            .with_context(|| format!("Cannot replace {:?}", self.file_path))
    }
}

fn stamp_holder(lock: &mut File) {
    let _ = lock.set_len(0);
    let _ = writeln!(lock, "pid {} since {}", process::id(), Utc::now().to_rfc3339());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SystemType;
    use tempfile::TempDir;

    fn system(id: &str, name: &str) -> System {
        System {
            id: id.into(),
            name: name.into(),
            description: None,
            system_type: SystemType::System,
            status: Default::default(),
            parent_id: None,
            created_at: None,
            updated_at: None,
        }
    }

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("inventory.yaml");
        let storage = SnapshotStorage::new(&path);

        let snapshot = storage.load().unwrap();
        assert!(snapshot.systems.is_empty());
        assert!(!path.exists());

        storage.save(&snapshot).unwrap();
        assert!(path.exists());
        assert!(!path.with_extension("yaml.tmp").exists());
    }

    #[test]
    fn test_held_lock_times_out() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path().join("inventory.yaml"))
            .with_lock_timeout(Duration::from_millis(150));

        let _held = storage.lock(LockMode::Exclusive).unwrap();
        let other = SnapshotStorage::new(storage.path())
            .with_lock_timeout(Duration::from_millis(150));
        let err = other.save(&Snapshot::default()).unwrap_err();
        assert!(err.to_string().contains("locked by another process"));
    }

    #[test]
    fn test_update_atomically_skips_write_when_rejected() {
        let dir = TempDir::new().unwrap();
        let storage = SnapshotStorage::new(dir.path().join("inventory.yaml"));

        storage
            .update_atomically(|s| {
                s.systems.push(system("s1", "Core"));
                true
            })
            .unwrap();
        storage
            .update_atomically(|s| {
                s.systems.push(system("s2", "Discarded"));
                false
            })
            .unwrap();

        let loaded = storage.load().unwrap();
        assert_eq!(loaded.systems.len(), 1);
        assert_eq!(loaded.systems[0].name, "Core");
    }
}
