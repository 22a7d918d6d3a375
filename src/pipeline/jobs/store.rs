use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::{Duration, SystemTime};

use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use super::types::Job;
use super::StoreError;

/// Job metadata keyed by job id.
///
/// Owned by whoever runs jobs and injected where needed; the orchestrator
/// itself only mutates the `Job` it was handed.
pub trait JobStore: Send + Sync {
    fn get(&self, id: &Uuid) -> Result<Option<Job>, StoreError>;
    fn set(&self, job: &Job) -> Result<(), StoreError>;
    /// Returns whether a job was removed.
    fn delete(&self, id: &Uuid) -> Result<bool, StoreError>;
    fn list(&self) -> Result<Vec<Uuid>, StoreError>;
}

// ═══════════════════════════════════════════
// In-memory store
// ═══════════════════════════════════════════

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<Uuid, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn get(&self, id: &Uuid) -> Result<Option<Job>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(jobs.get(id).cloned())
    }

    fn set(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        jobs.insert(job.id, job.clone());
        Ok(())
    }

    fn delete(&self, id: &Uuid) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(jobs.remove(id).is_some())
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let jobs = self.jobs.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut ids: Vec<Uuid> = jobs.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

// ═══════════════════════════════════════════
// File store
// ═══════════════════════════════════════════

/// Write `value` as JSON to `path` via a temp file in the same directory,
/// so readers never see a partial file.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, value)?;
    tmp.flush()?;
    tmp.persist(path).map_err(|e| StoreError::Persist {
        path: path.display().to_string(),
        reason: e.error.to_string(),
    })?;
    Ok(())
}

pub(crate) fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StoreError> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> Result<bool, StoreError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Ids of `<uuid>.json` files in `dir`, sorted.
pub(crate) fn list_json_ids(dir: &Path) -> Result<Vec<Uuid>, StoreError> {
    if !dir.exists() {
        return Ok(Vec::new());
    }
    let mut ids = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        if let Some(id) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| Uuid::parse_str(s).ok())
        {
            ids.push(id);
        }
    }
    ids.sort();
    Ok(ids)
}

/// Remove `<uuid>.json` files in `dir` last modified at least `age` ago.
/// Returns how many were removed.
pub(crate) fn remove_json_older_than(dir: &Path, age: Duration) -> Result<usize, StoreError> {
    let Some(cutoff) = SystemTime::now().checked_sub(age) else {
        return Ok(0);
    };
    let mut removed = 0;
    for id in list_json_ids(dir)? {
        let path = dir.join(format!("{id}.json"));
        let modified = match std::fs::metadata(&path) {
            Ok(meta) => meta.modified()?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        if modified <= cutoff && remove_if_exists(&path)? {
            removed += 1;
        }
    }
    Ok(removed)
}

/// One `<job-id>.json` file per job.
pub struct FileJobStore {
    dir: PathBuf,
}

impl FileJobStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Store under the application data directory.
    pub fn open_default() -> Result<Self, StoreError> {
        Self::new(crate::config::jobs_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, id: &Uuid) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Delete job records untouched for at least `age`.
    pub fn cleanup_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        let removed = remove_json_older_than(&self.dir, age)?;
        if removed > 0 {
            tracing::info!(removed, dir = %self.dir.display(), "Removed stale job records");
        }
        Ok(removed)
    }
}

impl JobStore for FileJobStore {
    fn get(&self, id: &Uuid) -> Result<Option<Job>, StoreError> {
        read_json(&self.path(id))
    }

    fn set(&self, job: &Job) -> Result<(), StoreError> {
        write_json_atomic(&self.path(&job.id), job)
    }

    fn delete(&self, id: &Uuid) -> Result<bool, StoreError> {
        remove_if_exists(&self.path(id))
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        list_json_ids(&self.dir)
    }
}
