use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use std::time::Duration;

use uuid::Uuid;

use super::store::{list_json_ids, read_json, remove_if_exists, remove_json_older_than, write_json_atomic};
use super::types::JobCheckpoint;
use super::StoreError;

/// Durable checkpoints, one per job, overwritten on each save.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), StoreError>;
    fn load(&self, job_id: &Uuid) -> Result<Option<JobCheckpoint>, StoreError>;
    fn delete(&self, job_id: &Uuid) -> Result<bool, StoreError>;
    fn list(&self) -> Result<Vec<Uuid>, StoreError>;
}

#[derive(Default)]
pub struct MemoryCheckpointStore {
    checkpoints: RwLock<HashMap<Uuid, JobCheckpoint>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), StoreError> {
        let mut map = self.checkpoints.write().map_err(|_| StoreError::LockPoisoned)?;
        map.insert(checkpoint.job_id, checkpoint.clone());
        Ok(())
    }

    fn load(&self, job_id: &Uuid) -> Result<Option<JobCheckpoint>, StoreError> {
        let map = self.checkpoints.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.get(job_id).cloned())
    }

    fn delete(&self, job_id: &Uuid) -> Result<bool, StoreError> {
        let mut map = self.checkpoints.write().map_err(|_| StoreError::LockPoisoned)?;
        Ok(map.remove(job_id).is_some())
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        let map = self.checkpoints.read().map_err(|_| StoreError::LockPoisoned)?;
        let mut ids: Vec<Uuid> = map.keys().copied().collect();
        ids.sort();
        Ok(ids)
    }
}

/// `<job-id>.json` files under a checkpoint directory.
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn open_default() -> Result<Self, StoreError> {
        Self::new(crate::config::checkpoints_dir())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, job_id: &Uuid) -> PathBuf {
        self.dir.join(format!("{job_id}.json"))
    }

    /// Delete checkpoints not rewritten for at least `age`, i.e. those of
    /// jobs abandoned long ago.
    pub fn cleanup_older_than(&self, age: Duration) -> Result<usize, StoreError> {
        let removed = remove_json_older_than(&self.dir, age)?;
        tracing::info!(removed, dir = %self.dir.display(), "Checkpoint cleanup finished");
        Ok(removed)
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &JobCheckpoint) -> Result<(), StoreError> {
        write_json_atomic(&self.path(&checkpoint.job_id), checkpoint)?;
        tracing::debug!(
            job_id = %checkpoint.job_id,
            last_row = ?checkpoint.last_processed_row,
            "Checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, job_id: &Uuid) -> Result<Option<JobCheckpoint>, StoreError> {
        read_json(&self.path(job_id))
    }

    fn delete(&self, job_id: &Uuid) -> Result<bool, StoreError> {
        remove_if_exists(&self.path(job_id))
    }

    fn list(&self) -> Result<Vec<Uuid>, StoreError> {
        list_json_ids(&self.dir)
    }
}
