//! Checkpoint manifest for training runs.

use crate::error::TrainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// One saved training state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub id: String,
    pub epoch: usize,
    #[serde(with = "tonet_core::float::scalar")]
    pub val_loss: f64,
    pub weights_path: PathBuf,
    pub optimizer_path: PathBuf,
    /// SHA-256 of the weights file.
    pub hash: String,
    pub size_bytes: u64,
    pub created_at: DateTime<Utc>,
}

/// Keeps `checkpoints.json` next to the saved states.
pub struct CheckpointManager {
    base_dir: PathBuf,
    max_checkpoints: usize,
}

impl CheckpointManager {
    pub fn new(base_dir: PathBuf, max_checkpoints: usize) -> Self {
        Self {
            base_dir,
            max_checkpoints: max_checkpoints.max(1),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn manifest_path(&self) -> PathBuf {
        self.base_dir.join("checkpoints.json")
    }

    /// Weights and optimizer file locations for `epoch`.
    pub fn paths_for(&self, epoch: usize) -> (PathBuf, PathBuf) {
        (
            self.base_dir.join(format!("epoch-{epoch:04}-weights.json")),
            self.base_dir.join(format!("epoch-{epoch:04}-optimizer.json")),
        )
    }

    pub fn list(&self) -> Result<Vec<CheckpointEntry>, TrainError> {
        Ok(tonet_core::persistence::load_json(&self.manifest_path())?.unwrap_or_default())
    }

    /// Lowest validation loss.
    pub fn best(&self) -> Result<Option<CheckpointEntry>, TrainError> {
        Ok(self
            .list()?
            .into_iter()
            .min_by(|a, b| a.val_loss.total_cmp(&b.val_loss)))
    }

    pub fn latest(&self) -> Result<Option<CheckpointEntry>, TrainError> {
        Ok(self.list()?.into_iter().max_by_key(|c| c.epoch))
    }

    /// Record files already written for `epoch`, evicting the oldest entries
    /// (and their files) beyond `max_checkpoints`.
    pub fn record(
        &self,
        epoch: usize,
        val_loss: f64,
        weights_path: &Path,
        optimizer_path: &Path,
    ) -> Result<CheckpointEntry, TrainError> {
        if !weights_path.is_file() {
            return Err(TrainError::MissingFile(weights_path.to_path_buf()));
        }
        let bytes = std::fs::read(weights_path)?;
        let hash = format!("{:x}", Sha256::digest(&bytes));

        let entry = CheckpointEntry {
            id: uuid::Uuid::new_v4().to_string(),
            epoch,
            val_loss,
            weights_path: weights_path.to_path_buf(),
            optimizer_path: optimizer_path.to_path_buf(),
            hash,
            size_bytes: bytes.len() as u64,
            created_at: Utc::now(),
        };

        let mut entries = self.list()?;
        entries.retain(|c| c.epoch != epoch);
        entries.push(entry.clone());

        while entries.len() > self.max_checkpoints {
            let evicted = entries.remove(0);
            for path in [&evicted.weights_path, &evicted.optimizer_path] {
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
            }
            tracing::debug!(epoch = evicted.epoch, "Evicted old checkpoint");
        }

        tonet_core::persistence::atomic_write_json(&self.manifest_path(), &entries)?;
        tracing::info!(epoch, val_loss, path = %weights_path.display(), "Checkpoint recorded");
        Ok(entry)
    }

    /// Check that the weights file still matches its recorded hash.
    pub fn verify(&self, entry: &CheckpointEntry) -> Result<bool, TrainError> {
        if !entry.weights_path.is_file() {
            return Err(TrainError::MissingFile(entry.weights_path.clone()));
        }
        let bytes = std::fs::read(&entry.weights_path)?;
        Ok(format!("{:x}", Sha256::digest(&bytes)) == entry.hash)
    }
}
