//! Weight lifecycle: bringing a freshly built backbone into a trainable state.
//!
//! The start mode is chosen once, when the manager is created:
//!
//! - `Begin` keeps the random initialization and the original head.
//! - `PretrainedRemote` resolves the architecture in the registry, downloads
//!   the file into the cache directory unless it is already there, loads it
//!   strictly into the unmodified backbone, then resizes the head and wraps the
//!   model for replication.
//! - `CustomCheckpoint` resizes the head and wraps first, then merges the
//!   checkpoint by key intersection.

use crate::error::TrainError;
use crate::model::{
    Backbone, Checkpoint, MergeReport, load_strict, merge_intersecting, replicate_in_place,
};
use crate::zoo::download::WeightFetcher;
use crate::zoo::registry::{WeightRegistry, cache_file_name};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tonet_core::{StartFrom, TrainingConfig, WorkDir};

/// Where the initial parameters come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartMode {
    Begin,
    PretrainedRemote { cache_dir: PathBuf },
    CustomCheckpoint { path: PathBuf },
}

impl StartMode {
    pub fn from_config(config: &TrainingConfig, workdir: &WorkDir) -> Self {
        match config.start_from {
            StartFrom::Begin => Self::Begin,
            StartFrom::Url => Self::PretrainedRemote {
                cache_dir: workdir.weights_dir(),
            },
            StartFrom::Continue => Self::CustomCheckpoint {
                path: config
                    .checkpoint_path
                    .clone()
                    .unwrap_or_else(|| workdir.weights_file()),
            },
        }
    }
}

/// Collaborators and sizes the manager needs besides the backbone.
#[derive(Clone)]
pub struct WeightSettings {
    pub architecture: String,
    pub num_classes: usize,
    pub replicas: usize,
    pub registry: Arc<dyn WeightRegistry>,
    pub fetcher: Arc<dyn WeightFetcher>,
}

/// Owns the live backbone for the lifetime of a training run.
pub struct WeightLifecycleManager {
    model: Box<dyn Backbone>,
    mode: StartMode,
    settings: WeightSettings,
    adapted: bool,
}

impl WeightLifecycleManager {
    /// Take ownership of `model` and apply `mode`.
    pub async fn create(
        model: Box<dyn Backbone>,
        mode: StartMode,
        settings: WeightSettings,
    ) -> Result<Self, TrainError> {
        let mut manager = Self {
            model,
            mode: mode.clone(),
            settings,
            adapted: false,
        };

        match &mode {
            StartMode::Begin => {
                tracing::info!(
                    architecture = %manager.settings.architecture,
                    "Starting from random initialization"
                );
            }
            StartMode::PretrainedRemote { cache_dir } => {
                let path = manager.pretrained_cache_path(cache_dir)?;
                manager.load_weights(&path, true).await?;
            }
            StartMode::CustomCheckpoint { path } => {
                manager.load_weights(path, false).await?;
            }
        }
        Ok(manager)
    }

    /// Cache location for the architecture's pretrained file inside `cache_dir`.
    pub fn pretrained_cache_path(&self, cache_dir: &Path) -> Result<PathBuf, TrainError> {
        let url = self.resolve_url()?;
        Ok(cache_dir.join(cache_file_name(&url)?))
    }

    /// Load weights into the live model.
    ///
    /// With `remote_pretrained`, `path` is the cache file for the registry
    /// download: it is fetched when absent, loaded strictly, and the model is
    /// adapted afterwards. Otherwise `path` is an adapted checkpoint merged by
    /// key intersection after adaptation.
    pub async fn load_weights(
        &mut self,
        path: &Path,
        remote_pretrained: bool,
    ) -> Result<(), TrainError> {
        if self.mode == StartMode::Begin {
            return Err(TrainError::config(
                "start mode 'begin' keeps random initialization; weights are never loaded",
            ));
        }

        if remote_pretrained {
            if self.adapted {
                return Err(TrainError::config(
                    "pretrained weights target the unmodified backbone, but the head was already replaced",
                ));
            }
            self.ensure_cached(path).await?;
            let checkpoint = Checkpoint::load(path)?;
            load_strict(self.model.as_mut(), &checkpoint)?;
            tracing::info!(path = %path.display(), keys = checkpoint.len(), "Loaded pretrained weights");
            self.adapt();
        } else {
            let checkpoint = Checkpoint::load(path)?;
            self.adapt();
            let MergeReport { applied, skipped } =
                merge_intersecting(self.model.as_mut(), &checkpoint)?;
            tracing::info!(
                path = %path.display(),
                applied = applied.len(),
                skipped = skipped.len(),
                "Merged checkpoint into adapted model"
            );
        }
        Ok(())
    }

    /// Serialize the full current parameter mapping.
    pub fn save_weights(&self, path: &Path) -> Result<(), TrainError> {
        let state = self.model.state_dict();
        state.save(path)?;
        tracing::info!(path = %path.display(), keys = state.len(), "Saved weights");
        Ok(())
    }

    pub fn model(&self) -> &dyn Backbone {
        self.model.as_ref()
    }

    pub fn model_mut(&mut self) -> &mut dyn Backbone {
        self.model.as_mut()
    }

    pub fn start_mode(&self) -> &StartMode {
        &self.mode
    }

    /// Whether the head has been resized and the model wrapped.
    pub fn is_adapted(&self) -> bool {
        self.adapted
    }

    fn resolve_url(&self) -> Result<String, TrainError> {
        self.settings
            .registry
            .resolve(&self.settings.architecture)
            .ok_or_else(|| {
                TrainError::config(format!(
                    "no pretrained weights registered for architecture '{}'",
                    self.settings.architecture
                ))
            })
    }

    async fn ensure_cached(&self, path: &Path) -> Result<(), TrainError> {
        if path.is_file() {
            tracing::debug!(path = %path.display(), "Pretrained weights already cached");
            return Ok(());
        }
        let url = self.resolve_url()?;
        let bytes = self.settings.fetcher.fetch(&url).await?;
        tonet_core::persistence::atomic_write(path, &bytes)?;
        tracing::info!(path = %path.display(), size_bytes = bytes.len(), "Cached pretrained weights");
        Ok(())
    }

    fn adapt(&mut self) {
        if self.adapted {
            return;
        }
        self.model.replace_head(self.settings.num_classes);
        replicate_in_place(&mut self.model, self.settings.replicas);
        self.adapted = true;
        tracing::debug!(
            num_classes = self.settings.num_classes,
            replicas = self.settings.replicas,
            "Head replaced and model wrapped for replication"
        );
    }
}
