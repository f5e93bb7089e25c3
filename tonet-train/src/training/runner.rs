//! Epoch orchestration.
//!
//! Each epoch runs a fixed sequence: train pass, validation pass, learning-rate
//! update, monitor report, metrics reset. The optimizer is rebuilt with the
//! new rate after every epoch; unless `keep_optimizer_state` is set its
//! momentum/moment buffers start empty again.
//!
//! The accumulator is reset as soon as the epoch's metrics are taken from it.
//! The next schedule state and optimizer are computed first and only replace
//! the live ones once the monitor has accepted the report, so a failed report
//! leaves the trainer ready to run the same epoch again.

use crate::error::TrainError;
use crate::model::{Backbone, BackboneFactory, Checkpoint, Tensor};
use crate::training::batch::{BatchSource, check_leading_dim};
use crate::training::checkpoint::{CheckpointEntry, CheckpointManager};
use crate::training::loss::CrossEntropyLoss;
use crate::training::metrics::{EpochMetrics, MetricsAccumulator, Split};
use crate::training::monitor::{MetricsHistory, Monitor};
use crate::training::optim::{Optimizer, OptimizerSettings, OptimizerState, build_optimizer};
use crate::training::schedule::{LearningRateScheduler, next_rate};
use crate::zoo::download::{HttpFetcher, WeightFetcher};
use crate::zoo::registry::{StaticRegistry, WeightRegistry};
use crate::zoo::weights::{StartMode, WeightLifecycleManager, WeightSettings};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use tonet_core::{TrainingConfig, WorkDir};

/// Metric the schedule tracks.
const TRACKED_METRIC: &str = "val_loss";

/// Weights and optimizer state, as returned by [`Trainer::state`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub weights: Checkpoint,
    pub optimizer: OptimizerState,
}

/// Drives training of one backbone.
pub struct Trainer<M: Monitor = MetricsHistory> {
    weights: WeightLifecycleManager,
    scheduler: LearningRateScheduler,
    optimizer_settings: OptimizerSettings,
    optimizer: Box<dyn Optimizer>,
    keep_optimizer_state: bool,
    criterion: CrossEntropyLoss,
    metrics: MetricsAccumulator,
    monitor: M,
    workdir: WorkDir,
    checkpoints: CheckpointManager,
    checkpoint_every: usize,
}

impl Trainer<MetricsHistory> {
    /// Build everything from configuration: registry from `weight_urls`, HTTP
    /// fetching, and a metrics history persisted in the working directory.
    pub async fn from_config(
        config: &TrainingConfig,
        backbone: Box<dyn Backbone>,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let workdir = WorkDir::new(&config.workdir_path);
        workdir.ensure()?;
        let monitor = MetricsHistory::open(&workdir.monitor_file())?;
        let registry = Arc::new(StaticRegistry::new(config.weight_urls.clone()));
        Self::with_collaborators(config, backbone, registry, Arc::new(HttpFetcher::new()), monitor)
            .await
    }

    /// Like [`Trainer::from_config`], building the backbone for `config.architecture`.
    pub async fn from_factory(
        config: &TrainingConfig,
        factory: &dyn BackboneFactory,
    ) -> Result<Self, TrainError> {
        let backbone = factory.build(&config.architecture)?;
        Self::from_config(config, backbone).await
    }
}

impl<M: Monitor> Trainer<M> {
    /// Build with injected registry, fetcher and monitor.
    pub async fn with_collaborators(
        config: &TrainingConfig,
        backbone: Box<dyn Backbone>,
        registry: Arc<dyn WeightRegistry>,
        fetcher: Arc<dyn WeightFetcher>,
        monitor: M,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let workdir = WorkDir::new(&config.workdir_path);
        let settings = WeightSettings {
            architecture: config.architecture.clone(),
            num_classes: config.num_classes,
            replicas: 1,
            registry,
            fetcher,
        };
        let mode = StartMode::from_config(config, &workdir);
        let weights = WeightLifecycleManager::create(backbone, mode, settings).await?;
        Self::new(config, weights, monitor)
    }

    /// Assemble a trainer around an already prepared weight manager.
    pub fn new(
        config: &TrainingConfig,
        weights: WeightLifecycleManager,
        monitor: M,
    ) -> Result<Self, TrainError> {
        config.validate()?;
        let workdir = WorkDir::new(&config.workdir_path);

        let mut scheduler = LearningRateScheduler::new(&config.learning_rate);
        let rate = scheduler.seed();

        let optimizer_settings = OptimizerSettings {
            kind: config.optimizer,
            weight_decay: config.weight_decay,
            momentum: config.momentum,
        };
        tracing::info!(
            optimizer = %config.optimizer,
            rate,
            start_from = %config.start_from,
            "Trainer ready"
        );

        Ok(Self {
            weights,
            scheduler,
            optimizer_settings,
            optimizer: build_optimizer(optimizer_settings, rate),
            keep_optimizer_state: config.keep_optimizer_state,
            criterion: CrossEntropyLoss,
            metrics: MetricsAccumulator::new(),
            monitor,
            checkpoints: CheckpointManager::new(workdir.checkpoints_dir(), config.max_checkpoints),
            workdir,
            checkpoint_every: config.checkpoint_every,
        })
    }

    /// Run the model on `data` and return arg-max predictions with the raw logits.
    pub fn predict(
        &mut self,
        data: &Tensor,
        train: bool,
    ) -> Result<(Vec<usize>, Tensor), TrainError> {
        let logits = self.weights.model_mut().forward(data, train)?;
        Ok((logits.argmax_rows(), logits))
    }

    /// Forward one batch; in training mode also backpropagate and step.
    /// Returns the batch's mean loss.
    pub fn process_batch(
        &mut self,
        data: &Tensor,
        target: &[usize],
        train: bool,
    ) -> Result<f64, TrainError> {
        check_leading_dim(data, target)?;
        let samples = target.len() as u64;

        let model = self.weights.model_mut();
        if train {
            model.zero_grad();
        }
        let logits = model.forward(data, train)?;
        let out = self.criterion.evaluate(&logits, target)?;

        if train {
            model.backward(&out.grad)?;
            self.optimizer.step(model);
        }

        let split = if train { Split::Train } else { Split::Validation };
        self.metrics
            .accumulate(split, out.loss * samples as f64, out.correct, samples);
        tracing::trace!(split = split.name(), loss = out.loss, samples, "Batch processed");
        Ok(out.loss)
    }

    /// One full epoch. Returns the metrics handed to the monitor.
    pub fn train_epoch(
        &mut self,
        train: &dyn BatchSource,
        validation: &dyn BatchSource,
        epoch: usize,
    ) -> Result<EpochMetrics, TrainError> {
        let mut batches = 0usize;
        for batch in train.batches() {
            let batch = batch?;
            self.process_batch(&batch.data, &batch.target, true)?;
            batches += 1;
        }
        tracing::debug!(epoch, batches, "Train pass complete");

        batches = 0;
        for batch in validation.batches() {
            let batch = batch?;
            self.process_batch(&batch.data, &batch.target, false)?;
            batches += 1;
        }
        tracing::debug!(epoch, batches, "Validation pass complete");

        let metrics = self.metrics.finalize();
        self.metrics.reset();
        let metrics = metrics?;

        let historical_min = self.monitor.metric_min(TRACKED_METRIC);
        let (schedule, rate) =
            next_rate(self.scheduler.state().clone(), metrics.val_loss, historical_min);
        let optimizer = self.rebuilt_optimizer(rate)?;

        self.monitor.update(epoch, &metrics)?;
        self.scheduler = LearningRateScheduler::from_state(schedule);
        self.optimizer = optimizer;
        tracing::debug!(rate, carried = self.keep_optimizer_state, "Optimizer rebuilt");

        if self.checkpoint_every > 0 && (epoch + 1) % self.checkpoint_every == 0 {
            self.save_checkpoint(epoch, metrics.val_loss)?;
        }
        Ok(metrics)
    }

    /// Fresh optimizer at `rate`, carrying the live buffers over when configured.
    fn rebuilt_optimizer(&self, rate: f64) -> Result<Box<dyn Optimizer>, TrainError> {
        let mut optimizer = build_optimizer(self.optimizer_settings, rate);
        if self.keep_optimizer_state {
            optimizer.load_state_dict(self.optimizer.state_dict())?;
        }
        Ok(optimizer)
    }

    /// Metrics accumulated so far in the current epoch.
    pub fn metrics(&self) -> Result<EpochMetrics, TrainError> {
        self.metrics.finalize()
    }

    pub fn state(&self) -> TrainingState {
        TrainingState {
            weights: self.weights.model().state_dict(),
            optimizer: self.optimizer.state_dict(),
        }
    }

    /// Restore optimizer buffers saved by a previous run. Slots for parameters the
    /// live model lacks (or shapes it no longer has) are dropped and returned.
    pub fn load_optimizer_state(&mut self, path: &Path) -> Result<Vec<String>, TrainError> {
        let mut state = OptimizerState::load(path)?;
        let dropped = state.retain_matching(&self.weights.model().state_dict());
        self.optimizer.load_state_dict(state)?;
        tracing::info!(
            path = %path.display(),
            dropped = dropped.len(),
            "Optimizer state restored"
        );
        Ok(dropped)
    }

    /// Write the optimizer state to the working directory.
    pub fn save_state(&self) -> Result<(), TrainError> {
        self.optimizer
            .state_dict()
            .save(&self.workdir.optimizer_state_file())
    }

    /// Merge an adapted checkpoint into the live model.
    pub async fn load_weights(&mut self, path: &Path) -> Result<(), TrainError> {
        self.weights.load_weights(path, false).await
    }

    /// Write the live model to the working directory's weights file.
    pub fn save_weights(&self) -> Result<(), TrainError> {
        self.weights.save_weights(&self.workdir.weights_file())
    }

    /// Persist weights and optimizer state for `epoch` and record them in the manifest.
    pub fn save_checkpoint(
        &self,
        epoch: usize,
        val_loss: f64,
    ) -> Result<CheckpointEntry, TrainError> {
        let (weights_path, optimizer_path) = self.checkpoints.paths_for(epoch);
        self.weights.save_weights(&weights_path)?;
        self.optimizer.state_dict().save(&optimizer_path)?;
        self.checkpoints
            .record(epoch, val_loss, &weights_path, &optimizer_path)
    }

    pub fn learning_rate(&self) -> f64 {
        self.optimizer.learning_rate()
    }

    pub fn scheduler(&self) -> &LearningRateScheduler {
        &self.scheduler
    }

    pub fn weights(&self) -> &WeightLifecycleManager {
        &self.weights
    }

    pub fn monitor(&self) -> &M {
        &self.monitor
    }

    pub fn checkpoints(&self) -> &CheckpointManager {
        &self.checkpoints
    }

    pub fn workdir(&self) -> &WorkDir {
        &self.workdir
    }

    pub fn close(&mut self) -> Result<(), TrainError> {
        self.monitor.close()
    }
}
