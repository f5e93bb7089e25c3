//! Epoch monitor: records finished epochs and answers historical minima.

use crate::error::TrainError;
use crate::training::metrics::EpochMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Sink for per-epoch metrics.
pub trait Monitor: Send {
    fn update(&mut self, epoch: usize, metrics: &EpochMetrics) -> Result<(), TrainError>;

    /// Smallest value recorded so far for `metric`, if any epoch reported it.
    fn metric_min(&self, metric: &str) -> Option<f64>;

    fn close(&mut self) -> Result<(), TrainError> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochRecord {
    pub epoch: usize,
    pub metrics: EpochMetrics,
    pub recorded_at: DateTime<Utc>,
}

/// In-memory history, optionally mirrored to a JSON file after every update.
#[derive(Debug, Clone, Default)]
pub struct MetricsHistory {
    records: Vec<EpochRecord>,
    path: Option<PathBuf>,
}

impl MetricsHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Persisting history that resumes from `path` if it already exists.
    pub fn open(path: &Path) -> Result<Self, TrainError> {
        let records: Vec<EpochRecord> =
            tonet_core::persistence::load_json(path)?.unwrap_or_default();
        if !records.is_empty() {
            tracing::info!(path = %path.display(), epochs = records.len(), "Resumed metrics history");
        }
        Ok(Self {
            records,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn last(&self) -> Option<&EpochRecord> {
        self.records.last()
    }

    fn persist(&self) -> Result<(), TrainError> {
        if let Some(path) = &self.path {
            tonet_core::persistence::atomic_write_json(path, &self.records)?;
        }
        Ok(())
    }
}

impl Monitor for MetricsHistory {
    fn update(&mut self, epoch: usize, metrics: &EpochMetrics) -> Result<(), TrainError> {
        tracing::info!(
            epoch,
            loss = metrics.loss,
            val_loss = metrics.val_loss,
            train_accuracy = metrics.train_accuracy,
            val_accuracy = metrics.val_accuracy,
            "Epoch finished"
        );
        self.records.push(EpochRecord {
            epoch,
            metrics: *metrics,
            recorded_at: Utc::now(),
        });
        self.persist()
    }

    fn metric_min(&self, metric: &str) -> Option<f64> {
        self.records
            .iter()
            .filter_map(|r| r.metrics.get(metric))
            .min_by(|a, b| a.total_cmp(b))
    }

    fn close(&mut self) -> Result<(), TrainError> {
        self.persist()
    }
}
