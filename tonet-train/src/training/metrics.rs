//! Per-epoch metrics accumulation.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};
use tonet_core::float::scalar;

/// Which pass a batch belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Split {
    Train,
    Validation,
}

impl Split {
    pub fn name(self) -> &'static str {
        match self {
            Self::Train => "train",
            Self::Validation => "validation",
        }
    }
}

/// Normalized metrics for one finished epoch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    #[serde(with = "scalar")]
    pub loss: f64,
    /// Validation loss sum divided by the *train* sample count.
    #[serde(with = "scalar")]
    pub val_loss: f64,
    #[serde(with = "scalar")]
    pub train_accuracy: f64,
    #[serde(with = "scalar")]
    pub val_accuracy: f64,
    /// `train_accuracy - val_accuracy`.
    #[serde(with = "scalar")]
    pub train_min_val_acc: f64,
}

impl EpochMetrics {
    /// Look a metric up by its reported name.
    pub fn get(&self, name: &str) -> Option<f64> {
        match name {
            "loss" => Some(self.loss),
            "val_loss" => Some(self.val_loss),
            "train_accuracy" => Some(self.train_accuracy),
            "val_accuracy" => Some(self.val_accuracy),
            "train_min_val_acc" => Some(self.train_min_val_acc),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct SplitTotals {
    loss_sum: f64,
    correct: u64,
    samples: u64,
}

/// Running per-split totals for the current epoch.
#[derive(Debug, Clone, Default)]
pub struct MetricsAccumulator {
    train: SplitTotals,
    validation: SplitTotals,
}

impl MetricsAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn accumulate(&mut self, split: Split, loss_sum: f64, correct: u64, samples: u64) {
        let totals = match split {
            Split::Train => &mut self.train,
            Split::Validation => &mut self.validation,
        };
        totals.loss_sum += loss_sum;
        totals.correct += correct;
        totals.samples += samples;
    }

    pub fn samples(&self, split: Split) -> u64 {
        match split {
            Split::Train => self.train.samples,
            Split::Validation => self.validation.samples,
        }
    }

    /// Compute the epoch's metrics. Fails with [`TrainError::EmptySplit`] if
    /// either split saw no samples.
    pub fn finalize(&self) -> Result<EpochMetrics, TrainError> {
        if self.train.samples == 0 {
            return Err(TrainError::EmptySplit(Split::Train.name()));
        }
        if self.validation.samples == 0 {
            return Err(TrainError::EmptySplit(Split::Validation.name()));
        }

        let train_count = self.train.samples as f64;
        let val_count = self.validation.samples as f64;
        let train_accuracy = self.train.correct as f64 / train_count;
        let val_accuracy = self.validation.correct as f64 / val_count;

        Ok(EpochMetrics {
            loss: self.train.loss_sum / train_count,
            val_loss: self.validation.loss_sum / train_count,
            train_accuracy,
            val_accuracy,
            train_min_val_acc: train_accuracy - val_accuracy,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finalize_normalizes_val_loss_by_train_count() {
        let mut acc = MetricsAccumulator::new();
        acc.accumulate(Split::Train, 10.0, 0, 5);
        acc.accumulate(Split::Validation, 4.0, 0, 2);
        let metrics = acc.finalize().unwrap();
        assert_eq!(metrics.loss, 2.0);
        assert_eq!(metrics.val_loss, 0.8);
    }

    #[test]
    fn test_reset_then_finalize_fails() {
        let mut acc = MetricsAccumulator::new();
        acc.accumulate(Split::Train, 10.0, 3, 5);
        acc.accumulate(Split::Validation, 4.0, 1, 2);
        acc.finalize().unwrap();
        acc.reset();
        assert_eq!(acc.samples(Split::Train), 0);
        assert!(matches!(
            acc.finalize(),
            Err(TrainError::EmptySplit("train"))
        ));
    }

    #[test]
    fn test_empty_validation_split() {
        let mut acc = MetricsAccumulator::new();
        acc.accumulate(Split::Train, 1.0, 1, 1);
        assert!(matches!(
            acc.finalize(),
            Err(TrainError::EmptySplit("validation"))
        ));
    }

    #[test]
    fn test_accuracy_gap() {
        let mut acc = MetricsAccumulator::new();
        acc.accumulate(Split::Train, 1.0, 2, 4);
        acc.accumulate(Split::Train, 1.0, 1, 4);
        acc.accumulate(Split::Validation, 1.0, 1, 4);
        let m = acc.finalize().unwrap();
        assert_eq!(m.train_accuracy, 0.375);
        assert_eq!(m.val_accuracy, 0.25);
        assert_eq!(m.train_min_val_acc, 0.125);
        assert_eq!(m.get("val_accuracy"), Some(0.25));
        assert_eq!(m.get("lr"), None);
    }
}
