//! # tonet-train: training orchestration for image classifiers
//!
//! Brings a backbone into a trainable state (random, pretrained from a
//! registry, or continued from a saved checkpoint), runs epochs of
//! train/validation passes, adapts the learning rate from the validation-loss
//! trend and persists weights and optimizer state between runs.
//!
//! Architectures and datasets are supplied by the caller through
//! [`model::Backbone`] and [`training::BatchSource`].

pub mod error;
pub mod model;
pub mod training;
pub mod zoo;

pub use error::TrainError;
pub use model::{Backbone, BackboneFactory, Checkpoint, Tensor};
pub use training::{Batch, BatchSource, EpochMetrics, MetricsHistory, Monitor, Trainer};
pub use zoo::{StartMode, WeightLifecycleManager};
