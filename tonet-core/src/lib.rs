//! # tonet-core: configuration and working-directory plumbing
//!
//! Shared foundation for the training crates: layered configuration loading,
//! atomic persistence helpers, lossless float encoding for saved files, the
//! on-disk working directory layout and the tracing bootstrap.

pub mod config;
pub mod float;
pub mod logging;
pub mod persistence;
pub mod workdir;

pub use config::{
    ConfigError, ConfigOverrides, LearningRateConfig, LearningRateOverrides, OptimizerKind,
    StartFrom, TrainingConfig, load_config,
};
pub use workdir::WorkDir;
