//! Error types for the tonet-train crate.

use thiserror::Error;

/// Top-level error type for training operations.
#[derive(Debug, Error)]
pub enum TrainError {
    /// Remote weight fetch failed. Not retried.
    #[error("Retrievable resource error: {0}")]
    RetrievableResource(String),

    /// Strict checkpoint load hit a missing, unexpected or mis-shaped key.
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Missing file: {}", .0.display())]
    MissingFile(std::path::PathBuf),

    /// A split processed no samples before metrics were finalized.
    #[error("Empty split: no {0} samples were processed this epoch")]
    EmptySplit(&'static str),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Training error: {0}")]
    Training(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl TrainError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn shape_mismatch(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub fn training(msg: impl Into<String>) -> Self {
        Self::Training(msg.into())
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn resource(msg: impl Into<String>) -> Self {
        Self::RetrievableResource(msg.into())
    }
}

impl From<tonet_core::ConfigError> for TrainError {
    fn from(err: tonet_core::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}
