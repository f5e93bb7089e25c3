//! On-disk layout of a training working directory.
//!
//! ```text
//! <workdir>/
//!   weights/weights.json          adapted model parameters
//!   weights/optimizer_state.json  optimizer slots
//!   weights/<cached pretrained>   registry downloads
//!   monitor/metrics.json          per-epoch history
//!   checkpoints/                  numbered training states + manifest
//! ```

use std::io;
use std::path::{Path, PathBuf};

/// Paths derived from the configured working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn weights_dir(&self) -> PathBuf {
        self.root.join("weights")
    }

    pub fn weights_file(&self) -> PathBuf {
        self.weights_dir().join("weights.json")
    }

    pub fn optimizer_state_file(&self) -> PathBuf {
        self.weights_dir().join("optimizer_state.json")
    }

    pub fn monitor_file(&self) -> PathBuf {
        self.root.join("monitor").join("metrics.json")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.root.join("checkpoints")
    }

    /// Create every directory of the layout.
    pub fn ensure(&self) -> io::Result<()> {
        std::fs::create_dir_all(self.weights_dir())?;
        std::fs::create_dir_all(self.root.join("monitor"))?;
        std::fs::create_dir_all(self.checkpoints_dir())?;
        Ok(())
    }
}
