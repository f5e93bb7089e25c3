//! Configuration system for tonet.
//!
//! Uses `figment` for layered configuration: defaults -> user config -> explicit
//! file -> environment -> overrides. Unknown `start_from` or `optimizer` values
//! fail at extraction, numeric ranges are checked by [`TrainingConfig::validate`].

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }
}

/// How the backbone obtains its initial parameters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartFrom {
    /// Random initialization, original head.
    #[default]
    Begin,
    /// Official pretrained weights fetched through the registry.
    Url,
    /// A previously saved adapted model.
    Continue,
}

impl fmt::Display for StartFrom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Begin => "begin",
            Self::Url => "url",
            Self::Continue => "continue",
        };
        f.write_str(name)
    }
}

/// Supported optimizer kinds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[default]
    #[serde(rename = "Adam", alias = "adam")]
    Adam,
    #[serde(rename = "SGD", alias = "sgd", alias = "Sgd")]
    Sgd,
}

impl fmt::Display for OptimizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Adam => f.write_str("Adam"),
            Self::Sgd => f.write_str("SGD"),
        }
    }
}

/// Learning-rate schedule settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningRateConfig {
    /// Rate used for the first epoch.
    pub start_value: f64,
    /// Divisor applied every `skip_steps_number` epochs without improvement.
    pub decrease_coefficient: f64,
    /// Epochs between steady-state decays.
    pub skip_steps_number: u64,
    /// One-off divisor applied after the first epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_epoch_decrease_coeff: Option<f64>,
}

impl Default for LearningRateConfig {
    fn default() -> Self {
        Self {
            start_value: 1e-3,
            decrease_coefficient: 10.0,
            skip_steps_number: 10,
            first_epoch_decrease_coeff: None,
        }
    }
}

/// Top-level training configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Backbone architecture identifier, e.g. `resnet34`.
    #[serde(default = "default_architecture")]
    pub architecture: String,
    #[serde(default)]
    pub start_from: StartFrom,
    #[serde(default)]
    pub learning_rate: LearningRateConfig,
    #[serde(default)]
    pub optimizer: OptimizerKind,
    /// Root of the working directory (weights, monitor history, checkpoints).
    #[serde(default = "default_workdir")]
    pub workdir_path: PathBuf,
    /// Output classes of the resized head.
    #[serde(default = "default_num_classes")]
    pub num_classes: usize,
    /// L2 penalty applied by every optimizer.
    #[serde(default = "default_weight_decay")]
    pub weight_decay: f64,
    /// SGD momentum; ignored by Adam.
    #[serde(default)]
    pub momentum: f64,
    /// Explicit checkpoint for `continue`; defaults to the working directory's weights file.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
    /// Carry optimizer moments across the per-epoch rebuild.
    #[serde(default)]
    pub keep_optimizer_state: bool,
    /// Save a checkpoint every N epochs; 0 disables.
    #[serde(default)]
    pub checkpoint_every: usize,
    #[serde(default = "default_max_checkpoints")]
    pub max_checkpoints: usize,
    /// Architecture -> pretrained weights URL.
    #[serde(default)]
    pub weight_urls: BTreeMap<String, String>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            architecture: default_architecture(),
            start_from: StartFrom::default(),
            learning_rate: LearningRateConfig::default(),
            optimizer: OptimizerKind::default(),
            workdir_path: default_workdir(),
            num_classes: default_num_classes(),
            weight_decay: default_weight_decay(),
            momentum: 0.0,
            checkpoint_path: None,
            keep_optimizer_state: false,
            checkpoint_every: 0,
            max_checkpoints: default_max_checkpoints(),
            weight_urls: BTreeMap::new(),
        }
    }
}

fn default_architecture() -> String {
    "resnet34".to_string()
}

fn default_workdir() -> PathBuf {
    PathBuf::from("workdir")
}

fn default_num_classes() -> usize {
    128
}

fn default_weight_decay() -> f64 {
    1e-4
}

fn default_max_checkpoints() -> usize {
    5
}

impl TrainingConfig {
    /// Check value ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let lr = &self.learning_rate;
        if self.architecture.trim().is_empty() {
            return Err(ConfigError::invalid("architecture must not be empty"));
        }
        if !(lr.start_value > 0.0) {
            return Err(ConfigError::invalid(format!(
                "learning_rate.start_value must be positive, got {}",
                lr.start_value
            )));
        }
        if !(lr.decrease_coefficient > 0.0) {
            return Err(ConfigError::invalid(format!(
                "learning_rate.decrease_coefficient must be positive, got {}",
                lr.decrease_coefficient
            )));
        }
        if let Some(coeff) = lr.first_epoch_decrease_coeff
            && !(coeff > 0.0)
        {
            return Err(ConfigError::invalid(format!(
                "learning_rate.first_epoch_decrease_coeff must be positive, got {coeff}"
            )));
        }
        if lr.skip_steps_number == 0 {
            return Err(ConfigError::invalid(
                "learning_rate.skip_steps_number must be at least 1",
            ));
        }
        if self.num_classes == 0 {
            return Err(ConfigError::invalid("num_classes must be at least 1"));
        }
        if self.max_checkpoints == 0 {
            return Err(ConfigError::invalid("max_checkpoints must be at least 1"));
        }
        if self.weight_decay < 0.0 || !(0.0..1.0).contains(&self.momentum) {
            return Err(ConfigError::invalid(format!(
                "weight_decay must be >= 0 and momentum in [0, 1), got {} / {}",
                self.weight_decay, self.momentum
            )));
        }
        if self.start_from == StartFrom::Url && self.weight_urls.is_empty() {
            tracing::warn!(
                architecture = %self.architecture,
                "start_from = url but no weight_urls configured; a registry must be injected"
            );
        }
        Ok(())
    }
}

/// Per-field overrides for [`load_config`], e.g. from command-line flags.
///
/// Only the fields that are `Some` are merged; everything else keeps the value
/// from the file, environment or defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConfigOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub architecture: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_from: Option<StartFrom>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub learning_rate: Option<LearningRateOverrides>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub optimizer: Option<OptimizerKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workdir_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_path: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_optimizer_state: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint_every: Option<usize>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LearningRateOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_value: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decrease_coefficient: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub skip_steps_number: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_epoch_decrease_coeff: Option<f64>,
}

/// Load configuration from layered sources.
///
/// Priority (highest to lowest):
/// 1. Explicit overrides (only the fields set in `overrides`)
/// 2. Environment variables (prefixed with `TONET_`, `__` separates nesting)
/// 3. Explicit config file (`path`)
/// 4. User config (`~/.config/tonet/config.toml`)
/// 5. Built-in defaults
///
/// The result is validated before it is returned.
pub fn load_config(
    path: Option<&Path>,
    overrides: Option<&ConfigOverrides>,
) -> Result<TrainingConfig, ConfigError> {
    let mut figment = Figment::from(Serialized::defaults(TrainingConfig::default()));

    if let Some(config_dir) = directories::ProjectDirs::from("dev", "tonet", "tonet") {
        let user_config = config_dir.config_dir().join("config.toml");
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::invalid(format!(
                "config file {} does not exist",
                path.display()
            )));
        }
        figment = figment.merge(Toml::file(path));
    }

    // TONET_LEARNING_RATE__START_VALUE, TONET_START_FROM, etc.
    figment = figment.merge(Env::prefixed("TONET_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    let config: TrainingConfig = figment.extract().map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}
