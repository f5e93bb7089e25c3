//! SGD and Adam with L2 weight decay, plus serializable optimizer state.

use crate::error::TrainError;
use crate::model::{Backbone, Checkpoint, Tensor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tonet_core::OptimizerKind;

const ADAM_BETA1: f64 = 0.9;
const ADAM_BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Hyperparameters shared by every optimizer kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerSettings {
    pub kind: OptimizerKind,
    pub weight_decay: f64,
    /// SGD only.
    pub momentum: f64,
}

/// Serialized optimizer state.
///
/// `slots` holds the per-parameter buffers keyed by parameter name: the momentum
/// buffer for SGD, first and second moments for Adam.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerState {
    pub kind: OptimizerKind,
    #[serde(with = "tonet_core::float::scalar")]
    pub learning_rate: f64,
    pub step: u64,
    pub slots: BTreeMap<String, Vec<Tensor>>,
}

impl OptimizerState {
    pub fn load(path: &Path) -> Result<Self, TrainError> {
        if !path.is_file() {
            return Err(TrainError::MissingFile(path.to_path_buf()));
        }
        Ok(serde_json::from_slice(&std::fs::read(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), TrainError> {
        tonet_core::persistence::atomic_write_json(path, self)?;
        Ok(())
    }

    /// Keep only slots whose name exists in `live` with a matching shape.
    /// Returns the names that were dropped.
    pub fn retain_matching(&mut self, live: &Checkpoint) -> Vec<String> {
        let mut dropped = Vec::new();
        self.slots.retain(|name, buffers| {
            let keep = live
                .get(name)
                .is_some_and(|param| buffers.iter().all(|b| b.shape() == param.shape()));
            if !keep {
                dropped.push(name.clone());
            }
            keep
        });
        dropped
    }
}

pub trait Optimizer: Send {
    fn kind(&self) -> OptimizerKind;

    fn learning_rate(&self) -> f64;

    fn set_learning_rate(&mut self, rate: f64);

    /// Update every parameter of `model` from its accumulated gradient.
    fn step(&mut self, model: &mut dyn Backbone);

    fn state_dict(&self) -> OptimizerState;

    /// Replace the optimizer's buffers and step count. The learning rate is
    /// kept; it belongs to the schedule.
    fn load_state_dict(&mut self, state: OptimizerState) -> Result<(), TrainError>;
}

/// Construct a fresh optimizer with empty state.
pub fn build_optimizer(settings: OptimizerSettings, rate: f64) -> Box<dyn Optimizer> {
    match settings.kind {
        OptimizerKind::Sgd => Box::new(Sgd::new(rate, settings.weight_decay, settings.momentum)),
        OptimizerKind::Adam => Box::new(Adam::new(rate, settings.weight_decay)),
    }
}

fn check_kind(expected: OptimizerKind, state: &OptimizerState) -> Result<(), TrainError> {
    if state.kind != expected {
        return Err(TrainError::config(format!(
            "optimizer state was saved by {} but the configured optimizer is {expected}",
            state.kind
        )));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub struct Sgd {
    rate: f64,
    weight_decay: f64,
    momentum: f64,
    step: u64,
    buffers: BTreeMap<String, Tensor>,
}

impl Sgd {
    pub fn new(rate: f64, weight_decay: f64, momentum: f64) -> Self {
        Self {
            rate,
            weight_decay,
            momentum,
            step: 0,
            buffers: BTreeMap::new(),
        }
    }
}

impl Optimizer for Sgd {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Sgd
    }

    fn learning_rate(&self) -> f64 {
        self.rate
    }

    fn set_learning_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn step(&mut self, model: &mut dyn Backbone) {
        let (rate, decay, momentum) = (self.rate, self.weight_decay, self.momentum);
        let buffers = &mut self.buffers;
        model.visit_parameters(&mut |name, value, grad| {
            // A new buffer starts from the first gradient rather than from zero.
            let fresh = !buffers.contains_key(name);
            let mut buf = (momentum > 0.0).then(|| {
                buffers
                    .entry(name.to_string())
                    .or_insert_with(|| Tensor::zeros_like(value))
            });
            for (i, (w, &g)) in value.data_mut().iter_mut().zip(grad.data()).enumerate() {
                let mut d = g as f64 + decay * *w as f64;
                if let Some(buf) = buf.as_deref_mut() {
                    let b = &mut buf.data_mut()[i];
                    let next = if fresh { d } else { momentum * *b as f64 + d };
                    *b = next as f32;
                    d = next;
                }
                *w = (*w as f64 - rate * d) as f32;
            }
        });
        self.step += 1;
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            kind: OptimizerKind::Sgd,
            learning_rate: self.rate,
            step: self.step,
            slots: self
                .buffers
                .iter()
                .map(|(k, v)| (k.clone(), vec![v.clone()]))
                .collect(),
        }
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<(), TrainError> {
        check_kind(OptimizerKind::Sgd, &state)?;
        self.step = state.step;
        self.buffers = state
            .slots
            .into_iter()
            .filter_map(|(k, mut v)| (v.len() == 1).then(|| (k, v.remove(0))))
            .collect();
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Adam {
    rate: f64,
    weight_decay: f64,
    step: u64,
    moments: BTreeMap<String, (Tensor, Tensor)>,
}

impl Adam {
    pub fn new(rate: f64, weight_decay: f64) -> Self {
        Self {
            rate,
            weight_decay,
            step: 0,
            moments: BTreeMap::new(),
        }
    }
}

impl Optimizer for Adam {
    fn kind(&self) -> OptimizerKind {
        OptimizerKind::Adam
    }

    fn learning_rate(&self) -> f64 {
        self.rate
    }

    fn set_learning_rate(&mut self, rate: f64) {
        self.rate = rate;
    }

    fn step(&mut self, model: &mut dyn Backbone) {
        self.step += 1;
        let t = self.step as i32;
        let (rate, decay) = (self.rate, self.weight_decay);
        let bias1 = 1.0 - ADAM_BETA1.powi(t);
        let bias2 = 1.0 - ADAM_BETA2.powi(t);
        let moments = &mut self.moments;

        model.visit_parameters(&mut |name, value, grad| {
            let (m, v) = moments
                .entry(name.to_string())
                .or_insert_with(|| (Tensor::zeros_like(value), Tensor::zeros_like(value)));
            let params = value.data_mut().iter_mut().zip(grad.data());
            let slots = m.data_mut().iter_mut().zip(v.data_mut().iter_mut());
            for ((w, &g), (m, v)) in params.zip(slots) {
                let g = g as f64 + decay * *w as f64;
                let m_next = ADAM_BETA1 * *m as f64 + (1.0 - ADAM_BETA1) * g;
                let v_next = ADAM_BETA2 * *v as f64 + (1.0 - ADAM_BETA2) * g * g;
                *m = m_next as f32;
                *v = v_next as f32;
                let update = rate * (m_next / bias1) / ((v_next / bias2).sqrt() + ADAM_EPS);
                *w = (*w as f64 - update) as f32;
            }
        });
    }

    fn state_dict(&self) -> OptimizerState {
        OptimizerState {
            kind: OptimizerKind::Adam,
            learning_rate: self.rate,
            step: self.step,
            slots: self
                .moments
                .iter()
                .map(|(k, (m, v))| (k.clone(), vec![m.clone(), v.clone()]))
                .collect(),
        }
    }

    fn load_state_dict(&mut self, state: OptimizerState) -> Result<(), TrainError> {
        check_kind(OptimizerKind::Adam, &state)?;
        self.step = state.step;
        self.moments = state
            .slots
            .into_iter()
            .filter_map(|(k, v)| match <[Tensor; 2]>::try_from(v) {
                Ok([m, v]) => Some((k, (m, v))),
                Err(_) => None,
            })
            .collect();
        Ok(())
    }
}
