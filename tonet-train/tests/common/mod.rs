//! Test backbones and collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use tonet_train::model::{Backbone, BackboneFactory, Checkpoint, Tensor};
use tonet_train::training::Batch;
use tonet_train::zoo::WeightFetcher;
use tonet_train::TrainError;

/// Dense layer stored row-major as `[out, in]`.
#[derive(Debug, Clone)]
struct Dense {
    weight: Tensor,
    bias: Tensor,
    grad_weight: Tensor,
    grad_bias: Tensor,
}

impl Dense {
    fn new(inputs: usize, outputs: usize, seed: usize) -> Self {
        let data = (0..inputs * outputs)
            .map(|i| (((i + seed) * 7 % 11) as f32 - 5.0) * 0.05)
            .collect();
        let weight = Tensor::new(vec![outputs, inputs], data).unwrap();
        Self {
            grad_weight: Tensor::zeros_like(&weight),
            weight,
            bias: Tensor::zeros(&[outputs]),
            grad_bias: Tensor::zeros(&[outputs]),
        }
    }

    fn outputs(&self) -> usize {
        self.weight.shape()[0]
    }

    fn inputs(&self) -> usize {
        self.weight.shape()[1]
    }

    fn forward(&self, x: &Tensor) -> Tensor {
        let (n, o, i) = (x.batch_len(), self.outputs(), self.inputs());
        let mut out = Tensor::zeros(&[n, o]);
        for r in 0..n {
            let row = x.row(r);
            for c in 0..o {
                let w = &self.weight.data()[c * i..(c + 1) * i];
                let dot: f32 = row.iter().zip(w).map(|(a, b)| a * b).sum();
                out.data_mut()[r * o + c] = dot + self.bias.data()[c];
            }
        }
        out
    }

    /// Accumulate gradients and return the gradient w.r.t. the input.
    fn backward(&mut self, x: &Tensor, grad: &Tensor) -> Tensor {
        let (n, o, i) = (x.batch_len(), self.outputs(), self.inputs());
        let mut grad_input = Tensor::zeros(&[n, i]);
        for r in 0..n {
            for c in 0..o {
                let g = grad.data()[r * o + c];
                self.grad_bias.data_mut()[c] += g;
                for k in 0..i {
                    self.grad_weight.data_mut()[c * i + k] += g * x.data()[r * i + k];
                    grad_input.data_mut()[r * i + k] += g * self.weight.data()[c * i + k];
                }
            }
        }
        grad_input
    }

    fn zero_grad(&mut self) {
        self.grad_weight.fill(0.0);
        self.grad_bias.fill(0.0);
    }
}

/// Two dense layers: `features` then `classifier`.
pub struct LinearNet {
    features: Dense,
    classifier: Dense,
    cache: Option<(Tensor, Tensor)>,
}

impl LinearNet {
    pub fn new(inputs: usize, hidden: usize, classes: usize) -> Self {
        Self {
            features: Dense::new(inputs, hidden, 1),
            classifier: Dense::new(hidden, classes, 3),
            cache: None,
        }
    }
}

impl Backbone for LinearNet {
    fn forward(&mut self, input: &Tensor, train: bool) -> Result<Tensor, TrainError> {
        if input.row_len() != self.features.inputs() {
            return Err(TrainError::invalid_input("input width mismatch"));
        }
        let hidden = self.features.forward(input);
        let out = self.classifier.forward(&hidden);
        self.cache = train.then(|| (input.clone(), hidden));
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), TrainError> {
        let (input, hidden) = self
            .cache
            .take()
            .ok_or_else(|| TrainError::training("backward without a training forward"))?;
        let grad_hidden = self.classifier.backward(&hidden, grad_output);
        self.features.backward(&input, &grad_hidden);
        Ok(())
    }

    fn state_dict(&self) -> Checkpoint {
        [
            ("features.weight", &self.features.weight),
            ("features.bias", &self.features.bias),
            ("classifier.weight", &self.classifier.weight),
            ("classifier.bias", &self.classifier.bias),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
    }

    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError> {
        let slot = match name {
            "features.weight" => &mut self.features.weight,
            "features.bias" => &mut self.features.bias,
            "classifier.weight" => &mut self.classifier.weight,
            "classifier.bias" => &mut self.classifier.bias,
            other => return Err(TrainError::invalid_input(format!("unknown parameter {other}"))),
        };
        *slot = value;
        Ok(())
    }

    fn visit_parameters(&mut self, visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {
        visit("features.weight", &mut self.features.weight, &self.features.grad_weight);
        visit("features.bias", &mut self.features.bias, &self.features.grad_bias);
        visit("classifier.weight", &mut self.classifier.weight, &self.classifier.grad_weight);
        visit("classifier.bias", &mut self.classifier.bias, &self.classifier.grad_bias);
    }

    fn zero_grad(&mut self) {
        self.features.zero_grad();
        self.classifier.zero_grad();
    }

    fn replace_head(&mut self, num_classes: usize) {
        self.classifier = Dense::new(self.features.outputs(), num_classes, 5);
    }

    fn head_classes(&self) -> usize {
        self.classifier.outputs()
    }
}

/// Logits are the input plus a learned per-class bias; lets tests script predictions.
pub struct BiasNet {
    bias: Tensor,
    grad: Tensor,
}

impl BiasNet {
    pub fn new(classes: usize) -> Self {
        Self {
            bias: Tensor::zeros(&[classes]),
            grad: Tensor::zeros(&[classes]),
        }
    }
}

impl Backbone for BiasNet {
    fn forward(&mut self, input: &Tensor, _train: bool) -> Result<Tensor, TrainError> {
        let classes = self.bias.numel();
        let mut out = input.clone();
        for (i, v) in out.data_mut().iter_mut().enumerate() {
            *v += self.bias.data()[i % classes];
        }
        Ok(out)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), TrainError> {
        let classes = self.bias.numel();
        for (i, g) in grad_output.data().iter().enumerate() {
            self.grad.data_mut()[i % classes] += g;
        }
        Ok(())
    }

    fn state_dict(&self) -> Checkpoint {
        [("classifier.bias".to_string(), self.bias.clone())]
            .into_iter()
            .collect()
    }

    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError> {
        if name != "classifier.bias" {
            return Err(TrainError::invalid_input(format!("unknown parameter {name}")));
        }
        self.bias = value;
        Ok(())
    }

    fn visit_parameters(&mut self, visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {
        visit("classifier.bias", &mut self.bias, &self.grad)
    }

    fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn replace_head(&mut self, num_classes: usize) {
        *self = Self::new(num_classes);
    }

    fn head_classes(&self) -> usize {
        self.bias.numel()
    }
}

/// Builds `LinearNet(4, 6, 10)` for `tiny`, fails otherwise.
pub struct TinyFactory;

impl BackboneFactory for TinyFactory {
    fn build(&self, architecture: &str) -> Result<Box<dyn Backbone>, TrainError> {
        match architecture {
            "tiny" => Ok(Box::new(LinearNet::new(4, 6, 10))),
            other => Err(TrainError::config(format!("unknown architecture {other}"))),
        }
    }
}

/// Serves canned bytes per URL and counts requests.
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<BTreeMap<String, Vec<u8>>>,
    calls: AtomicUsize,
}

impl FakeFetcher {
    pub fn serving(url: &str, body: Vec<u8>) -> Self {
        let fetcher = Self::default();
        fetcher
            .responses
            .lock()
            .unwrap()
            .insert(url.to_string(), body);
        fetcher
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WeightFetcher for FakeFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<u8>, TrainError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .ok_or_else(|| TrainError::resource(format!("404 for {url}")))
    }
}

/// Batch whose rows are given logits.
pub fn logits_batch(rows: &[[f32; 2]], target: &[usize]) -> Batch {
    let data = rows.iter().flatten().copied().collect();
    Batch::new(Tensor::new(vec![rows.len(), 2], data).unwrap(), target.to_vec()).unwrap()
}

/// Linearly separable 4-feature data for `LinearNet`.
pub fn separable_batches(classes: usize) -> Vec<Batch> {
    (0..3)
        .map(|b| {
            let mut data = Vec::new();
            let mut target = Vec::new();
            for s in 0..4 {
                let class = (b + s) % classes;
                let mut row = [0.0f32; 4];
                row[class % 4] = 1.0;
                row[(class + 1) % 4] = 0.5;
                data.extend_from_slice(&row);
                target.push(class);
            }
            Batch::new(Tensor::new(vec![4, 4], data).unwrap(), target).unwrap()
        })
        .collect()
}
