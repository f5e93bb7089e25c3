//! The backbone seam and the multi-device replication wrapper.
//!
//! Architectures live outside this crate. Anything that can run a forward and a
//! backward pass over named parameters, and swap its classification head, can
//! be trained.

use super::checkpoint::Checkpoint;
use super::tensor::Tensor;
use crate::error::TrainError;

/// Name prefix added by [`Replicated`].
pub const REPLICA_PREFIX: &str = "module.";

/// A trainable network with a replaceable classification head.
pub trait Backbone: Send {
    /// Run the network. With `train` set, activations are kept for [`Backbone::backward`].
    fn forward(&mut self, input: &Tensor, train: bool) -> Result<Tensor, TrainError>;

    /// Accumulate parameter gradients from the gradient of the last forward output.
    fn backward(&mut self, grad_output: &Tensor) -> Result<(), TrainError>;

    /// Snapshot of every parameter by name.
    fn state_dict(&self) -> Checkpoint;

    /// Overwrite an existing parameter. Unknown names are an error; the key set never grows.
    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError>;

    /// Visit each parameter with its accumulated gradient.
    fn visit_parameters(&mut self, visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor));

    fn zero_grad(&mut self);

    /// Swap the head for a freshly initialized one with `num_classes` outputs.
    fn replace_head(&mut self, num_classes: usize);

    fn head_classes(&self) -> usize;
}

impl<B: Backbone + ?Sized> Backbone for Box<B> {
    fn forward(&mut self, input: &Tensor, train: bool) -> Result<Tensor, TrainError> {
        (**self).forward(input, train)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), TrainError> {
        (**self).backward(grad_output)
    }

    fn state_dict(&self) -> Checkpoint {
        (**self).state_dict()
    }

    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError> {
        (**self).set_parameter(name, value)
    }

    fn visit_parameters(&mut self, visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {
        (**self).visit_parameters(visit)
    }

    fn zero_grad(&mut self) {
        (**self).zero_grad()
    }

    fn replace_head(&mut self, num_classes: usize) {
        (**self).replace_head(num_classes)
    }

    fn head_classes(&self) -> usize {
        (**self).head_classes()
    }
}

/// Builds backbones by architecture identifier.
pub trait BackboneFactory: Send + Sync {
    fn build(&self, architecture: &str) -> Result<Box<dyn Backbone>, TrainError>;
}

/// Multi-device data-parallel wrapper.
///
/// Replication across compute units is handled by the numeric backend; at
/// this layer the visible effect is the `module.` prefix on every parameter
/// name, which is what saved checkpoints carry.
pub struct Replicated<B> {
    inner: B,
    replicas: usize,
}

impl<B: Backbone> Replicated<B> {
    pub fn new(inner: B, replicas: usize) -> Self {
        Self {
            inner,
            replicas: replicas.max(1),
        }
    }

    pub fn replicas(&self) -> usize {
        self.replicas
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: Backbone> Backbone for Replicated<B> {
    fn forward(&mut self, input: &Tensor, train: bool) -> Result<Tensor, TrainError> {
        self.inner.forward(input, train)
    }

    fn backward(&mut self, grad_output: &Tensor) -> Result<(), TrainError> {
        self.inner.backward(grad_output)
    }

    fn state_dict(&self) -> Checkpoint {
        self.inner
            .state_dict()
            .into_iter()
            .map(|(name, value)| (format!("{REPLICA_PREFIX}{name}"), value))
            .collect()
    }

    fn set_parameter(&mut self, name: &str, value: Tensor) -> Result<(), TrainError> {
        let inner_name = name.strip_prefix(REPLICA_PREFIX).ok_or_else(|| {
            TrainError::invalid_input(format!("parameter {name} lacks the {REPLICA_PREFIX} prefix"))
        })?;
        self.inner.set_parameter(inner_name, value)
    }

    fn visit_parameters(&mut self, visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {
        self.inner.visit_parameters(&mut |name, value, grad| {
            visit(&format!("{REPLICA_PREFIX}{name}"), value, grad)
        })
    }

    fn zero_grad(&mut self) {
        self.inner.zero_grad()
    }

    fn replace_head(&mut self, num_classes: usize) {
        self.inner.replace_head(num_classes)
    }

    fn head_classes(&self) -> usize {
        self.inner.head_classes()
    }
}

/// Stand-in occupying a slot while its backbone is moved into a wrapper.
struct Vacant;

impl Backbone for Vacant {
    fn forward(&mut self, _input: &Tensor, _train: bool) -> Result<Tensor, TrainError> {
        Err(TrainError::training("backbone slot is vacant"))
    }

    fn backward(&mut self, _grad_output: &Tensor) -> Result<(), TrainError> {
        Err(TrainError::training("backbone slot is vacant"))
    }

    fn state_dict(&self) -> Checkpoint {
        Checkpoint::default()
    }

    fn set_parameter(&mut self, name: &str, _value: Tensor) -> Result<(), TrainError> {
        Err(TrainError::invalid_input(format!("unknown parameter {name}")))
    }

    fn visit_parameters(&mut self, _visit: &mut dyn FnMut(&str, &mut Tensor, &Tensor)) {}

    fn zero_grad(&mut self) {}

    fn replace_head(&mut self, _num_classes: usize) {}

    fn head_classes(&self) -> usize {
        0
    }
}

/// Wrap the backbone held in `slot` with [`Replicated`].
pub fn replicate_in_place(slot: &mut Box<dyn Backbone>, replicas: usize) {
    let inner = std::mem::replace(slot, Box::new(Vacant));
    *slot = Box::new(Replicated::new(inner, replicas));
}
