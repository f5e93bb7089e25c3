//! Batches and the sources that produce them.

use crate::error::TrainError;
use crate::model::Tensor;

/// One mini-batch: `data` is `[batch, ...]`, `target` one class index per sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub data: Tensor,
    pub target: Vec<usize>,
}

impl Batch {
    pub fn new(data: Tensor, target: Vec<usize>) -> Result<Self, TrainError> {
        check_leading_dim(&data, &target)?;
        Ok(Self { data, target })
    }

    pub fn len(&self) -> usize {
        self.target.len()
    }

    pub fn is_empty(&self) -> bool {
        self.target.is_empty()
    }
}

pub(crate) fn check_leading_dim(data: &Tensor, target: &[usize]) -> Result<(), TrainError> {
    if data.batch_len() != target.len() || target.is_empty() {
        return Err(TrainError::invalid_input(format!(
            "batch data {:?} does not match {} targets",
            data.shape(),
            target.len()
        )));
    }
    Ok(())
}

/// A finite, restartable sequence of batches. Each call starts a new pass.
pub trait BatchSource {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch, TrainError>> + '_>;
}

impl BatchSource for [Batch] {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch, TrainError>> + '_> {
        Box::new(self.iter().cloned().map(Ok))
    }
}

impl BatchSource for Vec<Batch> {
    fn batches(&self) -> Box<dyn Iterator<Item = Result<Batch, TrainError>> + '_> {
        self.as_slice().batches()
    }
}
