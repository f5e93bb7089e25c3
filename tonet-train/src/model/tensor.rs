//! Dense row-major f32 tensor used for parameters, activations and gradients.

use crate::error::TrainError;
use serde::{Deserialize, Serialize};

/// Deserialization goes through [`Tensor::new`], so a file whose data length
/// disagrees with its shape is rejected on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawTensor")]
pub struct Tensor {
    shape: Vec<usize>,
    #[serde(serialize_with = "tonet_core::float::seq::serialize")]
    data: Vec<f32>,
}

/// Unchecked on-disk form.
#[derive(Deserialize)]
struct RawTensor {
    shape: Vec<usize>,
    #[serde(deserialize_with = "tonet_core::float::seq::deserialize")]
    data: Vec<f32>,
}

impl TryFrom<RawTensor> for Tensor {
    type Error = TrainError;

    fn try_from(raw: RawTensor) -> Result<Self, Self::Error> {
        Tensor::new(raw.shape, raw.data)
    }
}

impl Tensor {
    pub fn new(shape: Vec<usize>, data: Vec<f32>) -> Result<Self, TrainError> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(TrainError::invalid_input(format!(
                "shape {shape:?} needs {expected} elements, got {}",
                data.len()
            )));
        }
        Ok(Self { shape, data })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    pub fn zeros_like(other: &Tensor) -> Self {
        Self::zeros(&other.shape)
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Size of the leading (batch) dimension; 0 for scalars.
    pub fn batch_len(&self) -> usize {
        self.shape.first().copied().unwrap_or(0)
    }

    /// Elements per leading-dimension row.
    pub fn row_len(&self) -> usize {
        self.shape.iter().skip(1).product()
    }

    pub fn row(&self, index: usize) -> &[f32] {
        let width = self.row_len();
        &self.data[index * width..(index + 1) * width]
    }

    /// Index of the largest value in each row. Ties resolve to the lowest index.
    pub fn argmax_rows(&self) -> Vec<usize> {
        (0..self.batch_len())
            .map(|i| {
                self.row(i)
                    .iter()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (j, &v)| {
                        if v > best.1 { (j, v) } else { best }
                    })
                    .0
            })
            .collect()
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|v| *v = value);
    }
}
