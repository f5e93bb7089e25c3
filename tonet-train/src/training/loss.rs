//! Cross-entropy criterion over class logits.

use crate::error::TrainError;
use crate::model::Tensor;

/// Result of evaluating the criterion on one batch.
#[derive(Debug, Clone)]
pub struct LossOutput {
    /// Mean loss over the batch.
    pub loss: f64,
    /// Gradient of the mean loss with respect to the logits.
    pub grad: Tensor,
    /// Arg-max prediction per sample.
    pub predictions: Vec<usize>,
    pub correct: u64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// `logits` is `[batch, classes]`, `targets` holds one class index per row.
    pub fn evaluate(&self, logits: &Tensor, targets: &[usize]) -> Result<LossOutput, TrainError> {
        let batch = logits.batch_len();
        let classes = logits.row_len();
        if logits.shape().len() != 2 || batch == 0 || batch != targets.len() {
            return Err(TrainError::invalid_input(format!(
                "logits {:?} do not match {} targets",
                logits.shape(),
                targets.len()
            )));
        }
        if let Some(&bad) = targets.iter().find(|&&t| t >= classes) {
            return Err(TrainError::invalid_input(format!(
                "target class {bad} out of range for {classes} outputs"
            )));
        }

        let mut grad = Tensor::zeros(logits.shape());
        let mut total = 0.0f64;
        let scale = 1.0 / batch as f64;

        for (i, &target) in targets.iter().enumerate() {
            let row = logits.row(i);
            let max = row.iter().copied().fold(f32::NEG_INFINITY, f32::max) as f64;
            let exps: Vec<f64> = row.iter().map(|&v| (v as f64 - max).exp()).collect();
            let sum: f64 = exps.iter().sum();
            total += sum.ln() + max - row[target] as f64;

            let grad_row = &mut grad.data_mut()[i * classes..(i + 1) * classes];
            for (j, (g, e)) in grad_row.iter_mut().zip(&exps).enumerate() {
                let p = e / sum;
                let indicator = if j == target { 1.0 } else { 0.0 };
                *g = ((p - indicator) * scale) as f32;
            }
        }

        let predictions = logits.argmax_rows();
        let correct = predictions
            .iter()
            .zip(targets)
            .filter(|(p, t)| p == t)
            .count() as u64;

        Ok(LossOutput {
            loss: total * scale,
            grad,
            predictions,
            correct,
        })
    }
}
