use crate::error::{EegError, Result};
use crate::math::tensor::Tensor;

/// Categorical cross-entropy over raw class scores (logits).
///
/// Softmax is folded into the loss, so the classifier head has no output
/// activation. Both the loss and its gradient are computed in full precision
/// regardless of the forward pass precision.
pub struct CrossEntropyLoss;

impl CrossEntropyLoss {
    /// Mean over the batch of `-log softmax(logits)[target]`.
    ///
    /// `logits`  — shape `(batch, n_classes)`
    /// `targets` — one class index per row
    pub fn loss(logits: &Tensor, targets: &[usize]) -> Result<f32> {
        let classes = Self::check(logits, targets)?;
        let total: f64 = logits.data.chunks(classes)
            .zip(targets)
            .map(|(row, &t)| log_sum_exp(row) - row[t] as f64)
            .sum();
        Ok((total / targets.len() as f64) as f32)
    }

    /// Gradient of the mean loss w.r.t. the logits:
    ///   ∂L/∂z_i = (softmax(z)_i - onehot_i) / batch
    pub fn derivative(logits: &Tensor, targets: &[usize]) -> Result<Tensor> {
        let classes = Self::check(logits, targets)?;
        let inv_batch = 1.0 / targets.len() as f64;
        let mut grad = Vec::with_capacity(logits.numel());
        for (row, &t) in logits.data.chunks(classes).zip(targets) {
            let lse = log_sum_exp(row);
            for (j, &z) in row.iter().enumerate() {
                let p = (z as f64 - lse).exp();
                let y = if j == t { 1.0 } else { 0.0 };
                grad.push(((p - y) * inv_batch) as f32);
            }
        }
        Tensor::from_vec(&logits.shape, grad)
    }

    fn check(logits: &Tensor, targets: &[usize]) -> Result<usize> {
        if logits.rank() != 2 || logits.shape[0] != targets.len() || targets.is_empty() {
            return Err(EegError::shape_mismatch(
                "CrossEntropyLoss",
                &[targets.len(), logits.shape.last().copied().unwrap_or(0)],
                &logits.shape,
            ));
        }
        let classes = logits.shape[1];
        if let Some((index, &t)) = targets.iter().enumerate().find(|&(_, &t)| t >= classes) {
            return Err(EegError::InvalidLabel { index, value: t as f64 });
        }
        Ok(classes)
    }
}

/// Numerically stable `log Σ exp(z)`.
fn log_sum_exp(row: &[f32]) -> f64 {
    let max = row.iter().fold(f32::NEG_INFINITY, |m, &z| m.max(z)) as f64;
    let sum: f64 = row.iter().map(|&z| (z as f64 - max).exp()).sum();
    max + sum.ln()
}

/// Index of the maximum element in a slice.
pub fn argmax(v: &[f32]) -> usize {
    v.iter()
        .enumerate()
        .max_by(|(_, a), (_, b)| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(i, _)| i)
        .unwrap_or(0)
}
