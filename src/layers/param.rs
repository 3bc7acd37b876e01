use serde::{Deserialize, Serialize};

use crate::math::tensor::Tensor;

/// A trainable tensor together with its accumulated gradient.
///
/// Only `value` is serialized; gradients are rebuilt lazily after loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Tensor,
    #[serde(skip)]
    pub grad: Tensor,
}

impl Param {
    pub fn new(value: Tensor) -> Param {
        let grad = Tensor::zeros(&value.shape);
        Param { value, grad }
    }

    pub fn zero_grad(&mut self) {
        if self.grad.shape != self.value.shape {
            self.grad = Tensor::zeros(&self.value.shape);
        } else {
            self.grad.fill(0.0);
        }
    }

    /// Adds `delta` element-wise into the gradient buffer.
    pub fn accumulate(&mut self, delta: &[f32]) {
        if self.grad.shape != self.value.shape {
            self.grad = Tensor::zeros(&self.value.shape);
        }
        debug_assert_eq!(delta.len(), self.grad.data.len());
        for (g, d) in self.grad.data.iter_mut().zip(delta) {
            *g += d;
        }
    }

    pub fn numel(&self) -> usize {
        self.value.numel()
    }
}

/// Parameter ownership shared by every layer and by the full network.
///
/// The order returned by `params`/`params_mut` is stable; optimizers key
/// their per-parameter state on it.
pub trait Module {
    fn params(&self) -> Vec<&Param>;
    fn params_mut(&mut self) -> Vec<&mut Param>;

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    fn num_params(&self) -> usize {
        self.params().iter().map(|p| p.numel()).sum()
    }
}
