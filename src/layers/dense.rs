use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{EegError, Result};
use crate::layers::param::{Module, Param};
use crate::math::ops::{add_column_sums, matmul, matmul_at, matmul_bt};
use crate::math::precision::Precision;
use crate::math::tensor::Tensor;

/// Fully connected layer: `a = σ(x·Wᵀ + b)` over a `(batch, in)` input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    /// Shape `(out, in)`.
    pub weights: Param,
    pub biases: Param,
    pub activator: ActivationFunction,
}

/// Values saved by `forward` for the matching `backward` call.
#[derive(Debug, Clone)]
pub struct LinearCache {
    input: Tensor,
    // pre-activation z, needed for σ'(z)
    pre: Tensor,
}

impl Linear {
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Linear {
        let weights = match activation {
            ActivationFunction::ReLU => Tensor::he(&[out_features, in_features], in_features, rng),
            _ => Tensor::xavier(&[out_features, in_features], in_features, rng),
        };
        Linear {
            in_features,
            out_features,
            weights: Param::new(weights),
            biases: Param::new(Tensor::zeros(&[out_features])),
            activator: activation,
        }
    }

    pub fn forward(&self, input: &Tensor, precision: Precision) -> Result<(Tensor, LinearCache)> {
        if input.rank() != 2 || input.shape[1] != self.in_features {
            return Err(EegError::shape_mismatch(
                "Linear::forward",
                &[input.shape.first().copied().unwrap_or(0), self.in_features],
                &input.shape,
            ));
        }
        let batch = input.shape[0];
        let x = precision.cast_tensor(input);
        let w = precision.cast(&self.weights.value.data);

        let mut z = matmul_bt(&x.data, &w, batch, self.in_features, self.out_features);
        for row in z.chunks_mut(self.out_features) {
            for (v, b) in row.iter_mut().zip(&self.biases.value.data) {
                *v += b;
            }
        }
        precision.round_slice(&mut z);

        let pre = Tensor::from_vec(&[batch, self.out_features], z)?;
        let out = self.activator.apply(&pre);
        Ok((out, LinearCache { input: x, pre }))
    }

    /// Accumulates ∂L/∂W and ∂L/∂b for one batch and returns ∂L/∂z.
    ///
    /// `grad_out` is ∂L/∂a for this layer (error in activation space).
    pub fn accumulate_gradients(
        &mut self,
        cache: &LinearCache,
        grad_out: &Tensor,
        precision: Precision,
    ) -> Result<Tensor> {
        grad_out.expect_shape("Linear::backward", &cache.pre.shape)?;
        let batch = cache.pre.shape[0];

        // δ = error ⊙ σ'(z)
        let mut delta = grad_out.data.clone();
        self.activator.backprop(&cache.pre, &mut delta);
        precision.round_slice(&mut delta);

        let mut w_grad = matmul_at(&delta, &cache.input.data, self.out_features, batch, self.in_features);
        precision.round_slice(&mut w_grad);
        let mut b_grad = vec![0.0f32; self.out_features];
        add_column_sums(&delta, batch, self.out_features, &mut b_grad);
        precision.round_slice(&mut b_grad);

        self.weights.accumulate(&w_grad);
        self.biases.accumulate(&b_grad);

        Tensor::from_vec(&[batch, self.out_features], delta)
    }

    /// Full backward pass: accumulates parameter gradients and returns ∂L/∂x.
    pub fn backward(&mut self, cache: &LinearCache, grad_out: &Tensor, precision: Precision) -> Result<Tensor> {
        let delta = self.accumulate_gradients(cache, grad_out, precision)?;
        let batch = delta.shape[0];
        let w = precision.cast(&self.weights.value.data);
        let mut grad_in = matmul(&delta.data, &w, batch, self.out_features, self.in_features);
        precision.round_slice(&mut grad_in);
        Tensor::from_vec(&[batch, self.in_features], grad_in)
    }
}

impl Module for Linear {
    fn params(&self) -> Vec<&Param> {
        vec![&self.weights, &self.biases]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weights, &mut self.biases]
    }
}
