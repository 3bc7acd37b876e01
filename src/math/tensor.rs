use rand::Rng;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::error::{EegError, Result};

/// Dense row-major `f32` tensor of arbitrary rank.
///
/// Every layer in the crate stores both parameters and activations in this
/// type; the last dimension is contiguous in `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![0.0; shape.iter().product()],
        }
    }

    /// Wraps `data` as a tensor of `shape`; the element counts must agree.
    pub fn from_vec(shape: &[usize], data: Vec<f32>) -> Result<Tensor> {
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(EegError::shape_mismatch("Tensor::from_vec", &[expected], &[data.len()]));
        }
        Ok(Tensor { shape: shape.to_vec(), data })
    }

    /// Samples every element from U(-bound, bound).
    pub fn uniform<R: Rng + ?Sized>(shape: &[usize], bound: f32, rng: &mut R) -> Tensor {
        let mut res = Tensor::zeros(shape);
        for x in res.data.iter_mut() {
            *x = (rng.gen::<f32>() * 2.0 - 1.0) * bound;
        }
        res
    }

    /// He initialization: samples from N(0, sqrt(2 / fan_in)).
    ///
    /// Recommended before ReLU layers. The variance 2/fan_in accounts for
    /// the fact that ReLU zeroes half of its inputs on average.
    pub fn he<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        Tensor::normal(shape, (2.0 / fan_in as f32).sqrt(), rng)
    }

    /// Xavier (Glorot) initialization: samples from N(0, sqrt(1 / fan_in)).
    ///
    /// Used for layers without a rectifier (the classifier head).
    pub fn xavier<R: Rng + ?Sized>(shape: &[usize], fan_in: usize, rng: &mut R) -> Tensor {
        Tensor::normal(shape, (1.0 / fan_in as f32).sqrt(), rng)
    }

    fn normal<R: Rng + ?Sized>(shape: &[usize], std_dev: f32, rng: &mut R) -> Tensor {
        let mut res = Tensor::zeros(shape);
        for x in res.data.iter_mut() {
            *x = sample_standard_normal(rng) * std_dev;
        }
        res
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    pub fn rank(&self) -> usize {
        self.shape.len()
    }

    /// Returns a tensor with the same data and a new shape of equal size.
    pub fn reshape(self, shape: &[usize]) -> Result<Tensor> {
        Tensor::from_vec(shape, self.data)
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f32) -> f32,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    pub fn fill(&mut self, value: f32) {
        self.data.iter_mut().for_each(|x| *x = value);
    }

    pub fn all_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Fails with `ShapeMismatch` unless the shape equals `expected`.
    pub fn expect_shape(&self, context: &str, expected: &[usize]) -> Result<()> {
        if self.shape != expected {
            return Err(EegError::shape_mismatch(context, expected, &self.shape));
        }
        Ok(())
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor { shape: vec![0], data: vec![] }
    }
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f32 {
    // Uniform samples in (0, 1] to avoid log(0).
    let u1: f32 = 1.0 - rng.gen::<f32>();
    let u2: f32 = 1.0 - rng.gen::<f32>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
