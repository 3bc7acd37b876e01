use serde::{Serialize, Deserialize};

use crate::math::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationFunction {
    ReLU,
    Sigmoid,
    Tanh,
    /// Raw scores; used by the classifier head, whose softmax lives in the loss.
    Identity,
}

impl ActivationFunction {
    pub fn function(&self, x: f32) -> f32 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { x } else { 0.0 },
            ActivationFunction::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Identity => x,
        }
    }

    /// Element-wise derivative, evaluated at the pre-activation value `x`.
    pub fn derivative(&self, x: f32) -> f32 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::Sigmoid => {
                let fx = self.function(x);
                fx * (1.0 - fx)
            }
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::Identity => 1.0,
        }
    }

    pub fn apply(&self, pre: &Tensor) -> Tensor {
        match self {
            ActivationFunction::Identity => pre.clone(),
            _ => pre.map(|x| self.function(x)),
        }
    }

    /// Multiplies `grad` (∂L/∂a) by σ'(z) in place, giving ∂L/∂z.
    pub fn backprop(&self, pre: &Tensor, grad: &mut [f32]) {
        if *self == ActivationFunction::Identity {
            return;
        }
        for (g, &z) in grad.iter_mut().zip(&pre.data) {
            *g *= self.derivative(z);
        }
    }
}
