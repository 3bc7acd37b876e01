use serde::{Deserialize, Serialize};

use crate::error::{EegError, Result};
use crate::math::tensor::Tensor;

/// Non-overlapping `window × window` max pooling (stride = window, floor).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaxPool2d {
    pub window: usize,
}

#[derive(Debug, Clone)]
pub struct PoolCache {
    input_shape: Vec<usize>,
    // flat input index of each output's maximum
    argmax: Vec<usize>,
}

impl MaxPool2d {
    pub fn new(window: usize) -> MaxPool2d {
        MaxPool2d { window }
    }

    pub fn output_dims(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        if self.window == 0 || height < self.window || width < self.window {
            return Err(EegError::InvalidArchitecture(format!(
                "{0}x{0} pooling does not fit a {1}x{2} feature map",
                self.window, height, width
            )));
        }
        Ok((height / self.window, width / self.window))
    }

    pub fn forward(&self, input: &Tensor) -> Result<(Tensor, PoolCache)> {
        if input.rank() != 4 {
            return Err(EegError::shape_mismatch("MaxPool2d::forward", &[0, 0, 0, 0], &input.shape));
        }
        let (batch, channels, height, width) = (input.shape[0], input.shape[1], input.shape[2], input.shape[3]);
        let (oh, ow) = self.output_dims(height, width)?;

        let mut out = Vec::with_capacity(batch * channels * oh * ow);
        let mut argmax = Vec::with_capacity(out.capacity());
        for plane in 0..batch * channels {
            let base = plane * height * width;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = base + oy * self.window * width + ox * self.window;
                    for dy in 0..self.window {
                        for dx in 0..self.window {
                            let idx = base + (oy * self.window + dy) * width + ox * self.window + dx;
                            // first maximum wins on ties
                            if input.data[idx] > input.data[best] {
                                best = idx;
                            }
                        }
                    }
                    out.push(input.data[best]);
                    argmax.push(best);
                }
            }
        }

        let output = Tensor::from_vec(&[batch, channels, oh, ow], out)?;
        Ok((output, PoolCache { input_shape: input.shape.clone(), argmax }))
    }

    /// Routes each output gradient to the input position that won the max.
    pub fn backward(&self, cache: &PoolCache, grad_out: &Tensor) -> Result<Tensor> {
        if grad_out.numel() != cache.argmax.len() {
            return Err(EegError::shape_mismatch("MaxPool2d::backward", &[cache.argmax.len()], &[grad_out.numel()]));
        }
        let mut grad_in = Tensor::zeros(&cache.input_shape);
        for (&idx, &g) in cache.argmax.iter().zip(&grad_out.data) {
            grad_in.data[idx] += g;
        }
        Ok(grad_in)
    }
}
