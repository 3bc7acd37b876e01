use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{EegError, Result};
use crate::layers::param::{Module, Param};
use crate::math::ops::{col2im, im2col, matmul, matmul_at, matmul_bt, ConvGeometry};
use crate::math::precision::Precision;
use crate::math::tensor::Tensor;

/// Stride-1 2-D convolution with square kernel and symmetric zero padding,
/// followed by an element-wise activation.
///
/// Input `(batch, in_channels, H, W)`, output `(batch, out_channels, H', W')`
/// with `H' = H + 2·padding − kernel + 1`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    pub padding: usize,
    /// Shape `(out_channels, in_channels, kernel, kernel)`.
    pub weights: Param,
    pub biases: Param,
    pub activator: ActivationFunction,
}

#[derive(Debug, Clone)]
pub struct ConvCache {
    input: Tensor,
    pre: Tensor,
    geometry: ConvGeometry,
}

impl Conv2d {
    pub fn new<R: Rng + ?Sized>(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        padding: usize,
        activation: ActivationFunction,
        rng: &mut R,
    ) -> Conv2d {
        let fan_in = in_channels * kernel * kernel;
        Conv2d {
            in_channels,
            out_channels,
            kernel,
            padding,
            weights: Param::new(Tensor::he(&[out_channels, in_channels, kernel, kernel], fan_in, rng)),
            biases: Param::new(Tensor::zeros(&[out_channels])),
            activator: activation,
        }
    }

    /// Output spatial dims for an `height × width` input.
    pub fn output_dims(&self, height: usize, width: usize) -> Result<(usize, usize)> {
        let g = self.geometry(height, width)?;
        Ok((g.out_height, g.out_width))
    }

    fn geometry(&self, height: usize, width: usize) -> Result<ConvGeometry> {
        ConvGeometry::new(self.in_channels, height, width, self.kernel, self.padding).ok_or_else(|| {
            EegError::InvalidArchitecture(format!(
                "{}x{} kernel with padding {} does not fit a {}x{} input",
                self.kernel, self.kernel, self.padding, height, width
            ))
        })
    }

    pub fn forward(&self, input: &Tensor, precision: Precision) -> Result<(Tensor, ConvCache)> {
        if input.rank() != 4 || input.shape[1] != self.in_channels {
            let mut expected = input.shape.clone();
            expected.resize(4, 0);
            expected[1] = self.in_channels;
            return Err(EegError::shape_mismatch("Conv2d::forward", &expected, &input.shape));
        }
        let (batch, height, width) = (input.shape[0], input.shape[2], input.shape[3]);
        let g = self.geometry(height, width)?;
        let (patch, positions) = (g.patch_len(), g.out_len());
        let image_len = self.in_channels * height * width;

        let x = precision.cast_tensor(input);
        let w = precision.cast(&self.weights.value.data);

        let mut z = Vec::with_capacity(batch * self.out_channels * positions);
        for image in x.data.chunks(image_len) {
            let cols = im2col(image, &g);
            let mut out = matmul(&w, &cols, self.out_channels, patch, positions);
            for (row, b) in out.chunks_mut(positions).zip(&self.biases.value.data) {
                row.iter_mut().for_each(|v| *v += b);
            }
            z.extend_from_slice(&out);
        }
        precision.round_slice(&mut z);

        let pre = Tensor::from_vec(&[batch, self.out_channels, g.out_height, g.out_width], z)?;
        let out = self.activator.apply(&pre);
        Ok((out, ConvCache { input: x, pre, geometry: g }))
    }

    /// Accumulates kernel and bias gradients and returns ∂L/∂z.
    ///
    /// The encoder calls this directly for its first convolution, whose
    /// input gradient is never needed.
    pub fn accumulate_gradients(
        &mut self,
        cache: &ConvCache,
        grad_out: &Tensor,
        precision: Precision,
    ) -> Result<Tensor> {
        grad_out.expect_shape("Conv2d::backward", &cache.pre.shape)?;
        let g = &cache.geometry;
        let (patch, positions) = (g.patch_len(), g.out_len());
        let image_len = g.channels * g.height * g.width;
        let map_len = self.out_channels * positions;

        let mut delta = grad_out.data.clone();
        self.activator.backprop(&cache.pre, &mut delta);
        precision.round_slice(&mut delta);

        let mut w_grad = vec![0.0f32; self.out_channels * patch];
        let mut b_grad = vec![0.0f32; self.out_channels];
        for (image, delta_b) in cache.input.data.chunks(image_len).zip(delta.chunks(map_len)) {
            let cols = im2col(image, g);
            let dw = matmul_bt(delta_b, &cols, self.out_channels, positions, patch);
            for (acc, v) in w_grad.iter_mut().zip(&dw) {
                *acc += v;
            }
            for (acc, row) in b_grad.iter_mut().zip(delta_b.chunks(positions)) {
                *acc += row.iter().sum::<f32>();
            }
        }
        precision.round_slice(&mut w_grad);
        precision.round_slice(&mut b_grad);
        self.weights.accumulate(&w_grad);
        self.biases.accumulate(&b_grad);

        Tensor::from_vec(&cache.pre.shape, delta)
    }

    /// Full backward pass: accumulates parameter gradients and returns ∂L/∂x.
    pub fn backward(&mut self, cache: &ConvCache, grad_out: &Tensor, precision: Precision) -> Result<Tensor> {
        let delta = self.accumulate_gradients(cache, grad_out, precision)?;
        let g = &cache.geometry;
        let (patch, positions) = (g.patch_len(), g.out_len());
        let w = precision.cast(&self.weights.value.data);

        let mut grad_in = Vec::with_capacity(cache.input.numel());
        for delta_b in delta.data.chunks(self.out_channels * positions) {
            let dcols = matmul_at(&w, delta_b, patch, self.out_channels, positions);
            grad_in.extend(col2im(&dcols, g));
        }
        precision.round_slice(&mut grad_in);
        Tensor::from_vec(&cache.input.shape, grad_in)
    }
}

impl Module for Conv2d {
    fn params(&self) -> Vec<&Param> {
        vec![&self.weights, &self.biases]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weights, &mut self.biases]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn output_dims_follow_kernel_and_padding() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let conv = Conv2d::new(4, 8, 5, 2, ActivationFunction::ReLU, &mut rng);
        assert_eq!(conv.output_dims(8, 9).unwrap(), (8, 9));
        let conv = Conv2d::new(4, 8, 4, 1, ActivationFunction::ReLU, &mut rng);
        assert_eq!(conv.output_dims(8, 9).unwrap(), (7, 8));
        assert!(matches!(conv.output_dims(1, 1), Err(EegError::InvalidArchitecture(_))));
    }

    #[test]
    fn single_tap_kernel_is_per_pixel_linear_map() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let mut conv = Conv2d::new(2, 1, 1, 0, ActivationFunction::Identity, &mut rng);
        conv.weights.value.data = vec![2.0, -1.0];
        conv.biases.value.data = vec![0.5];
        let x = Tensor::from_vec(&[1, 2, 1, 2], vec![1.0, 2.0, 3.0, 4.0]).unwrap();
        let (out, _) = conv.forward(&x, Precision::Full).unwrap();
        assert_eq!(out.shape, vec![1, 1, 1, 2]);
        assert_eq!(out.data, vec![2.0 - 3.0 + 0.5, 4.0 - 4.0 + 0.5]);
    }

    #[test]
    fn gradients_match_finite_differences() {
        // Identity activation keeps L = Σ out ⊙ R linear, so central
        // differences are exact up to rounding.
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut conv = Conv2d::new(2, 3, 3, 1, ActivationFunction::Identity, &mut rng);
        let x = Tensor::uniform(&[2, 2, 4, 5], 1.0, &mut rng);
        let (out, cache) = conv.forward(&x, Precision::Full).unwrap();
        let r = Tensor::uniform(&out.shape, 1.0, &mut rng);

        let loss = |c: &Conv2d, input: &Tensor| -> f32 {
            let (o, _) = c.forward(input, Precision::Full).unwrap();
            o.data.iter().zip(&r.data).map(|(a, b)| a * b).sum()
        };

        conv.zero_grad();
        let grad_in = conv.backward(&cache, &r, Precision::Full).unwrap();

        let eps = 1e-2;
        for idx in [0, 5, 17, 40, 53] {
            let mut probe = conv.clone();
            probe.weights.value.data[idx] += eps;
            let plus = loss(&probe, &x);
            probe.weights.value.data[idx] -= 2.0 * eps;
            let minus = loss(&probe, &x);
            let numeric = (plus - minus) / (2.0 * eps);
            let analytic = conv.weights.grad.data[idx];
            assert!((numeric - analytic).abs() < 1e-2 * (1.0 + analytic.abs()), "w[{idx}]: {numeric} vs {analytic}");
        }

        for idx in [0, 7, 21, 39, 79] {
            let mut xp = x.clone();
            xp.data[idx] += eps;
            let plus = loss(&conv, &xp);
            xp.data[idx] -= 2.0 * eps;
            let minus = loss(&conv, &xp);
            let numeric = (plus - minus) / (2.0 * eps);
            assert!((numeric - grad_in.data[idx]).abs() < 1e-2 * (1.0 + numeric.abs()), "x[{idx}]");
        }

        let bias_sum: f32 = r.data[..20].iter().chain(&r.data[60..80]).sum();
        assert!((conv.biases.grad.data[0] - bias_sum).abs() < 1e-3);
    }
}
