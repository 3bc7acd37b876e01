use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::activation::activation::ActivationFunction;
use crate::error::{EegError, Result};
use crate::layers::conv::{Conv2d, ConvCache};
use crate::layers::dense::{Linear, LinearCache};
use crate::layers::param::{Module, Param};
use crate::layers::pool::{MaxPool2d, PoolCache};
use crate::math::precision::Precision;
use crate::math::tensor::Tensor;
use crate::network::spec::ArchitectureSpec;

/// Per-segment spatial encoder: ReLU convolutions → max-pool → flatten →
/// ReLU projection to `embedding_dim`.
///
/// One instance is shared by every segment position of a trial.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SegmentEncoder {
    pub convs: Vec<Conv2d>,
    pub pool: MaxPool2d,
    pub projection: Linear,
    /// `[bands, rows, cols]` this encoder was built for.
    pub input_shape: [usize; 3],
    /// Width of the flattened pooled feature map, fixed at construction.
    pub flat_features: usize,
}

#[derive(Debug, Clone)]
pub struct EncoderCache {
    convs: Vec<ConvCache>,
    pool: PoolCache,
    pooled_shape: Vec<usize>,
    projection: LinearCache,
}

impl SegmentEncoder {
    pub fn new<R: Rng + ?Sized>(spec: &ArchitectureSpec, rng: &mut R) -> Result<SegmentEncoder> {
        spec.validate()?;
        let mut convs = Vec::with_capacity(spec.conv_layers.len());
        let mut in_channels = spec.bands;
        for layer in &spec.conv_layers {
            convs.push(Conv2d::new(in_channels, layer.out_channels, layer.kernel, layer.padding, ActivationFunction::ReLU, rng));
            in_channels = layer.out_channels;
        }
        let pool = MaxPool2d::new(spec.pool);

        let flat_features = Self::probe_flat_features(&convs, &pool, spec.segment_shape())?;
        debug!(flat_features, "segment encoder shape probe");

        let projection = Linear::new(flat_features, spec.embedding_dim, ActivationFunction::ReLU, rng);
        Ok(SegmentEncoder {
            convs,
            pool,
            projection,
            input_shape: spec.segment_shape(),
            flat_features,
        })
    }

    /// Pushes one all-zero segment through the convolutions and the pool and
    /// measures the flattened result.
    fn probe_flat_features(convs: &[Conv2d], pool: &MaxPool2d, [bands, rows, cols]: [usize; 3]) -> Result<usize> {
        let mut x = Tensor::zeros(&[1, bands, rows, cols]);
        for (i, conv) in convs.iter().enumerate() {
            let (out, _) = conv.forward(&x, Precision::Full).map_err(|e| {
                EegError::InvalidArchitecture(format!("{rows}x{cols} input collapses at convolution {}: {e}", i + 1))
            })?;
            x = out;
        }
        let (pooled, _) = pool.forward(&x).map_err(|e| {
            EegError::InvalidArchitecture(format!("{rows}x{cols} input collapses at pooling: {e}"))
        })?;
        match pooled.numel() {
            0 => Err(EegError::InvalidArchitecture(format!("{rows}x{cols} input leaves no features"))),
            n => Ok(n),
        }
    }

    /// `(batch, bands, rows, cols)` → `(batch, embedding_dim)`.
    pub fn forward(&self, segment: &Tensor, precision: Precision) -> Result<(Tensor, EncoderCache)> {
        let [bands, rows, cols] = self.input_shape;
        let batch = segment.shape.first().copied().unwrap_or(0);
        segment.expect_shape("SegmentEncoder::forward", &[batch, bands, rows, cols])?;

        let mut caches = Vec::with_capacity(self.convs.len());
        let mut x = segment.clone();
        for conv in &self.convs {
            let (out, cache) = conv.forward(&x, precision)?;
            caches.push(cache);
            x = out;
        }
        let (pooled, pool_cache) = self.pool.forward(&x)?;
        let pooled_shape = pooled.shape.clone();
        let flat = pooled.reshape(&[batch, self.flat_features])?;
        let (embedding, projection) = self.projection.forward(&flat, precision)?;

        Ok((embedding, EncoderCache { convs: caches, pool: pool_cache, pooled_shape, projection }))
    }

    /// Accumulates gradients for every encoder parameter from ∂L/∂embedding.
    /// The input gradient is not propagated: segments are leaves.
    pub fn backward(&mut self, cache: &EncoderCache, grad: &Tensor, precision: Precision) -> Result<()> {
        let grad_flat = self.projection.backward(&cache.projection, grad, precision)?;
        let mut g = self.pool.backward(&cache.pool, &grad_flat.reshape(&cache.pooled_shape)?)?;
        for (i, (conv, conv_cache)) in self.convs.iter_mut().zip(&cache.convs).enumerate().rev() {
            if i == 0 {
                conv.accumulate_gradients(conv_cache, &g, precision)?;
            } else {
                g = conv.backward(conv_cache, &g, precision)?;
            }
        }
        Ok(())
    }
}

impl Module for SegmentEncoder {
    fn params(&self) -> Vec<&Param> {
        let mut params: Vec<&Param> = self.convs.iter().flat_map(|c| c.params()).collect();
        params.extend(self.projection.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params: Vec<&mut Param> = self.convs.iter_mut().flat_map(|c| c.params_mut()).collect();
        params.extend(self.projection.params_mut());
        params
    }
}
