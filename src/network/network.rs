use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::activation::activation::ActivationFunction;
use crate::error::{EegError, Result};
use crate::layers::dense::{Linear, LinearCache};
use crate::layers::lstm::{Lstm, LstmCache};
use crate::layers::param::{Module, Param};
use crate::math::precision::Precision;
use crate::math::tensor::Tensor;
use crate::network::encoder::{EncoderCache, SegmentEncoder};
use crate::network::metadata::ModelMetadata;
use crate::network::spec::ArchitectureSpec;

/// Trial classifier: shared segment encoder → LSTM over the segment
/// embeddings → linear head producing one score per class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EegNet {
    pub spec: ArchitectureSpec,
    pub encoder: SegmentEncoder,
    pub lstm: Lstm,
    pub head: Linear,
    #[serde(default)]
    pub metadata: ModelMetadata,
}

/// Everything `backward` needs from one `forward` call.
#[derive(Debug, Clone)]
pub struct NetCache {
    segments: Vec<EncoderCache>,
    lstm: LstmCache,
    head: LinearCache,
}

impl NetCache {
    /// Number of embeddings that were fed to the sequence model.
    pub fn sequence_len(&self) -> usize {
        self.segments.len()
    }
}

impl EegNet {
    /// Builds a freshly initialized model. The same `seed` always yields the
    /// same parameters.
    pub fn new(spec: &ArchitectureSpec, seed: u64) -> Result<EegNet> {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let encoder = SegmentEncoder::new(spec, &mut rng)?;
        let lstm = Lstm::new(spec.embedding_dim, spec.hidden_size, &mut rng);
        let head = Linear::new(spec.hidden_size, spec.num_classes, ActivationFunction::Identity, &mut rng);
        Ok(EegNet {
            spec: spec.clone(),
            encoder,
            lstm,
            head,
            metadata: ModelMetadata::default(),
        })
    }

    /// Forward pass over a `(batch, segments, bands, rows, cols)` batch;
    /// returns `(batch, num_classes)` logits and the cache for `backward`.
    pub fn forward(&self, batch: &Tensor, precision: Precision) -> Result<(Tensor, NetCache)> {
        let [segments, bands, rows, cols] = self.spec.trial_shape();
        let n = batch.shape.first().copied().unwrap_or(0);
        batch.expect_shape("EegNet::forward", &[n, segments, bands, rows, cols])?;

        let segment_len = bands * rows * cols;
        let trial_len = segments * segment_len;
        let emb_dim = self.spec.embedding_dim;

        // ── Encode each segment position with the shared encoder ──────────
        let mut caches = Vec::with_capacity(segments);
        let mut sequence = vec![0.0f32; n * segments * emb_dim];
        for s in 0..segments {
            let mut seg = Vec::with_capacity(n * segment_len);
            for trial in batch.data.chunks(trial_len) {
                seg.extend_from_slice(&trial[s * segment_len..(s + 1) * segment_len]);
            }
            let seg = Tensor::from_vec(&[n, bands, rows, cols], seg)?;
            let (embedding, cache) = self.encoder.forward(&seg, precision)?;
            for (b, row) in embedding.data.chunks(emb_dim).enumerate() {
                let start = (b * segments + s) * emb_dim;
                sequence[start..start + emb_dim].copy_from_slice(row);
            }
            caches.push(cache);
        }
        let sequence = Tensor::from_vec(&[n, segments, emb_dim], sequence)?;

        // ── Aggregate and classify ────────────────────────────────────────
        let (hidden, lstm_cache) = self.lstm.forward(&sequence, precision)?;
        let (logits, head_cache) = self.head.forward(&hidden, precision)?;

        Ok((logits, NetCache { segments: caches, lstm: lstm_cache, head: head_cache }))
    }

    /// Backpropagates ∂L/∂logits through the head, the LSTM and every segment
    /// encoding, accumulating into the parameter gradients.
    pub fn backward(&mut self, cache: &NetCache, grad_logits: &Tensor, precision: Precision) -> Result<()> {
        let grad_hidden = self.head.backward(&cache.head, grad_logits, precision)?;
        let grad_seq = self.lstm.backward(&cache.lstm, &grad_hidden, precision)?;

        let (n, segments, emb_dim) = (grad_seq.shape[0], grad_seq.shape[1], grad_seq.shape[2]);
        for (s, seg_cache) in cache.segments.iter().enumerate().rev() {
            let mut grad = Vec::with_capacity(n * emb_dim);
            for b in 0..n {
                let start = (b * segments + s) * emb_dim;
                grad.extend_from_slice(&grad_seq.data[start..start + emb_dim]);
            }
            let grad = Tensor::from_vec(&[n, emb_dim], grad)?;
            self.encoder.backward(seg_cache, &grad, precision)?;
        }
        Ok(())
    }

    /// Full-precision logits without keeping a cache.
    pub fn logits(&self, batch: &Tensor) -> Result<Tensor> {
        Ok(self.forward(batch, Precision::Full)?.0)
    }

    /// Serializes the model (architecture, parameters, metadata) to a
    /// pretty-printed JSON file.
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Deserializes a model previously written by `save_json`.
    ///
    /// The stored architecture is re-probed so a file whose encoder does not
    /// agree with its own spec is rejected.
    pub fn load_json(path: impl AsRef<Path>) -> Result<EegNet> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        let mut net: EegNet = serde_json::from_reader(reader)?;
        let probe = EegNet::new(&net.spec, 0)?;
        if probe.encoder.flat_features != net.encoder.flat_features {
            return Err(EegError::shape_mismatch(
                "EegNet::load_json",
                &[probe.encoder.flat_features],
                &[net.encoder.flat_features],
            ));
        }
        let expected: Vec<Vec<usize>> = probe.params().iter().map(|p| p.value.shape.clone()).collect();
        let actual: Vec<Vec<usize>> = net.params().iter().map(|p| p.value.shape.clone()).collect();
        if expected != actual {
            return Err(EegError::InvalidArchitecture("stored parameters do not match the stored spec".into()));
        }
        net.zero_grad();
        Ok(net)
    }
}

impl Module for EegNet {
    fn params(&self) -> Vec<&Param> {
        let mut params = self.encoder.params();
        params.extend(self.lstm.params());
        params.extend(self.head.params());
        params
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut params = self.encoder.params_mut();
        params.extend(self.lstm.params_mut());
        params.extend(self.head.params_mut());
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::spec::ConvLayerSpec;

    fn tiny_spec() -> ArchitectureSpec {
        ArchitectureSpec {
            segments: 3,
            conv_layers: vec![ConvLayerSpec::new(4, 3, 1), ConvLayerSpec::new(4, 1, 0)],
            embedding_dim: 8,
            hidden_size: 6,
            ..ArchitectureSpec::default()
        }
    }

    fn batch(spec: &ArchitectureSpec, n: usize, seed: u64) -> Tensor {
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let mut shape = vec![n];
        shape.extend(spec.trial_shape());
        Tensor::uniform(&shape, 1.0, &mut rng)
    }

    #[test]
    fn one_embedding_per_segment_for_any_batch_size() {
        let spec = tiny_spec();
        let net = EegNet::new(&spec, 7).unwrap();
        for n in [1, 2, 5] {
            let (logits, cache) = net.forward(&batch(&spec, n, 1), Precision::Half).unwrap();
            assert_eq!(cache.sequence_len(), spec.segments);
            assert_eq!(logits.shape, vec![n, spec.num_classes]);
        }
    }

    #[test]
    fn same_seed_same_parameters() {
        let a = EegNet::new(&tiny_spec(), 7).unwrap();
        let b = EegNet::new(&tiny_spec(), 7).unwrap();
        let c = EegNet::new(&tiny_spec(), 8).unwrap();
        let values = |n: &EegNet| n.params().iter().map(|p| p.value.clone()).collect::<Vec<_>>();
        assert_eq!(values(&a), values(&b));
        assert_ne!(values(&a), values(&c));
    }

    #[test]
    fn encoder_parameters_are_shared_across_segments() {
        let spec = tiny_spec();
        let one = EegNet::new(&spec, 1).unwrap();
        let more = EegNet::new(&ArchitectureSpec { segments: 6, ..spec }, 1).unwrap();
        assert_eq!(one.num_params(), more.num_params());
    }

    #[test]
    fn rejects_wrong_segment_count() {
        let spec = tiny_spec();
        let net = EegNet::new(&spec, 7).unwrap();
        let bad = Tensor::zeros(&[2, 4, 4, 8, 9]);
        assert!(matches!(net.forward(&bad, Precision::Full), Err(EegError::ShapeMismatch { .. })));
    }

    #[test]
    fn save_then_load_reproduces_outputs() {
        let spec = tiny_spec();
        let mut net = EegNet::new(&spec, 3).unwrap();
        net.metadata.description = Some("round trip".into());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.json");
        net.save_json(&path).unwrap();

        let loaded = EegNet::load_json(&path).unwrap();
        let x = batch(&spec, 4, 9);
        assert_eq!(net.logits(&x).unwrap(), loaded.logits(&x).unwrap());
        assert_eq!(loaded.metadata, net.metadata);
    }

    #[test]
    fn backward_fills_every_gradient() {
        let spec = tiny_spec();
        let mut net = EegNet::new(&spec, 5).unwrap();
        net.zero_grad();
        let (logits, cache) = net.forward(&batch(&spec, 3, 2), Precision::Full).unwrap();
        let grad = logits.map(|_| 0.1);
        net.backward(&cache, &grad, Precision::Full).unwrap();
        for (i, p) in net.params().iter().enumerate() {
            assert_eq!(p.grad.shape, p.value.shape, "param {i}");
            assert!(p.grad.all_finite(), "param {i}");
        }
        // head bias gradient is the column sum of ∂L/∂logits
        let head_bias = &net.head.biases.grad.data;
        assert!(head_bias.iter().all(|g| (g - 0.3).abs() < 1e-5));
    }
}
