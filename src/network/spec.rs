use serde::{Serialize, Deserialize};

use crate::error::{EegError, Result};

/// Describes one convolution in the segment encoder.
///
/// Fields:
/// - `out_channels` — feature maps produced by this layer
/// - `kernel`       — square kernel side
/// - `padding`      — zero padding on every border (stride is always 1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvLayerSpec {
    pub out_channels: usize,
    pub kernel: usize,
    pub padding: usize,
}

impl ConvLayerSpec {
    pub const fn new(out_channels: usize, kernel: usize, padding: usize) -> Self {
        ConvLayerSpec { out_channels, kernel, padding }
    }
}

/// A fully serializable description of the segment CNN + LSTM classifier.
///
/// The input side (`segments`, `bands`, `rows`, `cols`) fixes the trial
/// shape the model accepts; every batch must match it exactly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchitectureSpec {
    /// Time segments per trial; also the LSTM sequence length.
    pub segments: usize,
    /// Electrode grid height.
    pub rows: usize,
    /// Electrode grid width.
    pub cols: usize,
    /// Frequency bands per grid cell; the encoder's input channels.
    pub bands: usize,
    pub num_classes: usize,
    /// Encoder convolutions, input → output; each is followed by ReLU.
    pub conv_layers: Vec<ConvLayerSpec>,
    /// Max-pool window applied once after the last convolution.
    pub pool: usize,
    /// Width of the per-segment embedding.
    pub embedding_dim: usize,
    /// LSTM hidden state width.
    pub hidden_size: usize,
}

impl Default for ArchitectureSpec {
    fn default() -> Self {
        ArchitectureSpec {
            segments: 6,
            rows: 8,
            cols: 9,
            bands: 4,
            num_classes: 4,
            conv_layers: vec![
                ConvLayerSpec::new(64, 5, 2),
                ConvLayerSpec::new(128, 4, 1),
                ConvLayerSpec::new(256, 4, 1),
                ConvLayerSpec::new(64, 1, 0),
            ],
            pool: 2,
            embedding_dim: 512,
            hidden_size: 128,
        }
    }
}

impl ArchitectureSpec {
    /// Shape of one segment as the encoder sees it: `[bands, rows, cols]`.
    pub fn segment_shape(&self) -> [usize; 3] {
        [self.bands, self.rows, self.cols]
    }

    /// Shape of one trial: `[segments, bands, rows, cols]`.
    pub fn trial_shape(&self) -> [usize; 4] {
        [self.segments, self.bands, self.rows, self.cols]
    }

    /// Rejects zero-sized dimensions. Spatial collapse through the layer
    /// stack is detected later by the encoder's shape probe.
    pub fn validate(&self) -> Result<()> {
        let named = [
            ("segments", self.segments),
            ("rows", self.rows),
            ("cols", self.cols),
            ("bands", self.bands),
            ("num_classes", self.num_classes),
            ("pool", self.pool),
            ("embedding_dim", self.embedding_dim),
            ("hidden_size", self.hidden_size),
        ];
        if let Some((name, _)) = named.iter().find(|(_, v)| *v == 0) {
            return Err(EegError::InvalidArchitecture(format!("{name} must be positive")));
        }
        if self.conv_layers.is_empty() {
            return Err(EegError::InvalidArchitecture("at least one convolution is required".into()));
        }
        if let Some(layer) = self.conv_layers.iter().find(|l| l.out_channels == 0 || l.kernel == 0) {
            return Err(EegError::InvalidArchitecture(format!("degenerate convolution {layer:?}")));
        }
        Ok(())
    }
}
