use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use half::{bf16, f16};
use serde::{Deserialize, Serialize};

use crate::error::EegError;
use crate::math::tensor::Tensor;

/// Arithmetic precision used for the forward and backward passes.
///
/// Master parameters and optimizer state always stay in `f32`. In the
/// reduced modes the inputs, weights and outputs of every matrix product,
/// as well as the gradients flowing backward, are rounded through the
/// narrower format. Values beyond its range become `±inf`, which is what
/// the loss scaler watches for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    Full,
    #[default]
    Half,
    #[serde(rename = "bf16")]
    BFloat16,
}

impl Precision {
    #[inline]
    pub fn round(self, x: f32) -> f32 {
        match self {
            Precision::Full => x,
            Precision::Half => f16::from_f32(x).to_f32(),
            Precision::BFloat16 => bf16::from_f32(x).to_f32(),
        }
    }

    pub fn round_slice(self, values: &mut [f32]) {
        if self.is_reduced() {
            values.iter_mut().for_each(|x| *x = self.round(*x));
        }
    }

    /// Borrows `values` unchanged in full precision, otherwise returns a
    /// rounded copy.
    pub fn cast<'a>(self, values: &'a [f32]) -> Cow<'a, [f32]> {
        if self.is_reduced() {
            Cow::Owned(values.iter().map(|&x| self.round(x)).collect())
        } else {
            Cow::Borrowed(values)
        }
    }

    pub fn cast_tensor(self, tensor: &Tensor) -> Tensor {
        if self.is_reduced() {
            tensor.map(|x| self.round(x))
        } else {
            tensor.clone()
        }
    }

    pub fn is_reduced(self) -> bool {
        self != Precision::Full
    }
}

impl fmt::Display for Precision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Precision::Full => write!(f, "full"),
            Precision::Half => write!(f, "half"),
            Precision::BFloat16 => write!(f, "bf16"),
        }
    }
}

impl FromStr for Precision {
    type Err = EegError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "f32" => Ok(Precision::Full),
            "half" | "f16" => Ok(Precision::Half),
            "bf16" | "bfloat16" => Ok(Precision::BFloat16),
            other => Err(EegError::Config(format!("unknown precision '{other}' (expected full, half or bf16)"))),
        }
    }
}
