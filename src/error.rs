//! Error type shared by every fallible operation in the crate.

use thiserror::Error;

/// Errors raised while loading data, building a model or training it.
#[derive(Debug, Error)]
pub enum EegError {
    /// A tensor or file does not have the dimensions the consumer expects.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        /// Where the mismatch was detected.
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// The layer stack cannot be built for the configured input dims.
    #[error("invalid architecture: {0}")]
    InvalidArchitecture(String),

    /// A label is not an integral class index in `[0, num_classes)`.
    #[error("invalid label {value} at trial {index}")]
    InvalidLabel { index: usize, value: f64 },

    /// The training loss became NaN or infinite.
    #[error("non-finite loss at epoch {epoch}, batch {batch}")]
    NonFiniteLoss { epoch: usize, batch: usize },

    /// Malformed or unsupported `.npy` content.
    #[error("npy: {0}")]
    Npy(String),

    /// A configuration value is out of range or inconsistent.
    #[error("config: {0}")]
    Config(String),

    /// The training state machine received an event it cannot handle.
    #[error("invalid transition from {from} on {event}")]
    InvalidTransition { from: String, event: &'static str },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl EegError {
    pub fn shape_mismatch(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        EegError::ShapeMismatch {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EegError>;
