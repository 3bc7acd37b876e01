pub mod adam;
pub mod grad_scaler;
pub mod sgd;

use serde::{Deserialize, Serialize};

use crate::layers::param::Param;

pub use adam::Adam;
pub use grad_scaler::{GradScaler, StepOutcome};
pub use sgd::Sgd;

/// Applies one update to a list of parameters from their accumulated
/// gradients. Callers must pass parameters in the same order every step.
pub trait Optimizer: Send {
    fn step(&mut self, params: &mut [&mut Param]);
}

/// Serializable optimizer choice.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OptimizerConfig {
    Adam { learning_rate: f32 },
    Sgd { learning_rate: f32 },
}

impl OptimizerConfig {
    pub fn build(&self) -> Box<dyn Optimizer> {
        match *self {
            OptimizerConfig::Adam { learning_rate } => Box::new(Adam::new(learning_rate)),
            OptimizerConfig::Sgd { learning_rate } => Box::new(Sgd::new(learning_rate)),
        }
    }

    pub fn learning_rate(&self) -> f32 {
        match *self {
            OptimizerConfig::Adam { learning_rate } | OptimizerConfig::Sgd { learning_rate } => learning_rate,
        }
    }

    pub fn with_learning_rate(self, learning_rate: f32) -> OptimizerConfig {
        match self {
            OptimizerConfig::Adam { .. } => OptimizerConfig::Adam { learning_rate },
            OptimizerConfig::Sgd { .. } => OptimizerConfig::Sgd { learning_rate },
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        OptimizerConfig::Adam { learning_rate: 1e-3 }
    }
}
