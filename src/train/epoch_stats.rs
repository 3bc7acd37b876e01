use std::fmt;

use serde::{Deserialize, Serialize};

/// Per-epoch training statistics emitted by `train_loop`.
///
/// When a `progress_tx` channel is configured in `TrainConfig`, the training
/// loop sends one `EpochStats` value at the end of every completed epoch.
/// `Display` renders the console line:
/// `Epoch [3/100], Loss: 0.1234, Time: 1.23 seconds`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochStats {
    /// 1-based epoch number.
    pub epoch: usize,
    /// Epoch budget of this run.
    pub total_epochs: usize,
    /// Mean of the batch losses of this epoch.
    pub mean_loss: f64,
    /// Fraction of training trials the model classified correctly while
    /// training on them, in [0, 1].
    pub train_accuracy: f64,
    /// Wall-clock duration of this epoch.
    pub elapsed_secs: f64,
    /// Optimizer steps skipped because a gradient overflowed.
    pub skipped_steps: usize,
    /// Loss scale in effect at the end of the epoch (1 without scaling).
    pub loss_scale: f32,
}

impl fmt::Display for EpochStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Epoch [{}/{}], Loss: {:.4}, Time: {:.2} seconds",
            self.epoch, self.total_epochs, self.mean_loss, self.elapsed_secs
        )
    }
}
