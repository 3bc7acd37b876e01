use std::fmt;

use crate::error::{EegError, Result};

/// Why the epoch loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// An epoch's mean loss fell below the early-stop threshold.
    EarlyStop,
    /// The last budgeted epoch completed.
    EpochBudget,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::EarlyStop => write!(f, "early stop"),
            StopReason::EpochBudget => write!(f, "epoch budget"),
        }
    }
}

/// Lifecycle of one training run.
///
/// ```text
/// Training{0} ──epoch done──▶ EpochComplete{0, loss} ──continue──▶ Training{1} ...
///                                      │
///                                      └──stop──▶ Stopped{reason, n} ──persist──▶ Persisted
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrainState {
    /// Running the batches of the 0-based `epoch`.
    Training { epoch: usize },
    EpochComplete { epoch: usize, mean_loss: f64 },
    Stopped { reason: StopReason, epochs_run: usize },
    /// Final parameters were handed to the checkpoint writer.
    Persisted,
}

/// `mean_loss < threshold`, the only early-stop condition.
pub fn early_stop_triggered(mean_loss: f64, threshold: f64) -> bool {
    mean_loss < threshold
}

impl TrainState {
    pub fn initial() -> TrainState {
        TrainState::Training { epoch: 0 }
    }

    /// `Training{e}` → `EpochComplete{e, mean_loss}`.
    pub fn complete_epoch(self, mean_loss: f64) -> Result<TrainState> {
        match self {
            TrainState::Training { epoch } => Ok(TrainState::EpochComplete { epoch, mean_loss }),
            other => Err(other.invalid("complete_epoch")),
        }
    }

    /// From `EpochComplete`: stop if the loss is below `early_stop_loss` or
    /// the budget of `max_epochs` is used up, otherwise start the next epoch.
    /// Early stop is reported when both hold.
    pub fn advance(self, max_epochs: usize, early_stop_loss: f64) -> Result<TrainState> {
        match self {
            TrainState::EpochComplete { epoch, mean_loss } => {
                let epochs_run = epoch + 1;
                if early_stop_triggered(mean_loss, early_stop_loss) {
                    Ok(TrainState::Stopped { reason: StopReason::EarlyStop, epochs_run })
                } else if epochs_run >= max_epochs {
                    Ok(TrainState::Stopped { reason: StopReason::EpochBudget, epochs_run })
                } else {
                    Ok(TrainState::Training { epoch: epochs_run })
                }
            }
            other => Err(other.invalid("advance")),
        }
    }

    /// `Stopped` → `Persisted`.
    pub fn persist(self) -> Result<TrainState> {
        match self {
            TrainState::Stopped { .. } => Ok(TrainState::Persisted),
            other => Err(other.invalid("persist")),
        }
    }

    fn invalid(self, event: &'static str) -> EegError {
        EegError::InvalidTransition { from: format!("{self:?}"), event }
    }
}
