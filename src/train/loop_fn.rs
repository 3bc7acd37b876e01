use std::fs;
use std::time::Instant;

use tracing::{debug, info};

use crate::data::dataset::EegDataset;
use crate::data::loader::BatchLoader;
use crate::device::Device;
use crate::error::{EegError, Result};
use crate::network::metadata::ModelMetadata;
use crate::network::network::EegNet;
use crate::optim::{GradScaler, StepOutcome};
use crate::train::epoch_stats::EpochStats;
use crate::train::state::{StopReason, TrainState};
use crate::train::train_config::TrainConfig;
use crate::train::trainer::train_step;

/// Summary of a finished run.
#[derive(Debug, Clone, PartialEq)]
pub struct TrainReport {
    /// One entry per completed epoch, in order.
    pub history: Vec<EpochStats>,
    pub stop_reason: StopReason,
    pub epochs_run: usize,
    /// Always `TrainState::Persisted` for a run that returned `Ok`.
    pub final_state: TrainState,
}

impl TrainReport {
    /// Mean loss of the last completed epoch.
    pub fn final_loss(&self) -> Option<f64> {
        self.history.last().map(|s| s.mean_loss)
    }
}

// ---------------------------------------------------------------------------
// Public entry point
// ---------------------------------------------------------------------------

/// Trains `model` on `dataset` until early stop or the epoch budget, then
/// writes the checkpoint (if configured).
///
/// All kernels run inside `device`'s thread pool. Any error aborts the run
/// before the checkpoint is written.
pub fn train_loop(model: &mut EegNet, dataset: &EegDataset, device: &Device, config: &TrainConfig) -> Result<TrainReport> {
    if dataset.is_empty() {
        return Err(EegError::Config("training set is empty".into()));
    }
    if config.max_epochs == 0 || config.batch_size == 0 {
        return Err(EegError::Config("max_epochs and batch_size must be at least 1".into()));
    }
    if dataset.trial_shape() != model.spec.trial_shape() {
        return Err(EegError::shape_mismatch(
            "train_loop: dataset trial vs model input",
            &model.spec.trial_shape(),
            &dataset.trial_shape(),
        ));
    }
    if dataset.num_classes() != model.spec.num_classes {
        return Err(EegError::shape_mismatch(
            "train_loop: dataset classes vs model head",
            &[model.spec.num_classes],
            &[dataset.num_classes()],
        ));
    }

    info!(
        device = %device,
        trials = dataset.len(),
        batch_size = config.batch_size,
        max_epochs = config.max_epochs,
        precision = %config.precision,
        "training started"
    );
    device.install(|| run(model, dataset, config))
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn run(model: &mut EegNet, dataset: &EegDataset, config: &TrainConfig) -> Result<TrainReport> {
    let mut optimizer = config.optimizer.build();
    let mut scaler = GradScaler::new(config.precision.is_reduced());
    let loader = BatchLoader::new(dataset, config.batch_size, config.prefetch, config.seed);

    let mut history = Vec::new();
    let mut state = TrainState::initial();

    while let TrainState::Training { epoch } = state {
        let started = Instant::now();
        let mut loss_sum = 0.0f64;
        let mut batches = 0usize;
        let mut correct = 0usize;
        let mut skipped_steps = 0usize;

        loader.for_each_batch(epoch, |index, batch| {
            let step = train_step(model, &batch, optimizer.as_mut(), &mut scaler, config.precision, epoch, index)?;
            loss_sum += step.loss as f64;
            batches += 1;
            correct += step.correct;
            if step.outcome == StepOutcome::Skipped {
                skipped_steps += 1;
            }
            Ok(())
        })?;

        let mean_loss = loss_sum / batches.max(1) as f64;
        let stats = EpochStats {
            epoch: epoch + 1,
            total_epochs: config.max_epochs,
            mean_loss,
            train_accuracy: correct as f64 / dataset.len() as f64,
            elapsed_secs: started.elapsed().as_secs_f64(),
            skipped_steps,
            loss_scale: scaler.scale(),
        };
        info!(
            epoch = stats.epoch,
            mean_loss,
            accuracy = stats.train_accuracy,
            secs = stats.elapsed_secs,
            skipped_steps,
            "epoch complete"
        );
        if let Some(tx) = &config.progress_tx {
            // A listener that went away does not stop training.
            let _ = tx.send(stats.clone());
        }
        history.push(stats);

        state = state.complete_epoch(mean_loss)?.advance(config.max_epochs, config.early_stop_loss)?;
    }

    let (stop_reason, epochs_run) = match state {
        TrainState::Stopped { reason, epochs_run } => (reason, epochs_run),
        other => return Err(EegError::InvalidTransition { from: format!("{other:?}"), event: "finish" }),
    };
    info!(reason = %stop_reason, epochs_run, "training stopped");

    model.metadata = ModelMetadata {
        epochs_trained: Some(epochs_run),
        final_loss: history.last().map(|s| s.mean_loss),
        stop_reason: Some(stop_reason.to_string()),
        ..config.metadata.clone()
    };
    if let Some(path) = &config.checkpoint {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        model.save_json(path)?;
        info!(path = %path.display(), "model saved");
    } else {
        debug!("no checkpoint path configured, skipping save");
    }
    let final_state = state.persist()?;

    Ok(TrainReport { history, stop_reason, epochs_run, final_state })
}
