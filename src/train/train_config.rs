use std::path::PathBuf;
use std::sync::mpsc;

use crate::config::TrainSettings;
use crate::math::precision::Precision;
use crate::network::metadata::ModelMetadata;
use crate::optim::OptimizerConfig;
use crate::train::epoch_stats::EpochStats;

/// Configuration for a `train_loop` run.
///
/// # Fields
/// - `max_epochs`      — epoch budget; training may stop earlier
/// - `batch_size`      — trials per mini-batch
/// - `early_stop_loss` — stop once an epoch's mean loss is below this
/// - `precision`       — forward/backward precision; reduced precisions
///                       enable loss scaling
/// - `optimizer`       — which optimizer to build, with its learning rate
/// - `seed`            — epoch `e` shuffles with `seed + e`
/// - `prefetch`        — batches assembled ahead; `0` assembles inline
/// - `checkpoint`      — where the final model is written; `None` skips the
///                       write but still finishes in `Persisted`
/// - `metadata`        — annotations stored with the checkpoint; the loop
///                       fills in epochs, final loss and stop reason
/// - `progress_tx`     — optional channel sender; one `EpochStats` is sent per
///                       completed epoch. A dropped receiver is ignored.
pub struct TrainConfig {
    pub max_epochs: usize,
    pub batch_size: usize,
    pub early_stop_loss: f64,
    pub precision: Precision,
    pub optimizer: OptimizerConfig,
    pub seed: u64,
    pub prefetch: usize,
    pub checkpoint: Option<PathBuf>,
    pub metadata: ModelMetadata,
    pub progress_tx: Option<mpsc::Sender<EpochStats>>,
}

impl TrainConfig {
    /// Creates a minimal `TrainConfig`: default optimizer, half precision, no
    /// checkpoint and no progress channel.
    pub fn new(max_epochs: usize, batch_size: usize) -> Self {
        let defaults = TrainSettings::default();
        TrainConfig {
            max_epochs,
            batch_size,
            early_stop_loss: defaults.early_stop_loss,
            precision: defaults.precision,
            optimizer: defaults.optimizer,
            seed: defaults.seed,
            prefetch: defaults.prefetch,
            checkpoint: None,
            metadata: ModelMetadata::default(),
            progress_tx: None,
        }
    }

    pub fn from_settings(settings: &TrainSettings) -> Self {
        TrainConfig {
            early_stop_loss: settings.early_stop_loss,
            precision: settings.precision,
            optimizer: settings.optimizer,
            seed: settings.seed,
            prefetch: settings.prefetch,
            ..TrainConfig::new(settings.max_epochs, settings.batch_size)
        }
    }
}
