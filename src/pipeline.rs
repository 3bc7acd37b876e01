//! Load → split → train → persist, driven by one [`RunConfig`].

use std::fs;
use std::path::Path;
use std::sync::mpsc;

use tracing::info;

use crate::config::RunConfig;
use crate::data::dataset::EegDataset;
use crate::device::Device;
use crate::error::Result;
use crate::layers::param::Module;
use crate::network::metadata::ModelMetadata;
use crate::network::network::EegNet;
use crate::train::epoch_stats::EpochStats;
use crate::train::loop_fn::{train_loop, TrainReport};
use crate::train::train_config::TrainConfig;

/// Result of a full run.
#[derive(Debug)]
pub struct RunOutcome {
    /// The trained model, as written to `output.model_path`.
    pub model: EegNet,
    pub report: TrainReport,
    pub train_trials: usize,
    pub test_trials: usize,
}

/// Executes one training run.
///
/// The held-out test split is written before training starts; the model file
/// is written once training stops. `progress_tx` receives one `EpochStats`
/// per epoch.
pub fn run(config: &RunConfig, progress_tx: Option<mpsc::Sender<EpochStats>>) -> Result<RunOutcome> {
    config.validate()?;
    let settings = &config.train;

    let dataset = match config.data.synthetic_trials {
        Some(n) => {
            info!(trials = n, "generating synthetic dataset");
            EegDataset::synthetic(&config.model, n, settings.seed)?
        }
        None => EegDataset::load(&config.data, &config.model)?,
    };

    let (train, test) = dataset.split(config.data.train_ratio, settings.seed)?;
    create_parent(&config.output.test_features_path)?;
    create_parent(&config.output.test_labels_path)?;
    test.save_split(&config.output.test_features_path, &config.output.test_labels_path)?;
    info!(
        train = train.len(),
        test = test.len(),
        path = %config.output.test_features_path.display(),
        "test split saved"
    );

    let device = Device::select(&settings.devices, settings.threads);
    let mut model = EegNet::new(&config.model, settings.seed)?;
    info!(parameters = model.num_params(), flat_features = model.encoder.flat_features, "model built");

    let train_config = TrainConfig {
        checkpoint: Some(config.output.model_path.clone()),
        metadata: ModelMetadata {
            description: config.output.description.clone(),
            class_labels: config.output.class_labels.clone(),
            ..ModelMetadata::default()
        },
        progress_tx,
        ..TrainConfig::from_settings(settings)
    };
    let report = train_loop(&mut model, &train, &device, &train_config)?;

    Ok(RunOutcome { model, report, train_trials: train.len(), test_trials: test.len() })
}

fn create_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}
