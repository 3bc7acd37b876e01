use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::DeviceKind;
use crate::error::{EegError, Result};
use crate::math::precision::Precision;
use crate::network::spec::ArchitectureSpec;
use crate::optim::OptimizerConfig;

/// Everything one training run needs, loadable from a JSON file.
///
/// Every section defaults field by field, so a config file only has to name
/// the values it changes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub data: DataConfig,
    pub model: ArchitectureSpec,
    pub train: TrainSettings,
    pub output: OutputConfig,
}

/// Where the trials come from and how they are split.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Feature file, storage layout `(…, segments, rows, cols, stored_bands)`.
    /// May contain `{subject}`.
    pub features_path: PathBuf,
    /// Label file with one class index per trial. May contain `{subject}`.
    pub labels_path: PathBuf,
    /// Subjects substituted for `{subject}`, as `0..subjects`.
    pub subjects: usize,
    /// Bands per grid cell in the feature file.
    pub stored_bands: usize,
    /// First stored band kept; `model.bands` consecutive bands are used.
    pub band_offset: usize,
    pub train_ratio: f64,
    /// When set, this many synthetic trials replace the files.
    pub synthetic_trials: Option<usize>,
}

impl Default for DataConfig {
    fn default() -> Self {
        DataConfig {
            features_path: PathBuf::from("features/0_segmented_x_89.npy"),
            labels_path: PathBuf::from("features/0_segmented_y_89.npy"),
            subjects: 15,
            stored_bands: 5,
            band_offset: 1,
            train_ratio: 0.7,
            synthetic_trials: None,
        }
    }
}

/// Optimization hyperparameters and runtime placement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSettings {
    pub max_epochs: usize,
    pub batch_size: usize,
    /// Training stops once an epoch's mean loss falls below this.
    pub early_stop_loss: f64,
    pub precision: Precision,
    pub optimizer: OptimizerConfig,
    /// Seeds initialization, the train/test split and the epoch shuffles.
    pub seed: u64,
    /// Batches assembled ahead of the optimizer; 0 assembles inline.
    pub prefetch: usize,
    /// Device preference, first available wins.
    pub devices: Vec<DeviceKind>,
    /// Worker threads for the parallel device; defaults to the core count.
    pub threads: Option<usize>,
}

impl Default for TrainSettings {
    fn default() -> Self {
        TrainSettings {
            max_epochs: 100,
            batch_size: 128,
            early_stop_loss: 0.005,
            precision: Precision::Half,
            optimizer: OptimizerConfig::default(),
            seed: 7,
            prefetch: 4,
            devices: vec![DeviceKind::Parallel, DeviceKind::Cpu],
            threads: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub model_path: PathBuf,
    /// Held-out features, storage layout with the kept bands only.
    pub test_features_path: PathBuf,
    /// Held-out labels, one-hot.
    pub test_labels_path: PathBuf,
    /// Free text stored in the model metadata.
    pub description: Option<String>,
    /// Class names stored in the model metadata.
    pub class_labels: Option<Vec<String>>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            model_path: PathBuf::from("results/model.json"),
            test_features_path: PathBuf::from("features/x_test.npy"),
            test_labels_path: PathBuf::from("features/y_test.npy"),
            description: None,
            class_labels: None,
        }
    }
}

impl RunConfig {
    pub fn save_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    pub fn load_json(path: impl AsRef<Path>) -> Result<RunConfig> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        Ok(serde_json::from_reader(reader)?)
    }

    /// Checks cross-field consistency. Layer-stack collapse is caught later,
    /// when the encoder is built.
    pub fn validate(&self) -> Result<()> {
        self.model.validate()?;

        let data = &self.data;
        if !(data.train_ratio > 0.0 && data.train_ratio < 1.0) {
            return Err(EegError::Config(format!("train_ratio {} is not in (0, 1)", data.train_ratio)));
        }
        if data.band_offset + self.model.bands > data.stored_bands {
            return Err(EegError::Config(format!(
                "band_offset {} + bands {} exceeds stored_bands {}",
                data.band_offset, self.model.bands, data.stored_bands
            )));
        }
        if data.synthetic_trials.is_some_and(|n| n < 2) {
            return Err(EegError::Config("synthetic_trials must be at least 2".into()));
        }

        let train = &self.train;
        if train.max_epochs == 0 {
            return Err(EegError::Config("max_epochs must be at least 1".into()));
        }
        if train.batch_size == 0 {
            return Err(EegError::Config("batch_size must be at least 1".into()));
        }
        if !(train.early_stop_loss.is_finite() && train.early_stop_loss > 0.0) {
            return Err(EegError::Config(format!("early_stop_loss {} must be positive", train.early_stop_loss)));
        }
        let lr = train.optimizer.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(EegError::Config(format!("learning_rate {lr} must be positive")));
        }
        if train.devices.is_empty() {
            return Err(EegError::Config("devices must name at least one device".into()));
        }
        if train.threads == Some(0) {
            return Err(EegError::Config("threads must be at least 1".into()));
        }

        if let Some(labels) = &self.output.class_labels {
            if labels.len() != self.model.num_classes {
                return Err(EegError::Config(format!(
                    "{} class labels given for {} classes",
                    labels.len(),
                    self.model.num_classes
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RunConfig::default();
        config.validate().unwrap();
        assert_eq!(config.train.batch_size, 128);
        assert_eq!(config.train.seed, 7);
        assert_eq!(config.data.band_offset + config.model.bands, config.data.stored_bands);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let json = r#"{ "train": { "max_epochs": 3, "optimizer": { "type": "sgd", "learning_rate": 0.1 } },
                        "model": { "segments": 2 } }"#;
        let config: RunConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.train.max_epochs, 3);
        assert_eq!(config.train.batch_size, 128);
        assert_eq!(config.train.optimizer, OptimizerConfig::Sgd { learning_rate: 0.1 });
        assert_eq!(config.model.segments, 2);
        assert_eq!(config.model.rows, 8);
        assert_eq!(config.train.devices, vec![DeviceKind::Parallel, DeviceKind::Cpu]);
    }

    #[test]
    fn file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.json");
        let mut config = RunConfig::default();
        config.train.precision = Precision::BFloat16;
        config.data.synthetic_trials = Some(12);
        config.save_json(&path).unwrap();
        assert_eq!(RunConfig::load_json(&path).unwrap(), config);
    }

    #[test]
    fn rejects_inconsistent_values() {
        let cases: Vec<Box<dyn Fn(&mut RunConfig)>> = vec![
            Box::new(|c| c.data.train_ratio = 1.0),
            Box::new(|c| c.data.band_offset = 2),
            Box::new(|c| c.train.batch_size = 0),
            Box::new(|c| c.train.max_epochs = 0),
            Box::new(|c| c.train.early_stop_loss = 0.0),
            Box::new(|c| c.train.devices.clear()),
            Box::new(|c| c.train.threads = Some(0)),
            Box::new(|c| c.train.optimizer = OptimizerConfig::Adam { learning_rate: -1.0 }),
            Box::new(|c| c.output.class_labels = Some(vec!["a".into()])),
        ];
        for (i, mutate) in cases.iter().enumerate() {
            let mut config = RunConfig::default();
            mutate(&mut config);
            assert!(matches!(config.validate(), Err(EegError::Config(_))), "case {i}");
        }
    }
}
