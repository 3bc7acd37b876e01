use std::path::Path;

use ferrite_eeg::data::{read_npy, write_npy};
use ferrite_eeg::network::ConvLayerSpec;
use ferrite_eeg::{ArchitectureSpec, DeviceKind, EegDataset, EegError, EegNet, Precision, RunConfig};

fn tiny_spec() -> ArchitectureSpec {
    ArchitectureSpec {
        segments: 2,
        rows: 4,
        cols: 4,
        conv_layers: vec![ConvLayerSpec::new(8, 3, 1)],
        embedding_dim: 16,
        hidden_size: 16,
        ..ArchitectureSpec::default()
    }
}

/// Writes `n` trials in storage layout with five stored bands and a plain
/// class-index label file.
fn write_subject(dir: &Path, name: &str, n: usize, seed: u64) {
    let five_bands = ArchitectureSpec { bands: 5, ..tiny_spec() };
    let trials = EegDataset::synthetic(&five_bands, n, seed).unwrap();
    trials
        .save_split(dir.join(format!("{name}_x.npy")), dir.join(format!("{name}_onehot.npy")))
        .unwrap();
    let labels: Vec<f32> = trials.labels().iter().map(|&l| l as f32).collect();
    write_npy(dir.join(format!("{name}_y.npy")), &[n], &labels).unwrap();
}

fn config_in(dir: &Path) -> RunConfig {
    let mut config = RunConfig { model: tiny_spec(), ..RunConfig::default() };
    config.data.features_path = dir.join("0_x.npy");
    config.data.labels_path = dir.join("0_y.npy");
    config.train.max_epochs = 2;
    config.train.batch_size = 4;
    config.train.precision = Precision::Full;
    config.train.devices = vec![DeviceKind::Cpu];
    config.output.model_path = dir.join("results").join("model.json");
    config.output.test_features_path = dir.join("split").join("x_test.npy");
    config.output.test_labels_path = dir.join("split").join("y_test.npy");
    config.output.description = Some("pipeline test".into());
    config
}

#[test]
fn files_in_split_saved_model_out() {
    let dir = tempfile::tempdir().unwrap();
    write_subject(dir.path(), "0", 10, 1);
    let config = config_in(dir.path());

    let outcome = ferrite_eeg::run(&config, None).unwrap();
    assert_eq!((outcome.train_trials, outcome.test_trials), (7, 3));
    assert_eq!(outcome.report.epochs_run, outcome.report.history.len());

    let x_test = read_npy(&config.output.test_features_path).unwrap();
    assert_eq!(x_test.shape, vec![3, 2, 4, 4, 4]);
    let y_test = read_npy(&config.output.test_labels_path).unwrap();
    assert_eq!(y_test.shape, vec![3, 4]);
    for row in y_test.data.chunks(4) {
        assert_eq!(row.iter().sum::<f32>(), 1.0);
    }

    let saved = EegNet::load_json(&config.output.model_path).unwrap();
    assert_eq!(saved.spec, tiny_spec());
    assert_eq!(saved.metadata.description.as_deref(), Some("pipeline test"));
    assert_eq!(saved.metadata.epochs_trained, Some(outcome.report.epochs_run));
}

#[test]
fn subject_files_are_concatenated() {
    let dir = tempfile::tempdir().unwrap();
    write_subject(dir.path(), "0", 4, 1);
    write_subject(dir.path(), "1", 6, 2);

    let mut config = config_in(dir.path());
    config.data.features_path = dir.path().join("{subject}_x.npy");
    config.data.labels_path = dir.path().join("{subject}_y.npy");
    config.data.subjects = 2;

    let dataset = EegDataset::load(&config.data, &config.model).unwrap();
    assert_eq!(dataset.len(), 10);
    let outcome = ferrite_eeg::run(&config, None).unwrap();
    assert_eq!(outcome.train_trials + outcome.test_trials, 10);
}

#[test]
fn mismatched_grid_fails_before_training() {
    let dir = tempfile::tempdir().unwrap();
    write_subject(dir.path(), "0", 6, 1);
    let mut config = config_in(dir.path());
    config.model.cols = 5;

    let err = ferrite_eeg::run(&config, None).unwrap_err();
    assert!(matches!(err, EegError::ShapeMismatch { .. }), "{err}");
    assert!(!config.output.model_path.exists());
}

#[test]
fn synthetic_run_needs_no_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = config_in(dir.path());
    config.data.synthetic_trials = Some(8);
    config.train.max_epochs = 1;

    let outcome = ferrite_eeg::run(&config, None).unwrap();
    assert_eq!(outcome.report.history.len(), 1);
    assert!(config.output.model_path.exists());
}
