use std::path::{Path, PathBuf};

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info};

use crate::config::DataConfig;
use crate::data::npy::{read_npy, write_npy, NpyArray};
use crate::error::{EegError, Result};
use crate::network::spec::ArchitectureSpec;

const SUBJECT_PLACEHOLDER: &str = "{subject}";

/// Which slice of the stored frequency bands a dataset keeps.
///
/// Storage files carry `stored` bands per grid cell; bands
/// `[offset, offset + spec.bands)` are retained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BandWindow {
    pub stored: usize,
    pub offset: usize,
}

impl BandWindow {
    pub fn all(bands: usize) -> Self {
        BandWindow { stored: bands, offset: 0 }
    }
}

/// Labeled trials held in the canonical `(trial, segment, band, row, col)`
/// layout, ready to be sliced into batches.
#[derive(Debug, Clone, PartialEq)]
pub struct EegDataset {
    /// `[segments, bands, rows, cols]`
    trial_shape: [usize; 4],
    num_classes: usize,
    data: Vec<f32>,
    labels: Vec<usize>,
}

impl EegDataset {
    /// Wraps trials that are already in canonical layout.
    pub fn new(trial_shape: [usize; 4], num_classes: usize, data: Vec<f32>, labels: Vec<usize>) -> Result<EegDataset> {
        let trial_len: usize = trial_shape.iter().product();
        if data.len() != labels.len() * trial_len {
            return Err(EegError::shape_mismatch(
                "EegDataset::new",
                &[labels.len() * trial_len],
                &[data.len()],
            ));
        }
        if let Some((index, &label)) = labels.iter().enumerate().find(|&(_, &l)| l >= num_classes) {
            return Err(EegError::InvalidLabel { index, value: label as f64 });
        }
        Ok(EegDataset { trial_shape, num_classes, data, labels })
    }

    /// Builds a dataset from storage-layout arrays.
    ///
    /// `features` must end in `(segments, rows, cols, window.stored)`; any
    /// leading dimensions are flattened into trials. `labels` must hold one
    /// integral class index per trial. The kept bands are moved in front of
    /// the grid here, once, so batches never need reordering.
    pub fn from_arrays(features: &NpyArray, labels: &NpyArray, spec: &ArchitectureSpec, window: BandWindow) -> Result<EegDataset> {
        if window.offset + spec.bands > window.stored {
            return Err(EegError::Config(format!(
                "bands [{}, {}) fall outside the {} stored bands",
                window.offset,
                window.offset + spec.bands,
                window.stored
            )));
        }

        let expected = [spec.segments, spec.rows, spec.cols, window.stored];
        let rank = features.shape.len();
        if rank < expected.len() || features.shape[rank - expected.len()..] != expected {
            let tail = &features.shape[rank.saturating_sub(expected.len())..];
            return Err(EegError::shape_mismatch("feature file (…, segments, rows, cols, bands)", &expected, tail));
        }
        let trials: usize = features.shape[..rank - expected.len()].iter().product();
        let stored_trial_len = spec.segments * spec.rows * spec.cols * window.stored;
        if features.numel() != trials * stored_trial_len {
            return Err(EegError::shape_mismatch("feature file payload", &[trials * stored_trial_len], &[features.numel()]));
        }
        if labels.numel() != trials {
            return Err(EegError::shape_mismatch("label file", &[trials], &labels.shape));
        }

        let mut classes = Vec::with_capacity(trials);
        for (index, &value) in labels.data.iter().enumerate() {
            if !value.is_finite() || value.fract() != 0.0 || value < 0.0 || value as usize >= spec.num_classes {
                return Err(EegError::InvalidLabel { index, value: value as f64 });
            }
            classes.push(value as usize);
        }

        let [segments, bands, rows, cols] = spec.trial_shape();
        let stored = window.stored;
        let mut data = vec![0.0f32; trials * segments * bands * rows * cols];
        for (src, dst) in features
            .data
            .chunks_exact(stored_trial_len)
            .zip(data.chunks_exact_mut(segments * bands * rows * cols))
        {
            for s in 0..segments {
                for r in 0..rows {
                    for c in 0..cols {
                        let cell = ((s * rows + r) * cols + c) * stored + window.offset;
                        for b in 0..bands {
                            dst[((s * bands + b) * rows + r) * cols + c] = src[cell + b];
                        }
                    }
                }
            }
        }

        EegDataset::new(spec.trial_shape(), spec.num_classes, data, classes)
    }

    /// Reads the configured feature and label files.
    ///
    /// A `{subject}` placeholder in the paths is expanded for every subject
    /// in `0..config.subjects`; the per-subject datasets are concatenated in
    /// subject order.
    pub fn load(config: &DataConfig, spec: &ArchitectureSpec) -> Result<EegDataset> {
        let window = BandWindow { stored: config.stored_bands, offset: config.band_offset };
        let pairs = subject_paths(&config.features_path, &config.labels_path, config.subjects)?;

        let mut parts = Vec::with_capacity(pairs.len());
        for (features_path, labels_path) in &pairs {
            let features = read_npy(features_path)?;
            let labels = read_npy(labels_path)?;
            let part = EegDataset::from_arrays(&features, &labels, spec, window)?;
            debug!(path = %features_path.display(), trials = part.len(), "loaded feature file");
            parts.push(part);
        }
        let dataset = EegDataset::concat(parts, spec)?;
        info!(trials = dataset.len(), files = pairs.len(), "dataset loaded");
        Ok(dataset)
    }

    fn concat(parts: Vec<EegDataset>, spec: &ArchitectureSpec) -> Result<EegDataset> {
        let mut data = Vec::new();
        let mut labels = Vec::new();
        for part in parts {
            data.extend(part.data);
            labels.extend(part.labels);
        }
        EegDataset::new(spec.trial_shape(), spec.num_classes, data, labels)
    }

    /// Generates `n` labeled trials whose class is visible as a raised
    /// band, so a small model can fit them quickly. Labels cycle through the
    /// classes.
    pub fn synthetic(spec: &ArchitectureSpec, n: usize, seed: u64) -> Result<EegDataset> {
        spec.validate()?;
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let [segments, bands, rows, cols] = spec.trial_shape();
        let grid = rows * cols;

        let mut data = Vec::with_capacity(n * segments * bands * grid);
        let mut labels = Vec::with_capacity(n);
        for i in 0..n {
            let class = i % spec.num_classes;
            let hot_band = class % bands;
            // classes beyond the band count are told apart by sign
            let sign = if (class / bands) % 2 == 0 { 1.0 } else { -1.0 };
            for _ in 0..segments {
                for b in 0..bands {
                    let level = if b == hot_band { sign } else { 0.0 };
                    for _ in 0..grid {
                        data.push(level + rng.gen_range(-0.25f32..0.25));
                    }
                }
            }
            labels.push(class);
        }
        EegDataset::new(spec.trial_shape(), spec.num_classes, data, labels)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// `[segments, bands, rows, cols]`
    pub fn trial_shape(&self) -> [usize; 4] {
        self.trial_shape
    }

    pub fn trial_len(&self) -> usize {
        self.trial_shape.iter().product()
    }

    /// Canonical-layout values of trial `i`.
    pub fn trial(&self, i: usize) -> &[f32] {
        let len = self.trial_len();
        &self.data[i * len..(i + 1) * len]
    }

    pub fn label(&self, i: usize) -> usize {
        self.labels[i]
    }

    pub fn labels(&self) -> &[usize] {
        &self.labels
    }

    /// Copies the trials at `indices`, in that order.
    pub fn subset(&self, indices: &[usize]) -> EegDataset {
        let mut data = Vec::with_capacity(indices.len() * self.trial_len());
        for &i in indices {
            data.extend_from_slice(self.trial(i));
        }
        EegDataset {
            trial_shape: self.trial_shape,
            num_classes: self.num_classes,
            data,
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }

    /// Shuffles the trials with `seed` and splits them into `(train, test)`.
    ///
    /// The test part takes the first `ceil(n × (1 − train_ratio))` shuffled
    /// trials; both parts always keep at least one trial.
    pub fn split(&self, train_ratio: f64, seed: u64) -> Result<(EegDataset, EegDataset)> {
        if !(train_ratio > 0.0 && train_ratio < 1.0) {
            return Err(EegError::Config(format!("train ratio {train_ratio} is not in (0, 1)")));
        }
        let n = self.len();
        if n < 2 {
            return Err(EegError::Config(format!("cannot split {n} trial(s) into train and test")));
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(seed));

        // 1e-9 absorbs representation error, e.g. (1 - 0.7) * 10 = 3.0000000000000004
        let test_len = ((n as f64 * (1.0 - train_ratio)) - 1e-9).ceil() as usize;
        let test_len = test_len.clamp(1, n - 1);
        let (test, train) = order.split_at(test_len);
        debug!(train = train.len(), test = test.len(), "split dataset");
        Ok((self.subset(train), self.subset(test)))
    }

    /// Labels as a `(trials, num_classes)` one-hot matrix.
    pub fn one_hot(&self) -> Vec<f32> {
        let mut out = vec![0.0f32; self.len() * self.num_classes];
        for (row, &label) in out.chunks_exact_mut(self.num_classes).zip(&self.labels) {
            row[label] = 1.0;
        }
        out
    }

    /// Writes the trials back in storage layout `(trials, segments, rows,
    /// cols, bands)` with only the kept bands, plus one-hot labels, as `<f4`
    /// `.npy` files.
    pub fn save_split(&self, features_path: impl AsRef<Path>, labels_path: impl AsRef<Path>) -> Result<()> {
        let [segments, bands, rows, cols] = self.trial_shape;
        let mut storage = vec![0.0f32; self.data.len()];
        for (src, dst) in self.data.chunks_exact(self.trial_len()).zip(storage.chunks_exact_mut(self.trial_len())) {
            for s in 0..segments {
                for b in 0..bands {
                    for r in 0..rows {
                        for c in 0..cols {
                            dst[((s * rows + r) * cols + c) * bands + b] = src[((s * bands + b) * rows + r) * cols + c];
                        }
                    }
                }
            }
        }
        write_npy(&features_path, &[self.len(), segments, rows, cols, bands], &storage)?;
        write_npy(&labels_path, &[self.len(), self.num_classes], &self.one_hot())?;
        Ok(())
    }
}

/// Expands the `{subject}` placeholder into one `(features, labels)` pair per
/// subject, or returns the paths unchanged when neither has it.
fn subject_paths(features: &Path, labels: &Path, subjects: usize) -> Result<Vec<(PathBuf, PathBuf)>> {
    let f = features.to_string_lossy();
    let l = labels.to_string_lossy();
    match (f.contains(SUBJECT_PLACEHOLDER), l.contains(SUBJECT_PLACEHOLDER)) {
        (false, false) => Ok(vec![(features.to_path_buf(), labels.to_path_buf())]),
        (true, true) if subjects > 0 => Ok((0..subjects)
            .map(|s| {
                let s = s.to_string();
                (
                    PathBuf::from(f.replace(SUBJECT_PLACEHOLDER, &s)),
                    PathBuf::from(l.replace(SUBJECT_PLACEHOLDER, &s)),
                )
            })
            .collect()),
        (true, true) => Err(EegError::Config("subject placeholder used with zero subjects".into())),
        _ => Err(EegError::Config(format!(
            "'{SUBJECT_PLACEHOLDER}' must appear in both the feature and the label path or in neither"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_spec() -> ArchitectureSpec {
        ArchitectureSpec { segments: 2, rows: 2, cols: 3, bands: 2, num_classes: 3, ..ArchitectureSpec::default() }
    }

    /// Storage-layout value encoding its own coordinates.
    fn coded(t: usize, s: usize, r: usize, c: usize, b: usize) -> f32 {
        (t * 10_000 + s * 1000 + r * 100 + c * 10 + b) as f32
    }

    fn storage_features(trials: usize, spec: &ArchitectureSpec, stored: usize) -> NpyArray {
        let mut data = Vec::new();
        for t in 0..trials {
            for s in 0..spec.segments {
                for r in 0..spec.rows {
                    for c in 0..spec.cols {
                        for b in 0..stored {
                            data.push(coded(t, s, r, c, b));
                        }
                    }
                }
            }
        }
        NpyArray { shape: vec![trials, spec.segments, spec.rows, spec.cols, stored], data }
    }

    fn labels(values: &[f32]) -> NpyArray {
        NpyArray { shape: vec![values.len()], data: values.to_vec() }
    }

    #[test]
    fn permutes_once_and_drops_leading_band() {
        let spec = small_spec();
        let ds = EegDataset::from_arrays(
            &storage_features(2, &spec, 3),
            &labels(&[2.0, 0.0]),
            &spec,
            BandWindow { stored: 3, offset: 1 },
        )
        .unwrap();
        assert_eq!(ds.len(), 2);
        assert_eq!(ds.labels(), &[2, 0]);

        let trial = ds.trial(1);
        let [_, bands, rows, cols] = ds.trial_shape();
        for s in 0..2 {
            for b in 0..bands {
                for r in 0..rows {
                    for c in 0..cols {
                        let v = trial[((s * bands + b) * rows + r) * cols + c];
                        assert_eq!(v, coded(1, s, r, c, b + 1));
                    }
                }
            }
        }
    }

    #[test]
    fn leading_dims_flatten_into_trials() {
        let spec = small_spec();
        let mut features = storage_features(6, &spec, 2);
        features.shape = vec![2, 3, spec.segments, spec.rows, spec.cols, 2];
        let ds = EegDataset::from_arrays(&features, &labels(&[0.0; 6]), &spec, BandWindow::all(2)).unwrap();
        assert_eq!(ds.len(), 6);
    }

    #[test]
    fn rejects_bad_inputs() {
        let spec = small_spec();
        let features = storage_features(2, &spec, 2);
        let window = BandWindow::all(2);

        let err = EegDataset::from_arrays(&features, &labels(&[0.0, 3.0]), &spec, window).unwrap_err();
        assert!(matches!(err, EegError::InvalidLabel { index: 1, .. }));
        let err = EegDataset::from_arrays(&features, &labels(&[0.5, 1.0]), &spec, window).unwrap_err();
        assert!(matches!(err, EegError::InvalidLabel { index: 0, .. }));
        let err = EegDataset::from_arrays(&features, &labels(&[0.0]), &spec, window).unwrap_err();
        assert!(matches!(err, EegError::ShapeMismatch { .. }));

        let wrong_grid = ArchitectureSpec { rows: 3, ..small_spec() };
        let err = EegDataset::from_arrays(&features, &labels(&[0.0, 1.0]), &wrong_grid, window).unwrap_err();
        assert!(matches!(err, EegError::ShapeMismatch { .. }));

        let err = EegDataset::from_arrays(&features, &labels(&[0.0, 1.0]), &spec, BandWindow { stored: 2, offset: 1 }).unwrap_err();
        assert!(matches!(err, EegError::Config(_)));
    }

    #[test]
    fn split_is_seeded_disjoint_and_sized() {
        let spec = small_spec();
        let ds = EegDataset::synthetic(&spec, 10, 1).unwrap();
        let (train, test) = ds.split(0.7, 7).unwrap();
        assert_eq!((train.len(), test.len()), (7, 3));

        let (train2, test2) = ds.split(0.7, 7).unwrap();
        assert_eq!(train, train2);
        assert_eq!(test, test2);

        let (train3, _) = ds.split(0.7, 8).unwrap();
        assert_ne!(train, train3);

        assert!(ds.split(1.0, 7).is_err());
        assert!(ds.subset(&[0]).split(0.7, 7).is_err());
    }

    #[test]
    fn split_covers_every_trial_once() {
        let spec = small_spec();
        let ds = EegDataset::synthetic(&spec, 9, 3).unwrap();
        let (train, test) = ds.split(0.7, 11).unwrap();
        let mut seen: Vec<&[f32]> = (0..train.len()).map(|i| train.trial(i)).collect();
        seen.extend((0..test.len()).map(|i| test.trial(i)));
        assert_eq!(seen.len(), 9);
        for i in 0..9 {
            assert_eq!(seen.iter().filter(|t| **t == ds.trial(i)).count(), 1);
        }
    }

    #[test]
    fn one_hot_rows() {
        let ds = EegDataset::new([1, 1, 1, 1], 3, vec![0.0; 2], vec![2, 0]).unwrap();
        assert_eq!(ds.one_hot(), vec![0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
    }

    #[test]
    fn saved_split_reloads_to_the_same_trials() {
        let spec = small_spec();
        let ds = EegDataset::synthetic(&spec, 4, 5).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let (x, y) = (dir.path().join("x.npy"), dir.path().join("y.npy"));
        ds.save_split(&x, &y).unwrap();

        let features = read_npy(&x).unwrap();
        assert_eq!(features.shape, vec![4, 2, 2, 3, 2]);
        let one_hot = read_npy(&y).unwrap();
        assert_eq!(one_hot.shape, vec![4, 3]);

        let class_index: Vec<f32> = one_hot
            .data
            .chunks(3)
            .map(|row| row.iter().position(|&v| v == 1.0).unwrap_or(0) as f32)
            .collect();
        let back = EegDataset::from_arrays(&features, &labels(&class_index), &spec, BandWindow::all(2)).unwrap();
        assert_eq!(back, ds);
    }

    #[test]
    fn subject_placeholder_expands_in_order() {
        let pairs = subject_paths(Path::new("f/{subject}_x.npy"), Path::new("f/{subject}_y.npy"), 3).unwrap();
        assert_eq!(pairs.len(), 3);
        assert_eq!(pairs[2].0, PathBuf::from("f/2_x.npy"));
        assert_eq!(pairs[2].1, PathBuf::from("f/2_y.npy"));

        let single = subject_paths(Path::new("x.npy"), Path::new("y.npy"), 15).unwrap();
        assert_eq!(single.len(), 1);

        assert!(subject_paths(Path::new("{subject}.npy"), Path::new("y.npy"), 3).is_err());
    }
}
