use std::sync::mpsc;
use std::thread;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::data::dataset::EegDataset;
use crate::error::Result;
use crate::math::tensor::Tensor;

/// One mini-batch in canonical `(batch, segments, bands, rows, cols)` layout.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub inputs: Tensor,
    pub labels: Vec<usize>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// Shuffled mini-batch iteration over a dataset.
///
/// Each epoch visits every trial exactly once, in an order derived from
/// `seed + epoch`. The last batch may be smaller than `batch_size`.
/// With `prefetch > 0` batches are assembled on a producer thread that runs
/// at most `prefetch` batches ahead of the consumer.
pub struct BatchLoader<'a> {
    dataset: &'a EegDataset,
    batch_size: usize,
    prefetch: usize,
    seed: u64,
}

impl<'a> BatchLoader<'a> {
    /// `batch_size` of zero is treated as one.
    pub fn new(dataset: &'a EegDataset, batch_size: usize, prefetch: usize, seed: u64) -> Self {
        BatchLoader { dataset, batch_size: batch_size.max(1), prefetch, seed }
    }

    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.batch_size)
    }

    /// Visiting order of the trials for `epoch`.
    pub fn epoch_order(&self, epoch: usize) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        order.shuffle(&mut ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(epoch as u64)));
        order
    }

    /// Gathers the trials at `indices` into one batch.
    pub fn assemble(&self, indices: &[usize]) -> Result<Batch> {
        let trial_len = self.dataset.trial_len();
        let mut data = Vec::with_capacity(indices.len() * trial_len);
        for &i in indices {
            data.extend_from_slice(self.dataset.trial(i));
        }
        let mut shape = vec![indices.len()];
        shape.extend(self.dataset.trial_shape());
        Ok(Batch {
            inputs: Tensor::from_vec(&shape, data)?,
            labels: indices.iter().map(|&i| self.dataset.label(i)).collect(),
        })
    }

    /// Feeds every batch of `epoch` to `consume` in order, together with its
    /// index. Stops at the first error from either side.
    pub fn for_each_batch<F>(&self, epoch: usize, mut consume: F) -> Result<()>
    where
        F: FnMut(usize, Batch) -> Result<()>,
    {
        let order = self.epoch_order(epoch);
        if self.prefetch == 0 {
            for (i, indices) in order.chunks(self.batch_size).enumerate() {
                consume(i, self.assemble(indices)?)?;
            }
            return Ok(());
        }

        debug!(prefetch = self.prefetch, batches = self.num_batches(), epoch, "starting batch producer");
        let (tx, rx) = mpsc::sync_channel::<Result<Batch>>(self.prefetch);
        thread::scope(|scope| {
            scope.spawn(move || {
                for indices in order.chunks(self.batch_size) {
                    let batch = self.assemble(indices);
                    let failed = batch.is_err();
                    // A closed receiver means the consumer gave up.
                    if tx.send(batch).is_err() || failed {
                        break;
                    }
                }
            });
            // `rx` is consumed here so an early return drops it and unblocks
            // the producer before the scope joins.
            for (i, batch) in rx.into_iter().enumerate() {
                consume(i, batch?)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EegError;
    use crate::network::spec::ArchitectureSpec;

    fn dataset(n: usize) -> EegDataset {
        let spec = ArchitectureSpec { segments: 2, rows: 2, cols: 2, bands: 1, num_classes: 4, ..ArchitectureSpec::default() };
        let data = (0..n * 8).map(|v| v as f32).collect();
        let labels = (0..n).map(|i| i % 4).collect();
        EegDataset::new(spec.trial_shape(), 4, data, labels).unwrap()
    }

    fn collect(loader: &BatchLoader, epoch: usize) -> Vec<Batch> {
        let mut batches = Vec::new();
        loader
            .for_each_batch(epoch, |_, b| {
                batches.push(b);
                Ok(())
            })
            .unwrap();
        batches
    }

    #[test]
    fn every_trial_once_per_epoch() {
        let ds = dataset(10);
        let loader = BatchLoader::new(&ds, 4, 2, 7);
        assert_eq!(loader.num_batches(), 3);
        let batches = collect(&loader, 0);
        assert_eq!(batches.iter().map(Batch::len).collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(batches[0].inputs.shape, vec![4, 2, 1, 2, 2]);

        let mut firsts: Vec<f32> = batches.iter().flat_map(|b| b.inputs.data.chunks(8).map(|t| t[0])).collect();
        firsts.sort_by(f32::total_cmp);
        assert_eq!(firsts, (0..10).map(|i| (i * 8) as f32).collect::<Vec<_>>());
    }

    #[test]
    fn prefetch_does_not_change_order() {
        let ds = dataset(13);
        let inline = collect(&BatchLoader::new(&ds, 3, 0, 7), 2);
        let prefetched = collect(&BatchLoader::new(&ds, 3, 4, 7), 2);
        assert_eq!(inline, prefetched);
    }

    #[test]
    fn order_depends_on_seed_and_epoch() {
        let ds = dataset(20);
        let loader = BatchLoader::new(&ds, 5, 0, 7);
        assert_eq!(loader.epoch_order(1), loader.epoch_order(1));
        assert_ne!(loader.epoch_order(0), loader.epoch_order(1));
        // seed 7 at epoch 1 and seed 8 at epoch 0 share a shuffle stream
        assert_eq!(loader.epoch_order(1), BatchLoader::new(&ds, 5, 0, 8).epoch_order(0));
    }

    #[test]
    fn consumer_error_stops_the_producer() {
        let ds = dataset(30);
        let loader = BatchLoader::new(&ds, 1, 1, 7);
        let mut seen = 0;
        let result = loader.for_each_batch(0, |i, _| {
            seen += 1;
            if i == 2 {
                Err(EegError::Config("stop".into()))
            } else {
                Ok(())
            }
        });
        assert!(matches!(result, Err(EegError::Config(_))));
        assert_eq!(seen, 3);
    }
}
