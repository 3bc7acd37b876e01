use crate::data::loader::Batch;
use crate::error::{EegError, Result};
use crate::layers::param::Module;
use crate::loss::cross_entropy::{argmax, CrossEntropyLoss};
use crate::math::precision::Precision;
use crate::network::network::EegNet;
use crate::optim::{GradScaler, Optimizer, StepOutcome};

/// What one optimization step observed.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepResult {
    /// Mean cross-entropy of the batch, before the update.
    pub loss: f32,
    /// Trials whose highest logit was the true class.
    pub correct: usize,
    pub outcome: StepOutcome,
}

/// Runs one mini-batch: forward, loss, scaled backward, optimizer step.
///
/// `epoch` and `batch_index` only label a `NonFiniteLoss` error; when the loss
/// itself is NaN or infinite the parameters are left untouched.
pub fn train_step(
    model: &mut EegNet,
    batch: &Batch,
    optimizer: &mut dyn Optimizer,
    scaler: &mut GradScaler,
    precision: Precision,
    epoch: usize,
    batch_index: usize,
) -> Result<StepResult> {
    model.zero_grad();

    let (logits, cache) = model.forward(&batch.inputs, precision)?;
    let loss = CrossEntropyLoss::loss(&logits, &batch.labels)?;
    if !loss.is_finite() {
        return Err(EegError::NonFiniteLoss { epoch, batch: batch_index });
    }

    let correct = logits
        .data
        .chunks(model.spec.num_classes)
        .zip(&batch.labels)
        .filter(|(row, &label)| argmax(row) == label)
        .count();

    // ∂(scale · L)/∂logits
    let scale = scaler.scale();
    let grad = CrossEntropyLoss::derivative(&logits, &batch.labels)?.map(|g| g * scale);
    model.backward(&cache, &grad, precision)?;

    let outcome = scaler.step(optimizer, &mut model.params_mut());
    scaler.update();

    Ok(StepResult { loss, correct, outcome })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::dataset::EegDataset;
    use crate::data::loader::BatchLoader;
    use crate::network::spec::{ArchitectureSpec, ConvLayerSpec};
    use crate::optim::Adam;

    fn tiny() -> ArchitectureSpec {
        ArchitectureSpec {
            segments: 2,
            rows: 4,
            cols: 4,
            conv_layers: vec![ConvLayerSpec::new(4, 3, 1)],
            embedding_dim: 8,
            hidden_size: 6,
            ..ArchitectureSpec::default()
        }
    }

    fn first_batch(ds: &EegDataset) -> Batch {
        let loader = BatchLoader::new(ds, ds.len(), 0, 0);
        loader.assemble(&loader.epoch_order(0)).unwrap()
    }

    #[test]
    fn repeated_steps_reduce_the_loss() {
        let spec = tiny();
        let ds = EegDataset::synthetic(&spec, 8, 1).unwrap();
        let batch = first_batch(&ds);
        let mut model = EegNet::new(&spec, 7).unwrap();
        let mut opt = Adam::new(1e-2);
        let mut scaler = GradScaler::new(false);

        let first = train_step(&mut model, &batch, &mut opt, &mut scaler, Precision::Full, 0, 0).unwrap();
        let mut last = first;
        for i in 1..30 {
            last = train_step(&mut model, &batch, &mut opt, &mut scaler, Precision::Full, 0, i).unwrap();
            assert_eq!(last.outcome, StepOutcome::Applied);
        }
        assert!(last.loss < first.loss, "{} !< {}", last.loss, first.loss);
        assert!(last.correct <= batch.len());
    }

    #[test]
    fn overflowing_scale_skips_the_update() {
        let spec = tiny();
        let ds = EegDataset::synthetic(&spec, 4, 2).unwrap();
        let batch = first_batch(&ds);
        let mut model = EegNet::new(&spec, 3).unwrap();
        let before: Vec<_> = model.params().iter().map(|p| p.value.clone()).collect();

        // f16 tops out at 65504, so this scale overflows every gradient path
        let mut scaler = GradScaler::new(true).with_init_scale(1e30);
        let mut opt = Adam::new(1e-3);
        let step = train_step(&mut model, &batch, &mut opt, &mut scaler, Precision::Half, 0, 0).unwrap();

        assert_eq!(step.outcome, StepOutcome::Skipped);
        assert_eq!(scaler.scale(), 5e29);
        let after: Vec<_> = model.params().iter().map(|p| p.value.clone()).collect();
        assert_eq!(before, after);
    }

    #[test]
    fn non_finite_loss_is_fatal() {
        let spec = tiny();
        let ds = EegDataset::synthetic(&spec, 2, 2).unwrap();
        let batch = first_batch(&ds);
        let mut model = EegNet::new(&spec, 3).unwrap();
        model.head.biases.value.data[0] = f32::NAN;
        let err = train_step(&mut model, &batch, &mut Adam::new(1e-3), &mut GradScaler::new(false), Precision::Full, 4, 9)
            .unwrap_err();
        assert!(matches!(err, EegError::NonFiniteLoss { epoch: 4, batch: 9 }));
    }
}
