use tracing::{debug, warn};

use crate::layers::param::Param;
use crate::optim::Optimizer;

/// Outcome of one [`GradScaler::step`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Applied,
    /// A gradient overflowed; parameters were left untouched.
    Skipped,
}

/// Dynamic loss scaling for reduced-precision training.
///
/// The loss gradient is multiplied by `scale` before backpropagation so small
/// gradients survive the narrow format. Before the optimizer step gradients
/// are divided by `scale` and checked: any non-finite value skips the step
/// and halves the scale; `growth_interval` consecutive clean steps double it.
///
/// A disabled scaler has scale 1 and never skips.
#[derive(Debug, Clone)]
pub struct GradScaler {
    enabled: bool,
    scale: f32,
    growth_factor: f32,
    backoff_factor: f32,
    growth_interval: u32,
    growth_tracker: u32,
    found_inf: bool,
}

impl GradScaler {
    pub const DEFAULT_INIT_SCALE: f32 = 65536.0;

    pub fn new(enabled: bool) -> GradScaler {
        GradScaler {
            enabled,
            scale: if enabled { Self::DEFAULT_INIT_SCALE } else { 1.0 },
            growth_factor: 2.0,
            backoff_factor: 0.5,
            growth_interval: 2000,
            growth_tracker: 0,
            found_inf: false,
        }
    }

    pub fn with_init_scale(mut self, scale: f32) -> GradScaler {
        if self.enabled {
            self.scale = scale;
        }
        self
    }

    pub fn with_growth_interval(mut self, interval: u32) -> GradScaler {
        self.growth_interval = interval.max(1);
        self
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Divides every gradient by the current scale and reports whether any
    /// of them is non-finite.
    pub fn unscale(&self, params: &mut [&mut Param]) -> bool {
        let inv = 1.0 / self.scale;
        let mut found_inf = false;
        for p in params.iter_mut() {
            for g in p.grad.data.iter_mut() {
                *g *= inv;
                if !g.is_finite() {
                    found_inf = true;
                }
            }
        }
        found_inf
    }

    /// Unscales gradients and runs the optimizer unless they overflowed.
    pub fn step(&mut self, optimizer: &mut dyn Optimizer, params: &mut [&mut Param]) -> StepOutcome {
        if !self.enabled {
            optimizer.step(params);
            return StepOutcome::Applied;
        }
        self.found_inf = self.unscale(params);
        if self.found_inf {
            warn!(scale = self.scale, "gradient overflow, skipping optimizer step");
            StepOutcome::Skipped
        } else {
            optimizer.step(params);
            StepOutcome::Applied
        }
    }

    /// Adjusts the scale for the next batch based on the last `step`.
    pub fn update(&mut self) {
        if !self.enabled {
            return;
        }
        if self.found_inf {
            self.scale *= self.backoff_factor;
            self.growth_tracker = 0;
            debug!(scale = self.scale, "loss scale backed off");
        } else {
            self.growth_tracker += 1;
            if self.growth_tracker >= self.growth_interval {
                self.scale *= self.growth_factor;
                self.growth_tracker = 0;
                debug!(scale = self.scale, "loss scale grown");
            }
        }
        self.found_inf = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::tensor::Tensor;
    use crate::optim::sgd::Sgd;

    fn param_with_grad(g: f32) -> Param {
        let mut p = Param::new(Tensor::from_vec(&[1], vec![1.0]).unwrap());
        p.accumulate(&[g]);
        p
    }

    #[test]
    fn overflow_skips_step_and_backs_off() {
        let mut scaler = GradScaler::new(true);
        let mut opt = Sgd::new(1.0);
        let mut p = param_with_grad(f32::INFINITY);
        assert_eq!(scaler.step(&mut opt, &mut [&mut p]), StepOutcome::Skipped);
        assert_eq!(p.value.data[0], 1.0);
        scaler.update();
        assert_eq!(scaler.scale(), 32768.0);
    }

    #[test]
    fn clean_steps_unscale_and_grow() {
        let mut scaler = GradScaler::new(true).with_init_scale(4.0).with_growth_interval(2);
        let mut opt = Sgd::new(1.0);
        for _ in 0..2 {
            let mut p = param_with_grad(2.0 * scaler.scale());
            assert_eq!(scaler.step(&mut opt, &mut [&mut p]), StepOutcome::Applied);
            // unscaled gradient is 2.0
            assert_eq!(p.value.data[0], -1.0);
            assert_eq!(scaler.scale(), 4.0);
            scaler.update();
        }
        assert_eq!(scaler.scale(), 8.0);
    }

    #[test]
    fn disabled_scaler_is_transparent() {
        let mut scaler = GradScaler::new(false);
        assert_eq!(scaler.scale(), 1.0);
        let mut opt = Sgd::new(1.0);
        let mut p = param_with_grad(0.5);
        assert_eq!(scaler.step(&mut opt, &mut [&mut p]), StepOutcome::Applied);
        scaler.update();
        assert_eq!(p.value.data[0], 0.5);
        assert_eq!(scaler.scale(), 1.0);
    }
}
