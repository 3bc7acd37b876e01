use crate::layers::param::Param;
use crate::optim::Optimizer;

/// Adam with bias-corrected moment estimates.
///
///   m ← β1·m + (1−β1)·g
///   v ← β2·v + (1−β2)·g²
///   θ ← θ − lr · m̂ / (√v̂ + ε),  m̂ = m/(1−β1ᵗ), v̂ = v/(1−β2ᵗ)
///
/// Moment buffers are allocated on the first step and matched to parameters
/// by position, so the same parameter order must be passed on every call.
pub struct Adam {
    pub learning_rate: f32,
    pub beta1: f32,
    pub beta2: f32,
    pub eps: f32,
    step_count: u64,
    m: Vec<Vec<f32>>,
    v: Vec<Vec<f32>>,
}

impl Adam {
    pub fn new(learning_rate: f32) -> Adam {
        Adam::with_betas(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn with_betas(learning_rate: f32, beta1: f32, beta2: f32, eps: f32) -> Adam {
        Adam {
            learning_rate,
            beta1,
            beta2,
            eps,
            step_count: 0,
            m: Vec::new(),
            v: Vec::new(),
        }
    }

    pub fn steps_taken(&self) -> u64 {
        self.step_count
    }
}

impl Optimizer for Adam {
    fn step(&mut self, params: &mut [&mut Param]) {
        if self.m.len() != params.len() {
            self.m = params.iter().map(|p| vec![0.0; p.numel()]).collect();
            self.v = params.iter().map(|p| vec![0.0; p.numel()]).collect();
        }
        self.step_count += 1;
        let t = self.step_count as i32;
        let bias_c1 = 1.0 - (self.beta1 as f64).powi(t);
        let bias_c2 = 1.0 - (self.beta2 as f64).powi(t);
        let step_size = (self.learning_rate as f64 / bias_c1) as f32;
        let bias_c2_sqrt = bias_c2.sqrt() as f32;
        let (b1, b2, eps) = (self.beta1, self.beta2, self.eps);

        for ((p, m), v) in params.iter_mut().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            let Param { value, grad } = &mut **p;
            for (((w, &g), m), v) in value.data.iter_mut().zip(&grad.data).zip(m.iter_mut()).zip(v.iter_mut()) {
                *m = b1 * *m + (1.0 - b1) * g;
                *v = b2 * *v + (1.0 - b2) * g * g;
                let denom = v.sqrt() / bias_c2_sqrt + eps;
                *w -= step_size * *m / denom;
            }
        }
    }
}
