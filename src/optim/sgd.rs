use crate::layers::param::Param;
use crate::optim::Optimizer;

/// Plain stochastic gradient descent: `θ ← θ − lr·g`.
pub struct Sgd {
    pub learning_rate: f32,
}

impl Sgd {
    pub fn new(learning_rate: f32) -> Sgd {
        Sgd { learning_rate }
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, params: &mut [&mut Param]) {
        for p in params.iter_mut() {
            let lr = self.learning_rate;
            for (w, g) in p.value.data.iter_mut().zip(&p.grad.data) {
                *w -= lr * g;
            }
        }
    }
}
