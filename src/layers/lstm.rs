use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EegError, Result};
use crate::layers::param::{Module, Param};
use crate::math::ops::{add_column_sums, matmul, matmul_at, matmul_bt};
use crate::math::precision::Precision;
use crate::math::tensor::Tensor;

/// Single-layer, batch-first LSTM that returns only the final hidden state.
///
/// Gate rows are stacked `[input, forget, cell, output]`, each `hidden_size`
/// tall, with separate input and recurrent biases. The initial hidden and
/// cell states are zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Lstm {
    pub input_size: usize,
    pub hidden_size: usize,
    /// Shape `(4·hidden, input)`.
    pub w_ih: Param,
    /// Shape `(4·hidden, hidden)`.
    pub w_hh: Param,
    pub b_ih: Param,
    pub b_hh: Param,
}

/// Activations of one timestep, kept for backpropagation through time.
#[derive(Debug, Clone)]
struct StepTape {
    x: Vec<f32>,
    h_prev: Vec<f32>,
    c_prev: Vec<f32>,
    i: Vec<f32>,
    f: Vec<f32>,
    g: Vec<f32>,
    o: Vec<f32>,
    c: Vec<f32>,
}

#[derive(Debug, Clone)]
pub struct LstmCache {
    batch: usize,
    steps: Vec<StepTape>,
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

impl Lstm {
    pub fn new<R: Rng + ?Sized>(input_size: usize, hidden_size: usize, rng: &mut R) -> Lstm {
        let bound = 1.0 / (hidden_size as f32).sqrt();
        let rows = 4 * hidden_size;
        Lstm {
            input_size,
            hidden_size,
            w_ih: Param::new(Tensor::uniform(&[rows, input_size], bound, rng)),
            w_hh: Param::new(Tensor::uniform(&[rows, hidden_size], bound, rng)),
            b_ih: Param::new(Tensor::uniform(&[rows], bound, rng)),
            b_hh: Param::new(Tensor::uniform(&[rows], bound, rng)),
        }
    }

    /// Runs the whole `(batch, steps, input)` sequence and returns the final
    /// hidden state `(batch, hidden)`.
    pub fn forward(&self, input: &Tensor, precision: Precision) -> Result<(Tensor, LstmCache)> {
        if input.rank() != 3 || input.shape[2] != self.input_size || input.shape[1] == 0 {
            let mut expected = input.shape.clone();
            expected.resize(3, 1);
            expected[2] = self.input_size;
            return Err(EegError::shape_mismatch("Lstm::forward", &expected, &input.shape));
        }
        let (batch, steps) = (input.shape[0], input.shape[1]);
        let (hid, inp) = (self.hidden_size, self.input_size);

        let w_ih = precision.cast(&self.w_ih.value.data);
        let w_hh = precision.cast(&self.w_hh.value.data);
        let bias: Vec<f32> = self.b_ih.value.data.iter().zip(&self.b_hh.value.data).map(|(a, b)| a + b).collect();

        let mut h = vec![0.0f32; batch * hid];
        let mut c = vec![0.0f32; batch * hid];
        let mut tape = Vec::with_capacity(steps);

        for t in 0..steps {
            let mut x_t = Vec::with_capacity(batch * inp);
            for b in 0..batch {
                let start = (b * steps + t) * inp;
                x_t.extend_from_slice(&input.data[start..start + inp]);
            }
            precision.round_slice(&mut x_t);
            let h_prev = precision.cast(&h).into_owned();

            let mut gates = matmul_bt(&x_t, &w_ih, batch, inp, 4 * hid);
            let recurrent = matmul_bt(&h_prev, &w_hh, batch, hid, 4 * hid);
            for (row, rec_row) in gates.chunks_mut(4 * hid).zip(recurrent.chunks(4 * hid)) {
                for ((v, r), b) in row.iter_mut().zip(rec_row).zip(&bias) {
                    *v += r + b;
                }
            }
            precision.round_slice(&mut gates);

            let mut step = StepTape {
                x: x_t,
                h_prev,
                c_prev: c.clone(),
                i: vec![0.0; batch * hid],
                f: vec![0.0; batch * hid],
                g: vec![0.0; batch * hid],
                o: vec![0.0; batch * hid],
                c: vec![0.0; batch * hid],
            };
            for b in 0..batch {
                let row = &gates[b * 4 * hid..(b + 1) * 4 * hid];
                for j in 0..hid {
                    let k = b * hid + j;
                    let i = sigmoid(row[j]);
                    let f = sigmoid(row[hid + j]);
                    let g = row[2 * hid + j].tanh();
                    let o = sigmoid(row[3 * hid + j]);
                    let c_new = f * c[k] + i * g;
                    step.i[k] = i;
                    step.f[k] = f;
                    step.g[k] = g;
                    step.o[k] = o;
                    step.c[k] = c_new;
                    c[k] = c_new;
                    h[k] = o * c_new.tanh();
                }
            }
            tape.push(step);
        }

        precision.round_slice(&mut h);
        let out = Tensor::from_vec(&[batch, hid], h)?;
        Ok((out, LstmCache { batch, steps: tape }))
    }

    /// Backpropagation through time from ∂L/∂h_T. Accumulates parameter
    /// gradients and returns ∂L/∂x with the input's `(batch, steps, input)`
    /// shape.
    pub fn backward(&mut self, cache: &LstmCache, grad_h: &Tensor, precision: Precision) -> Result<Tensor> {
        let (batch, steps) = (cache.batch, cache.steps.len());
        let (hid, inp) = (self.hidden_size, self.input_size);
        grad_h.expect_shape("Lstm::backward", &[batch, hid])?;

        let w_ih = precision.cast(&self.w_ih.value.data);
        let w_hh = precision.cast(&self.w_hh.value.data);

        let mut w_ih_grad = vec![0.0f32; 4 * hid * inp];
        let mut w_hh_grad = vec![0.0f32; 4 * hid * hid];
        let mut b_grad = vec![0.0f32; 4 * hid];
        let mut grad_x = vec![0.0f32; batch * steps * inp];

        let mut dh = grad_h.data.clone();
        let mut dc = vec![0.0f32; batch * hid];

        for t in (0..steps).rev() {
            let st = &cache.steps[t];
            let mut dgates = vec![0.0f32; batch * 4 * hid];
            let mut dc_prev = vec![0.0f32; batch * hid];

            for b in 0..batch {
                let row = &mut dgates[b * 4 * hid..(b + 1) * 4 * hid];
                for j in 0..hid {
                    let k = b * hid + j;
                    let (i, f, g, o) = (st.i[k], st.f[k], st.g[k], st.o[k]);
                    let tanh_c = st.c[k].tanh();

                    let d_o = dh[k] * tanh_c * o * (1.0 - o);
                    let dct = dh[k] * o * (1.0 - tanh_c * tanh_c) + dc[k];

                    row[j] = dct * g * i * (1.0 - i);
                    row[hid + j] = dct * st.c_prev[k] * f * (1.0 - f);
                    row[2 * hid + j] = dct * i * (1.0 - g * g);
                    row[3 * hid + j] = d_o;
                    dc_prev[k] = dct * f;
                }
            }
            precision.round_slice(&mut dgates);

            let dw_ih = matmul_at(&dgates, &st.x, 4 * hid, batch, inp);
            let dw_hh = matmul_at(&dgates, &st.h_prev, 4 * hid, batch, hid);
            w_ih_grad.iter_mut().zip(&dw_ih).for_each(|(a, v)| *a += v);
            w_hh_grad.iter_mut().zip(&dw_hh).for_each(|(a, v)| *a += v);
            add_column_sums(&dgates, batch, 4 * hid, &mut b_grad);

            let dx_t = matmul(&dgates, &w_ih, batch, 4 * hid, inp);
            for b in 0..batch {
                let start = (b * steps + t) * inp;
                grad_x[start..start + inp].copy_from_slice(&dx_t[b * inp..(b + 1) * inp]);
            }

            dh = matmul(&dgates, &w_hh, batch, 4 * hid, hid);
            precision.round_slice(&mut dh);
            dc = dc_prev;
        }

        precision.round_slice(&mut w_ih_grad);
        precision.round_slice(&mut w_hh_grad);
        precision.round_slice(&mut b_grad);
        precision.round_slice(&mut grad_x);
        self.w_ih.accumulate(&w_ih_grad);
        self.w_hh.accumulate(&w_hh_grad);
        self.b_ih.accumulate(&b_grad);
        self.b_hh.accumulate(&b_grad);

        Tensor::from_vec(&[batch, steps, inp], grad_x)
    }
}

impl Module for Lstm {
    fn params(&self) -> Vec<&Param> {
        vec![&self.w_ih, &self.w_hh, &self.b_ih, &self.b_hh]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.w_ih, &mut self.w_hh, &mut self.b_ih, &mut self.b_hh]
    }
}
