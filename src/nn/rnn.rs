//! Recurrent cell used to summarize a partially built solution.
//!
//! # References
//!
//! - Cho, K., et al. (2014). Learning phrase representations using RNN
//!   encoder-decoder for statistical machine translation. EMNLP.

use super::functional::{sigmoid, tanh};
use super::linear::Linear;
use super::module::Module;
use crate::tensor::Tensor;

/// Single-step Gated Recurrent Unit.
///
/// ```text
/// r = σ(W_ir @ x + b_ir + W_hr @ h + b_hr)        // reset gate
/// z = σ(W_iz @ x + b_iz + W_hz @ h + b_hz)        // update gate
/// n = tanh(W_in @ x + b_in + r * (W_hn @ h + b_hn)) // candidate
/// h' = (1 - z) * n + z * h
/// ```
pub struct GRUCell {
    input_size: usize,
    hidden_size: usize,
    w_ir: Linear,
    w_hr: Linear,
    w_iz: Linear,
    w_hz: Linear,
    w_in: Linear,
    w_hn: Linear,
}

impl GRUCell {
    /// Create a cell mapping `input_size` inputs onto a `hidden_size` state.
    #[must_use]
    pub fn new(input_size: usize, hidden_size: usize, mut seeds: impl FnMut() -> Option<u64>) -> Self {
        Self {
            input_size,
            hidden_size,
            w_ir: Linear::with_seed(input_size, hidden_size, seeds()),
            w_hr: Linear::with_seed(hidden_size, hidden_size, seeds()),
            w_iz: Linear::with_seed(input_size, hidden_size, seeds()),
            w_hz: Linear::with_seed(hidden_size, hidden_size, seeds()),
            w_in: Linear::with_seed(input_size, hidden_size, seeds()),
            w_hn: Linear::with_seed(hidden_size, hidden_size, seeds()),
        }
    }

    /// Advance the hidden state by one step: `[B, input] x [B, hidden] -> [B, hidden]`.
    ///
    /// # Panics
    ///
    /// Panics if the batch sizes or feature widths disagree.
    #[must_use]
    pub fn step(&self, x: &Tensor, h: &Tensor) -> Tensor {
        assert_eq!(x.shape()[0], h.shape()[0], "GRUCell batch mismatch");
        assert_eq!(h.last_dim(), self.hidden_size, "GRUCell hidden size mismatch");

        let r = sigmoid(&self.w_ir.forward(x).add(&self.w_hr.forward(h)));
        let z = sigmoid(&self.w_iz.forward(x).add(&self.w_hz.forward(h)));
        let n = tanh(&self.w_in.forward(x).add(&r.mul(&self.w_hn.forward(h))));

        // (1 - z) * n + z * h
        let keep = z.mul(h);
        let update = z.map(|v| 1.0 - v).mul(&n);
        update.add(&keep)
    }

    /// Input width.
    #[must_use]
    pub fn input_size(&self) -> usize {
        self.input_size
    }

    /// Hidden state width.
    #[must_use]
    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    /// Gate weights and biases, input-side and hidden-side per gate.
    #[must_use]
    pub fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.w_ir.parameters();
        p.extend(self.w_hr.parameters());
        p.extend(self.w_iz.parameters());
        p.extend(self.w_hz.parameters());
        p.extend(self.w_in.parameters());
        p.extend(self.w_hn.parameters());
        p
    }
}

impl std::fmt::Debug for GRUCell {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GRUCell")
            .field("input_size", &self.input_size)
            .field("hidden_size", &self.hidden_size)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cell(input: usize, hidden: usize) -> GRUCell {
        let mut s = 0u64;
        GRUCell::new(input, hidden, move || {
            s += 1;
            Some(s)
        })
    }

    #[test]
    fn test_gru_cell_creation() {
        let gru = cell(10, 20);
        assert_eq!(gru.input_size(), 10);
        assert_eq!(gru.hidden_size(), 20);
        // 6 linear layers * 2 (weight + bias)
        assert_eq!(gru.parameters().len(), 12);
    }

    #[test]
    fn test_gru_cell_step_shape() {
        let gru = cell(4, 8);
        let h = gru.step(&Tensor::ones(&[2, 4]), &Tensor::zeros(&[2, 8]));
        assert_eq!(h.shape(), &[2, 8]);
    }

    #[test]
    fn test_gru_cell_state_bounded_from_zero() {
        // From h = 0, h' = (1 - z) * n with n in (-1, 1)
        let gru = cell(4, 8);
        let h = gru.step(&Tensor::full(&[3, 4], 5.0), &Tensor::zeros(&[3, 8]));
        for &v in h.data() {
            assert!((-1.0..=1.0).contains(&v));
        }
    }

    #[test]
    fn test_gru_cell_deterministic() {
        let gru = cell(4, 8);
        let x = Tensor::new(&[0.1, -0.2, 0.3, 0.4], &[1, 4]);
        let h = Tensor::full(&[1, 8], 0.5);
        assert_eq!(gru.step(&x, &h), gru.step(&x, &h));
    }

    #[test]
    fn test_gru_cell_rows_independent() {
        let gru = cell(2, 3);
        let x = Tensor::new(&[1.0, 2.0, -1.0, 0.5], &[2, 2]);
        let h = Tensor::new(&[0.1, 0.2, 0.3, -0.3, -0.2, -0.1], &[2, 3]);
        let both = gru.step(&x, &h);
        let first = gru.step(
            &Tensor::new(&[1.0, 2.0], &[1, 2]),
            &Tensor::new(&[0.1, 0.2, 0.3], &[1, 3]),
        );
        for (a, b) in both.data()[..3].iter().zip(first.data()) {
            assert!((a - b).abs() < 1e-6);
        }
    }
}
