//! Functional interface for activations and normalization kernels.
//!
//! All reductions run over the last dimension unless stated otherwise.

use crate::tensor::Tensor;

/// `ReLU` activation: max(0, x)
#[must_use]
pub fn relu(x: &Tensor) -> Tensor {
    x.map(relu_scalar)
}

/// Scalar ReLU, delegated to `trueno::relu_scalar`.
#[inline]
#[must_use]
pub fn relu_scalar(x: f32) -> f32 {
    trueno::relu_scalar(x)
}

/// Sigmoid activation: 1 / (1 + exp(-x))
#[must_use]
pub fn sigmoid(x: &Tensor) -> Tensor {
    x.map(sigmoid_scalar)
}

/// Scalar sigmoid, delegated to `trueno::sigmoid_scalar`.
#[inline]
#[must_use]
pub fn sigmoid_scalar(x: f32) -> f32 {
    trueno::sigmoid_scalar(x)
}

/// `SiLU` (Swish) activation: x * sigmoid(x)
#[must_use]
pub fn silu(x: &Tensor) -> Tensor {
    x.map(silu_scalar)
}

/// Scalar `SiLU`, delegated to `trueno::silu_scalar`.
#[inline]
#[must_use]
pub fn silu_scalar(x: f32) -> f32 {
    trueno::silu_scalar(x)
}

/// Hyperbolic tangent.
#[must_use]
pub fn tanh(x: &Tensor) -> Tensor {
    x.map(f32::tanh)
}

/// Softmax of a single row.
#[must_use]
pub fn softmax_1d(logits: &[f32]) -> Vec<f32> {
    log_softmax_1d(logits).into_iter().map(f32::exp).collect()
}

/// Log-softmax of a single row, shifted by the row maximum for stability.
#[must_use]
pub fn log_softmax_1d(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().fold(f32::NEG_INFINITY, |a, &b| a.max(b));
    let log_sum_exp = logits.iter().map(|&v| (v - max_val).exp()).sum::<f32>().ln();
    logits.iter().map(|&v| v - max_val - log_sum_exp).collect()
}

/// Softmax over the last dimension.
#[must_use]
pub fn softmax(x: &Tensor) -> Tensor {
    per_row(x, softmax_1d)
}

/// Log-softmax over the last dimension.
#[must_use]
pub fn log_softmax(x: &Tensor) -> Tensor {
    per_row(x, log_softmax_1d)
}

/// Layer normalization over the last dimension.
///
/// Equation: y\_i = (x\_i - mean) / sqrt(var + eps) * weight\_i + bias\_i
#[must_use]
pub fn layer_norm(x: &Tensor, weight: &Tensor, bias: &Tensor, eps: f32) -> Tensor {
    let (w, b) = (weight.data(), bias.data());
    per_row(x, |row| {
        let n = row.len() as f32;
        let mean = row.iter().sum::<f32>() / n;
        let var = row.iter().map(|&v| (v - mean).powi(2)).sum::<f32>() / n;
        let inv_std = 1.0 / (var + eps).sqrt();
        row.iter()
            .enumerate()
            .map(|(i, &v)| (v - mean) * inv_std * w[i] + b[i])
            .collect()
    })
}

/// RMS normalization over the last dimension (no mean centering).
///
/// Equation: y\_i = x\_i / sqrt(mean(x^2) + eps) * weight\_i
#[must_use]
pub fn rms_norm(x: &Tensor, weight: &Tensor, eps: f32) -> Tensor {
    let w = weight.data();
    per_row(x, |row| {
        let mean_sq = row.iter().map(|&v| v * v).sum::<f32>() / row.len() as f32;
        let inv_rms = 1.0 / (mean_sq + eps).sqrt();
        row.iter().enumerate().map(|(i, &v)| v * inv_rms * w[i]).collect()
    })
}

/// Instance normalization of a `[B, N, C]` tensor.
///
/// Each channel `c` of each sample `b` is normalized over the `N` axis
/// (biased variance, no running statistics), then scaled and shifted by
/// `weight[c]` and `bias[c]`.
///
/// # Panics
///
/// Panics if `x` is not 3D.
#[must_use]
pub fn instance_norm(x: &Tensor, weight: &Tensor, bias: &Tensor, eps: f32) -> Tensor {
    assert_eq!(x.ndim(), 3, "instance_norm expects [B, N, C]");
    let (b, n, c) = (x.shape()[0], x.shape()[1], x.shape()[2]);
    let data = x.data();
    let (w, bi) = (weight.data(), bias.data());
    let mut out = vec![0.0; data.len()];

    for s in 0..b {
        let base = s * n * c;
        for ch in 0..c {
            let at = |i: usize| data[base + i * c + ch];
            let mean = (0..n).map(at).sum::<f32>() / n as f32;
            let var = (0..n).map(|i| (at(i) - mean).powi(2)).sum::<f32>() / n as f32;
            let inv_std = 1.0 / (var + eps).sqrt();
            for i in 0..n {
                out[base + i * c + ch] = (at(i) - mean) * inv_std * w[ch] + bi[ch];
            }
        }
    }

    Tensor::from_vec(out, x.shape())
}

fn per_row(x: &Tensor, f: impl Fn(&[f32]) -> Vec<f32>) -> Tensor {
    let last = x.last_dim();
    let mut out = Vec::with_capacity(x.numel());
    for row in x.data().chunks(last) {
        out.extend(f(row));
    }
    Tensor::from_vec(out, x.shape())
}
