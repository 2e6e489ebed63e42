//! Weight initialization.
//!
//! - Xavier/Glorot uniform (Glorot & Bengio, 2010) for projection weights
//! - constants for normalization scales and biases
//!
//! Every initializer takes an optional seed. A model is made reproducible
//! by drawing per-layer seeds from one [`SeedStream`].

use crate::tensor::Tensor;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Xavier uniform initialization (Glorot & Bengio, 2010).
///
/// Samples from U(-a, a) where a = sqrt(6 / (`fan_in` + `fan_out`)).
#[must_use]
pub fn xavier_uniform(shape: &[usize], fan_in: usize, fan_out: usize, seed: Option<u64>) -> Tensor {
    let a = (6.0 / (fan_in + fan_out) as f32).sqrt();
    uniform(shape, -a, a, seed)
}

/// Uniform distribution initialization over `[low, high)`.
#[must_use]
pub fn uniform(shape: &[usize], low: f32, high: f32, seed: Option<u64>) -> Tensor {
    let numel: usize = shape.iter().product();
    let mut rng = match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    };
    let data: Vec<f32> = (0..numel).map(|_| rng.gen_range(low..high)).collect();
    Tensor::from_vec(data, shape)
}

/// Constant initialization.
#[must_use]
pub fn constant(shape: &[usize], value: f32) -> Tensor {
    Tensor::full(shape, value)
}

/// Deterministic source of per-layer seeds.
///
/// Built from `Some(seed)`, it yields the same sequence of layer seeds on
/// every run, so two models constructed from the same configuration hold
/// identical weights. Built from `None`, every layer is seeded from
/// entropy.
#[derive(Debug)]
pub struct SeedStream {
    rng: Option<StdRng>,
}

impl SeedStream {
    /// Create a stream rooted at `seed`.
    #[must_use]
    pub fn new(seed: Option<u64>) -> Self {
        Self {
            rng: seed.map(StdRng::seed_from_u64),
        }
    }

    /// Seed for the next layer.
    pub fn next_seed(&mut self) -> Option<u64> {
        self.rng.as_mut().map(|rng| rng.gen())
    }
}
