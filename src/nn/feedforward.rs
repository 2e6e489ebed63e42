//! Position-wise feed-forward sublayers.
//!
//! - [`ParallelGatedMLP`]: `l3(silu(l1 x) * l2 x)` (Shazeer, 2020)
//! - [`FeedForward`]: `W2(relu(W1 x))`

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::functional::{relu, silu};
use super::linear::Linear;
use super::module::Module;
use crate::error::PocatError;
use crate::tensor::Tensor;

/// Which feed-forward sublayer the encoder blocks use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedForwardKind {
    /// Gated SiLU MLP
    #[default]
    Siglu,
    /// Two-layer ReLU MLP
    Ff,
}

impl FromStr for FeedForwardKind {
    type Err = PocatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "siglu" => Ok(Self::Siglu),
            "ff" => Ok(Self::Ff),
            other => Err(PocatError::UnknownVariant {
                kind: "ffd",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for FeedForwardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Siglu => "siglu",
            Self::Ff => "ff",
        })
    }
}

/// Inner width of the gated MLP: `2 * d * 4 / 3` rounded up to a multiple of 256.
#[must_use]
pub fn gated_inner_size(hidden_size: usize) -> usize {
    const MULTIPLE_OF: usize = 256;
    let inner = 2 * hidden_size * 4 / 3;
    MULTIPLE_OF * inner.div_ceil(MULTIPLE_OF)
}

/// Gated SiLU MLP without biases.
pub struct ParallelGatedMLP {
    l1: Linear,
    l2: Linear,
    l3: Linear,
}

impl ParallelGatedMLP {
    /// Create the gated MLP for `hidden_size` features.
    #[must_use]
    pub fn new(hidden_size: usize, mut seeds: impl FnMut() -> Option<u64>) -> Self {
        let inner = gated_inner_size(hidden_size);
        Self {
            l1: Linear::without_bias_with_seed(hidden_size, inner, seeds()),
            l2: Linear::without_bias_with_seed(hidden_size, inner, seeds()),
            l3: Linear::without_bias_with_seed(inner, hidden_size, seeds()),
        }
    }

    /// Width of the gated projection.
    #[must_use]
    pub fn inner_size(&self) -> usize {
        self.l1.out_features()
    }
}

impl Module for ParallelGatedMLP {
    fn forward(&self, input: &Tensor) -> Tensor {
        let gate = silu(&self.l1.forward(input));
        let value = self.l2.forward(input);
        self.l3.forward(&gate.mul(&value))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.l1.parameters();
        p.extend(self.l2.parameters());
        p.extend(self.l3.parameters());
        p
    }
}

/// Classic two-layer feed-forward network with `ReLU`.
pub struct FeedForward {
    w1: Linear,
    w2: Linear,
}

impl FeedForward {
    /// Create the MLP `embedding_dim -> ff_hidden_dim -> embedding_dim`.
    #[must_use]
    pub fn new(
        embedding_dim: usize,
        ff_hidden_dim: usize,
        mut seeds: impl FnMut() -> Option<u64>,
    ) -> Self {
        Self {
            w1: Linear::with_seed(embedding_dim, ff_hidden_dim, seeds()),
            w2: Linear::with_seed(ff_hidden_dim, embedding_dim, seeds()),
        }
    }
}

impl Module for FeedForward {
    fn forward(&self, input: &Tensor) -> Tensor {
        self.w2.forward(&relu(&self.w1.forward(input)))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.w1.parameters();
        p.extend(self.w2.parameters());
        p
    }
}

/// Feed-forward sublayer chosen from a [`FeedForwardKind`].
pub enum FeedForwardBlock {
    /// Gated SiLU MLP
    Gated(ParallelGatedMLP),
    /// ReLU MLP
    Plain(FeedForward),
}

impl FeedForwardBlock {
    /// Build the sublayer.
    #[must_use]
    pub fn new(
        kind: FeedForwardKind,
        embedding_dim: usize,
        ff_hidden_dim: usize,
        seeds: impl FnMut() -> Option<u64>,
    ) -> Self {
        match kind {
            FeedForwardKind::Siglu => Self::Gated(ParallelGatedMLP::new(embedding_dim, seeds)),
            FeedForwardKind::Ff => Self::Plain(FeedForward::new(embedding_dim, ff_hidden_dim, seeds)),
        }
    }
}

impl Module for FeedForwardBlock {
    fn forward(&self, input: &Tensor) -> Tensor {
        match self {
            Self::Gated(m) => m.forward(input),
            Self::Plain(m) => m.forward(input),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Self::Gated(m) => m.parameters(),
            Self::Plain(m) => m.parameters(),
        }
    }
}

impl fmt::Debug for FeedForwardBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Gated(m) => f
                .debug_struct("ParallelGatedMLP")
                .field("inner_size", &m.inner_size())
                .finish(),
            Self::Plain(m) => f
                .debug_struct("FeedForward")
                .field("hidden", &m.w1.out_features())
                .finish(),
        }
    }
}
