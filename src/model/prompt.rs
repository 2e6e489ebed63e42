//! Prompt network: global problem parameters to a node-broadcast embedding.

use crate::nn::{F, Linear, Module, SeedStream};
use crate::tensor::Tensor;

/// Two-layer MLP `prompt_feature_dim -> d/2 -> d` with a `ReLU` in between.
#[derive(Debug)]
pub struct PromptNet {
    hidden: Linear,
    out: Linear,
}

impl PromptNet {
    /// Create the prompt network.
    #[must_use]
    pub fn new(prompt_feature_dim: usize, embedding_dim: usize, seeds: &mut SeedStream) -> Self {
        let half = embedding_dim / 2;
        Self {
            hidden: Linear::with_seed(prompt_feature_dim, half, seeds.next_seed()),
            out: Linear::with_seed(half, embedding_dim, seeds.next_seed()),
        }
    }

    /// Width of the produced embedding.
    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.out.out_features()
    }
}

impl Module for PromptNet {
    /// `[B, P] -> [B, 1, d]`
    fn forward(&self, input: &Tensor) -> Tensor {
        let b = input.shape()[0];
        let h = F::relu(&self.hidden.forward(input));
        self.out.forward(&h).reshape(&[b, 1, self.embedding_dim()])
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.hidden.parameters();
        p.extend(self.out.parameters());
        p
    }
}
