//! Running summary of the partially built solution.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{PocatError, Result};
use crate::nn::{GRUCell, SeedStream};
use crate::tensor::Tensor;

/// How a committed `(child, parent)` pair is folded into the context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextUpdate {
    /// `context' = GRU([child ; parent], context)`, real steps only.
    #[default]
    Gru,
    /// Cumulative average of `(child + parent) / 2`, start step included.
    RunningMean,
}

impl FromStr for ContextUpdate {
    type Err = PocatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "gru" => Ok(Self::Gru),
            "running_mean" => Ok(Self::RunningMean),
            other => Err(PocatError::UnknownVariant {
                kind: "context_update",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for ContextUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Gru => "gru",
            Self::RunningMean => "running_mean",
        })
    }
}

/// Per-rollout context vector, `[B, d]`, plus the update count.
#[derive(Debug, Clone)]
pub struct Context {
    vector: Tensor,
    updates: usize,
}

impl Context {
    /// Current `[B, d]` context.
    #[must_use]
    pub fn vector(&self) -> &Tensor {
        &self.vector
    }

    /// Number of pairs folded in so far.
    #[must_use]
    pub fn updates(&self) -> usize {
        self.updates
    }
}

/// Folds committed edges into the running context.
pub struct ContextSummarizer {
    kind: ContextUpdate,
    gru: Option<GRUCell>,
}

impl ContextSummarizer {
    /// Create a summarizer over `embedding_dim`-wide node embeddings.
    #[must_use]
    pub fn new(kind: ContextUpdate, embedding_dim: usize, seeds: &mut SeedStream) -> Self {
        let gru = match kind {
            ContextUpdate::Gru => Some(GRUCell::new(2 * embedding_dim, embedding_dim, || {
                seeds.next_seed()
            })),
            ContextUpdate::RunningMean => None,
        };
        Self { kind, gru }
    }

    /// Update rule in use.
    #[must_use]
    pub fn kind(&self) -> ContextUpdate {
        self.kind
    }

    /// Whether the start pseudo-step is folded into the context.
    #[must_use]
    pub fn includes_start_step(&self) -> bool {
        self.kind == ContextUpdate::RunningMean
    }

    /// Initial context: the mean of all node embeddings, `[B, N, d] -> [B, d]`.
    #[must_use]
    pub fn initial(&self, embeddings: &Tensor) -> Context {
        Context {
            vector: embeddings.mean_dim1(),
            updates: 0,
        }
    }

    /// Fold one `[B, d]` child/parent embedding pair into `context`.
    ///
    /// # Panics
    ///
    /// Panics if the pair and the context disagree in shape.
    pub fn update(&self, context: &mut Context, child: &Tensor, parent: &Tensor) {
        context.vector = match &self.gru {
            Some(gru) => gru.step(&Tensor::concat_last(&[child, parent]), &context.vector),
            None => {
                let k = context.updates as f32;
                let pair = child.add(parent).mul_scalar(0.5);
                context
                    .vector
                    .zip_map(&pair, |c, p| (c * k + p) / (k + 1.0))
            }
        };
        context.updates += 1;
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        self.gru.as_ref().map_or_else(Vec::new, |gru| gru.parameters())
    }
}

impl fmt::Debug for ContextSummarizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextSummarizer")
            .field("kind", &self.kind)
            .finish()
    }
}
