//! Two-phase decoding policy.
//!
//! Each decision is a single-query attention over all node embeddings:
//!
//! ```text
//! phase 0 (select load):   q = W_lq(mean of tree nodes)          k = W_lk(nodes)
//! phase 1 (pick parent):   q = W_pq([context ; head embedding])  k = W_pk(nodes)
//! scores = q·kᵀ / sqrt(d), masked entries set to -1e9
//! log p  = log_softmax(scores)
//! ```
//!
//! The projections stay private; callers only see [`DecodingPolicy::select_load`]
//! and [`DecodingPolicy::select_parent`].

use std::fmt;
use std::str::FromStr;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::env::{Action, ActionMask};
use crate::error::{PocatError, Result};
use crate::nn::{F, Linear, Module, SeedStream};
use crate::tensor::Tensor;

/// Score assigned to illegal choices before the softmax.
pub const MASK_SENTINEL: f32 = -1e9;

/// Denominator guard for the tree-membership mean.
pub const TREE_MEAN_EPS: f32 = 1e-9;

/// Action selection rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecodeMode {
    /// Arg-max over legal entries; ties go to the lowest index.
    #[default]
    Greedy,
    /// Categorical sampling from the masked distribution.
    Sampling,
}

impl FromStr for DecodeMode {
    type Err = PocatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "greedy" => Ok(Self::Greedy),
            "sampling" => Ok(Self::Sampling),
            other => Err(PocatError::UnknownVariant {
                kind: "decode_mode",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for DecodeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Greedy => "greedy",
            Self::Sampling => "sampling",
        })
    }
}

/// Picks one index from a masked log-probability row.
///
/// Sampling draws exactly one uniform per call from a single generator,
/// so a seeded selector reproduces the same trajectory when the calls
/// arrive in the same order.
#[derive(Debug)]
pub struct ActionSelector {
    mode: DecodeMode,
    rng: StdRng,
}

impl ActionSelector {
    /// Create a selector; `seed = None` seeds from entropy.
    #[must_use]
    pub fn new(mode: DecodeMode, seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Self { mode, rng }
    }

    /// Deterministic arg-max selector.
    #[must_use]
    pub fn greedy() -> Self {
        Self::new(DecodeMode::Greedy, Some(0))
    }

    /// Sampling selector.
    #[must_use]
    pub fn sampling(seed: Option<u64>) -> Self {
        Self::new(DecodeMode::Sampling, seed)
    }

    /// Selection rule in use.
    #[must_use]
    pub fn mode(&self) -> DecodeMode {
        self.mode
    }

    /// Choose an index among the `legal` entries of `log_probs`.
    ///
    /// Returns `None` when nothing is legal.
    pub fn select(&mut self, log_probs: &[f32], legal: &[bool]) -> Option<usize> {
        let last_legal = legal.iter().rposition(|&m| m)?;
        match self.mode {
            DecodeMode::Greedy => {
                let mut best = last_legal;
                let mut best_val = f32::NEG_INFINITY;
                for (i, (&lp, &ok)) in log_probs.iter().zip(legal).enumerate() {
                    if ok && lp > best_val {
                        best = i;
                        best_val = lp;
                    }
                }
                Some(best)
            }
            DecodeMode::Sampling => {
                let u: f32 = self.rng.gen();
                let mut cumulative = 0.0;
                for (i, (&lp, &ok)) in log_probs.iter().zip(legal).enumerate() {
                    if !ok {
                        continue;
                    }
                    let p = lp.exp();
                    cumulative += p;
                    if p > 0.0 && cumulative > u {
                        return Some(i);
                    }
                }
                // rounding left the cumulative sum just below u
                Some(last_legal)
            }
        }
    }
}

/// Outcome of one decision for one trajectory.
#[derive(Debug, Clone, PartialEq)]
pub struct Selection {
    /// Committed action
    pub action: Action,
    /// Log-probability of the chosen index
    pub log_prob: f32,
    /// Full masked log-probability row over nodes
    pub log_probs: Vec<f32>,
}

/// Node embeddings bound to a policy, with the key projections cached.
///
/// Keys depend only on the embeddings, which are fixed for the episode,
/// so they are computed once in [`DecodingPolicy::attach`].
#[derive(Debug, Clone)]
pub struct EncodedNodes {
    embeddings: Tensor,
    load_keys: Tensor,
    parent_keys: Tensor,
}

impl EncodedNodes {
    /// Per-node embeddings, `[B, N, d]`.
    #[must_use]
    pub fn embeddings(&self) -> &Tensor {
        &self.embeddings
    }

    /// Number of rows.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.embeddings.shape()[0]
    }

    /// Number of nodes per row.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.embeddings.shape()[1]
    }

    /// Replicate for multi-start decoding (start-major rows).
    #[must_use]
    pub fn batchify(&self, num_starts: usize) -> Self {
        Self {
            embeddings: self.embeddings.batchify(num_starts),
            load_keys: self.load_keys.batchify(num_starts),
            parent_keys: self.parent_keys.batchify(num_starts),
        }
    }

    /// Embedding of node `node` in row `row`.
    #[must_use]
    pub fn node(&self, row: usize, node: usize) -> &[f32] {
        let d = self.embeddings.last_dim();
        let n = self.num_nodes();
        let start = (row * n + node) * d;
        &self.embeddings.data()[start..start + d]
    }
}

/// Inputs shared by both decision kinds at one decoding step.
#[derive(Debug, Clone, Copy)]
pub struct StepInputs<'a> {
    /// Step index, for error reporting
    pub step: usize,
    /// Trajectories to decide for; every other row is left untouched
    pub rows: &'a [usize],
    /// Environment mask for the whole batch
    pub mask: &'a ActionMask,
}

/// Query/key projections of the two decoding phases.
#[derive(Debug)]
pub struct DecodingPolicy {
    load_wq: Linear,
    load_wk: Linear,
    parent_wq: Linear,
    parent_wk: Linear,
    embedding_dim: usize,
}

impl DecodingPolicy {
    /// Create the policy for `embedding_dim`-wide embeddings.
    #[must_use]
    pub fn new(embedding_dim: usize, seeds: &mut SeedStream) -> Self {
        let d = embedding_dim;
        Self {
            load_wq: Linear::without_bias_with_seed(d, d, seeds.next_seed()),
            load_wk: Linear::without_bias_with_seed(d, d, seeds.next_seed()),
            parent_wq: Linear::without_bias_with_seed(2 * d, d, seeds.next_seed()),
            parent_wk: Linear::without_bias_with_seed(d, d, seeds.next_seed()),
            embedding_dim,
        }
    }

    /// Embedding width.
    #[must_use]
    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    /// Bind `[B, N, d]` embeddings and precompute their keys.
    #[must_use]
    pub fn attach(&self, embeddings: Tensor) -> EncodedNodes {
        let load_keys = self.load_wk.forward(&embeddings);
        let parent_keys = self.parent_wk.forward(&embeddings);
        EncodedNodes {
            embeddings,
            load_keys,
            parent_keys,
        }
    }

    /// Phase 0: choose the next load for every row in `inputs.rows`.
    ///
    /// The query is built from the mean embedding of the nodes already in
    /// each trajectory's tree (`main_tree_mask`, flattened `[B, N]`).
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::EmptyMask`] if a row has no legal load.
    pub fn select_load(
        &self,
        nodes: &EncodedNodes,
        inputs: StepInputs<'_>,
        main_tree_mask: &[bool],
        selector: &mut ActionSelector,
    ) -> Result<Vec<Selection>> {
        let tree_context = nodes
            .embeddings
            .masked_mean_dim1(main_tree_mask, TREE_MEAN_EPS);
        let queries = self.load_wq.forward(&tree_context);

        inputs
            .rows
            .iter()
            .map(|&row| -> Result<Selection> {
                let legal = inputs.mask.load_row(row);
                let log_probs = self.masked_log_probs(&nodes.load_keys, row, queries.row(row), &legal);
                let node = selector.select(&log_probs, &legal).ok_or(PocatError::EmptyMask {
                    step: inputs.step,
                    trajectory: row,
                })?;
                Ok(Selection {
                    action: Action::select_load(node),
                    log_prob: log_probs[node],
                    log_probs,
                })
            })
            .collect()
    }

    /// Phase 1: choose a parent for each row's trajectory head.
    ///
    /// `context` is the running `[B, d]` context; `heads` has one entry per row.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::EmptyMask`] if a head has no legal parent.
    pub fn select_parent(
        &self,
        nodes: &EncodedNodes,
        inputs: StepInputs<'_>,
        context: &Tensor,
        heads: &[usize],
        selector: &mut ActionSelector,
    ) -> Result<Vec<Selection>> {
        let head_embeddings = nodes.embeddings.gather_nodes(heads);
        let queries = self
            .parent_wq
            .forward(&Tensor::concat_last(&[context, &head_embeddings]));

        inputs
            .rows
            .iter()
            .map(|&row| -> Result<Selection> {
                let head = heads[row];
                let legal = inputs.mask.parent_row(row, head);
                let log_probs =
                    self.masked_log_probs(&nodes.parent_keys, row, queries.row(row), legal);
                let parent = selector.select(&log_probs, legal).ok_or(PocatError::EmptyMask {
                    step: inputs.step,
                    trajectory: row,
                })?;
                Ok(Selection {
                    action: Action::connect(head, parent),
                    log_prob: log_probs[parent],
                    log_probs,
                })
            })
            .collect()
    }

    fn masked_log_probs(&self, keys: &Tensor, row: usize, query: &[f32], legal: &[bool]) -> Vec<f32> {
        let d = self.embedding_dim;
        let scale = 1.0 / (d as f32).sqrt();
        let scores: Vec<f32> = keys
            .row(row)
            .chunks_exact(d)
            .zip(legal)
            .map(|(key, &ok)| {
                if ok {
                    key.iter().zip(query).map(|(k, q)| k * q).sum::<f32>() * scale
                } else {
                    MASK_SENTINEL
                }
            })
            .collect();
        F::log_softmax_1d(&scores)
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.load_wq.parameters();
        p.extend(self.load_wk.parameters());
        p.extend(self.parent_wq.parameters());
        p.extend(self.parent_wk.parameters());
        p
    }
}
