//! Contract between the policy and the tree-building environment.
//!
//! The environment owns the decoding state: it validates actions, advances
//! the partially built tree, derives action masks and computes rewards.
//! The policy only reads the state through [`DecodingState`] and hands
//! actions back through [`PocatEnv::step`].

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{PocatError, Result};
use crate::tensor::Tensor;

/// Which decision a trajectory faces at the current step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DecodingPhase {
    /// Pick the next load to attach (phase 0).
    #[default]
    SelectLoad,
    /// Pick a parent for the current trajectory head (phase 1).
    ExtendTrajectory,
}

impl DecodingPhase {
    /// Numeric phase code (0 or 1).
    #[must_use]
    pub fn code(self) -> u8 {
        match self {
            Self::SelectLoad => 0,
            Self::ExtendTrajectory => 1,
        }
    }
}

impl TryFrom<u8> for DecodingPhase {
    type Error = PocatError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::SelectLoad),
            1 => Ok(Self::ExtendTrajectory),
            other => Err(PocatError::UnknownVariant {
                kind: "decoding_phase",
                value: other.to_string(),
            }),
        }
    }
}

/// A committed decision: attach `child` under `parent`.
///
/// Load selections carry `parent == 0` as a placeholder; the real edge is
/// chosen by later [`DecodingPhase::ExtendTrajectory`] steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Action {
    /// Node being attached
    pub child: usize,
    /// Node supplying it
    pub parent: usize,
}

impl Action {
    /// Action sent for trajectories that are already done.
    pub const PAD: Action = Action {
        child: 0,
        parent: 0,
    };

    /// A load selection with the placeholder parent.
    #[must_use]
    pub fn select_load(load: usize) -> Self {
        Self {
            child: load,
            parent: 0,
        }
    }

    /// A (child, parent) connection.
    #[must_use]
    pub fn connect(child: usize, parent: usize) -> Self {
        Self { child, parent }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.child, self.parent)
    }
}

/// Boolean legality tensor of shape `[batch, nodes, nodes]`.
///
/// Entry `(b, child, parent)` is true when attaching `child` under
/// `parent` is legal for trajectory `b`. The load-selection slice is the
/// `parent == 0` column.
#[derive(Clone, PartialEq, Eq)]
pub struct ActionMask {
    data: Vec<bool>,
    batch_size: usize,
    num_nodes: usize,
}

impl ActionMask {
    /// Wrap a flattened `[batch, nodes, nodes]` buffer.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::ShapeMismatch`] if the buffer length is wrong.
    pub fn new(data: Vec<bool>, batch_size: usize, num_nodes: usize) -> Result<Self> {
        let expected = batch_size * num_nodes * num_nodes;
        if data.len() != expected {
            return Err(PocatError::ShapeMismatch {
                expected: format!("[{batch_size}, {num_nodes}, {num_nodes}] ({expected} entries)"),
                actual: format!("{} entries", data.len()),
            });
        }
        Ok(Self {
            data,
            batch_size,
            num_nodes,
        })
    }

    /// Build a mask from a predicate over `(trajectory, child, parent)`.
    #[must_use]
    pub fn from_fn(
        batch_size: usize,
        num_nodes: usize,
        f: impl Fn(usize, usize, usize) -> bool,
    ) -> Self {
        let mut data = Vec::with_capacity(batch_size * num_nodes * num_nodes);
        for b in 0..batch_size {
            for c in 0..num_nodes {
                for p in 0..num_nodes {
                    data.push(f(b, c, p));
                }
            }
        }
        Self {
            data,
            batch_size,
            num_nodes,
        }
    }

    /// Number of trajectories.
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Number of nodes.
    #[must_use]
    pub fn num_nodes(&self) -> usize {
        self.num_nodes
    }

    /// Legality of a single `(child, parent)` pair.
    #[must_use]
    pub fn get(&self, b: usize, child: usize, parent: usize) -> bool {
        let n = self.num_nodes;
        self.data[(b * n + child) * n + parent]
    }

    /// Which nodes may be selected as the next load (`mask[b, :, 0]`).
    #[must_use]
    pub fn load_row(&self, b: usize) -> Vec<bool> {
        (0..self.num_nodes).map(|c| self.get(b, c, 0)).collect()
    }

    /// Which nodes may become the parent of `head` (`mask[b, head, :]`).
    #[must_use]
    pub fn parent_row(&self, b: usize, head: usize) -> &[bool] {
        let n = self.num_nodes;
        let start = (b * n + head) * n;
        &self.data[start..start + n]
    }
}

impl fmt::Debug for ActionMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionMask")
            .field("batch_size", &self.batch_size)
            .field("num_nodes", &self.num_nodes)
            .field("legal", &self.data.iter().filter(|&&m| m).count())
            .finish()
    }
}

/// Read access to the environment's per-trajectory decoding state.
///
/// Every per-trajectory slice has length [`batch_size`](Self::batch_size);
/// `main_tree_mask` is flattened `[batch, nodes]`.
pub trait DecodingState: Sized {
    /// Number of trajectories.
    fn batch_size(&self) -> usize;

    /// Number of nodes per instance.
    fn num_nodes(&self) -> usize;

    /// Raw node features, `[batch, nodes, node_feature_dim]`.
    fn node_features(&self) -> &Tensor;

    /// Global problem parameters, `[batch, prompt_feature_dim]`.
    fn prompt_features(&self) -> &Tensor;

    /// Per-trajectory completion flags.
    fn done(&self) -> &[bool];

    /// Per-trajectory decoding phase.
    fn decoding_phase(&self) -> &[DecodingPhase];

    /// Current frontier node of each trajectory (meaningful in phase 1).
    fn trajectory_head(&self) -> &[usize];

    /// Membership of each node in the tree built so far, `[batch, nodes]`.
    fn main_tree_mask(&self) -> &[bool];

    /// Replicate every per-trajectory field `num_starts` times.
    ///
    /// Row `s * batch + b` of the result must hold instance `b`, matching
    /// [`Tensor::batchify`].
    #[must_use]
    fn batchify(&self, num_starts: usize) -> Self;

    /// True once every trajectory has finished.
    fn all_done(&self) -> bool {
        self.done().iter().all(|&d| d)
    }
}

/// Result of one environment transition.
#[derive(Debug, Clone)]
pub struct StepOutput<S> {
    /// State after applying the actions
    pub next: S,
    /// Per-trajectory reward; required once every trajectory is done
    pub reward: Option<Vec<f32>>,
}

/// The tree-building environment the policy drives.
///
/// Implementations must ignore the action of any trajectory whose `done`
/// flag is already set; the policy sends [`Action::PAD`] for those rows.
pub trait PocatEnv {
    /// Decoding state type owned by this environment.
    type State: DecodingState;

    /// Choose forced first loads for multi-start decoding.
    ///
    /// Returns `(num_starts, start_nodes)` where `start_nodes` has
    /// `num_starts * batch` entries in the replicated row order.
    ///
    /// # Errors
    ///
    /// Environment-specific failures.
    fn select_start_nodes(&self, state: &Self::State) -> Result<(usize, Vec<usize>)>;

    /// Apply one action per trajectory and return the next state.
    ///
    /// # Errors
    ///
    /// Environment-specific failures; the rollout propagates them unchanged.
    fn step(&mut self, state: Self::State, actions: &[Action]) -> Result<StepOutput<Self::State>>;

    /// Legal `(child, parent)` pairs for the current phase and head.
    ///
    /// # Errors
    ///
    /// Environment-specific failures.
    fn action_mask(&self, state: &Self::State) -> Result<ActionMask>;
}
