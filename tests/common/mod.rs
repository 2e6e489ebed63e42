//! Toy tree-building environment shared by the integration tests.
//!
//! Node 0 is the root and starts in the tree. Phase 0 picks a node outside
//! the tree, phase 1 attaches it to any node already in the tree. Every
//! load therefore takes exactly two steps, which keeps all trajectories in
//! lockstep unless `stall_row` deliberately skips one start action.
//! The reward is the negative total edge length.

#![allow(dead_code)]

use pocat::model::{
    Action, ActionMask, DecodingPhase, DecodingState, ModelConfig, PocatEnv, StepOutput,
    FEATURE_DIM,
};
use pocat::tensor::{batchify_slice, Tensor};
use pocat::{PocatError, Result};

pub const PROMPT_FEATURES: usize = 2;

/// Small model that keeps the tests fast.
pub fn small_config() -> ModelConfig {
    ModelConfig::default()
        .with_embedding_dim(16)
        .with_heads(2, 8)
        .with_encoder_layers(2)
        .with_seed(2024)
}

#[derive(Debug, Clone)]
pub struct TreeState {
    batch: usize,
    nodes: usize,
    node_features: Tensor,
    prompt_features: Tensor,
    done: Vec<bool>,
    phase: Vec<DecodingPhase>,
    head: Vec<usize>,
    in_tree: Vec<bool>,
    parent: Vec<Option<usize>>,
}

impl TreeState {
    pub fn new(batch: usize, nodes: usize) -> Self {
        let features: Vec<f32> = (0..batch * nodes * FEATURE_DIM)
            .map(|i| ((i * 7 + 3) as f32 * 0.61).sin())
            .collect();
        let prompt: Vec<f32> = (0..batch * PROMPT_FEATURES)
            .map(|i| 0.5 + i as f32 * 0.1)
            .collect();
        let mut in_tree = vec![false; batch * nodes];
        for b in 0..batch {
            in_tree[b * nodes] = true;
        }
        Self {
            batch,
            nodes,
            node_features: Tensor::from_vec(features, &[batch, nodes, FEATURE_DIM]),
            prompt_features: Tensor::from_vec(prompt, &[batch, PROMPT_FEATURES]),
            done: vec![false; batch],
            phase: vec![DecodingPhase::SelectLoad; batch],
            head: vec![0; batch],
            in_tree,
            parent: vec![None; batch * nodes],
        }
    }

    fn position(&self, row: usize, node: usize) -> (f32, f32) {
        let start = (row * self.nodes + node) * FEATURE_DIM;
        let f = self.node_features.data();
        (f[start], f[start + 1])
    }

    fn edge_length(&self, row: usize, a: usize, b: usize) -> f32 {
        let (ax, ay) = self.position(row, a);
        let (bx, by) = self.position(row, b);
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    fn reward(&self, row: usize) -> f32 {
        -(1..self.nodes)
            .filter_map(|c| self.parent[row * self.nodes + c].map(|p| self.edge_length(row, c, p)))
            .sum::<f32>()
    }
}

impl DecodingState for TreeState {
    fn batch_size(&self) -> usize {
        self.batch
    }

    fn num_nodes(&self) -> usize {
        self.nodes
    }

    fn node_features(&self) -> &Tensor {
        &self.node_features
    }

    fn prompt_features(&self) -> &Tensor {
        &self.prompt_features
    }

    fn done(&self) -> &[bool] {
        &self.done
    }

    fn decoding_phase(&self) -> &[DecodingPhase] {
        &self.phase
    }

    fn trajectory_head(&self) -> &[usize] {
        &self.head
    }

    fn main_tree_mask(&self) -> &[bool] {
        &self.in_tree
    }

    fn batchify(&self, num_starts: usize) -> Self {
        Self {
            batch: self.batch * num_starts,
            nodes: self.nodes,
            node_features: self.node_features.batchify(num_starts),
            prompt_features: self.prompt_features.batchify(num_starts),
            done: batchify_slice(&self.done, num_starts),
            phase: batchify_slice(&self.phase, num_starts),
            head: batchify_slice(&self.head, num_starts),
            in_tree: batchify_slice(&self.in_tree, num_starts),
            parent: batchify_slice(&self.parent, num_starts),
        }
    }
}

#[derive(Debug, Default)]
pub struct ToyTreeEnv {
    pub num_starts: usize,
    /// Row whose start action is ignored, so it lags one step behind
    pub stall_row: Option<usize>,
    /// Row that never has a legal action
    pub empty_mask_row: Option<usize>,
    pub fail_at_step: Option<usize>,
    pub withhold_reward: bool,
    /// Every action batch received, in order
    pub history: Vec<Vec<Action>>,
}

impl ToyTreeEnv {
    pub fn new(num_starts: usize) -> Self {
        Self {
            num_starts,
            ..Self::default()
        }
    }

    fn illegal(&self, row: usize, action: Action) -> PocatError {
        PocatError::Environment(format!(
            "illegal action {action} for row {row} at step {}",
            self.history.len()
        ))
    }
}

impl PocatEnv for ToyTreeEnv {
    type State = TreeState;

    fn select_start_nodes(&self, state: &TreeState) -> Result<(usize, Vec<usize>)> {
        let loads = state.nodes - 1;
        let starts = (0..self.num_starts)
            .flat_map(|s| (0..state.batch).map(move |_| 1 + s % loads))
            .collect();
        Ok((self.num_starts, starts))
    }

    fn step(&mut self, mut state: TreeState, actions: &[Action]) -> Result<StepOutput<TreeState>> {
        self.history.push(actions.to_vec());
        let step = self.history.len();
        if self.fail_at_step == Some(step) {
            return Err(PocatError::Environment(format!(
                "simulator crashed at step {step}"
            )));
        }
        if actions.len() != state.batch {
            return Err(PocatError::Environment(format!(
                "expected {} actions, got {}",
                state.batch,
                actions.len()
            )));
        }

        let n = state.nodes;
        for (row, &action) in actions.iter().enumerate() {
            if state.done[row] || (step == 1 && self.stall_row == Some(row)) {
                continue;
            }
            match state.phase[row] {
                DecodingPhase::SelectLoad => {
                    if action.child == 0
                        || action.child >= n
                        || action.parent != 0
                        || state.in_tree[row * n + action.child]
                    {
                        return Err(self.illegal(row, action));
                    }
                    state.head[row] = action.child;
                    state.phase[row] = DecodingPhase::ExtendTrajectory;
                }
                DecodingPhase::ExtendTrajectory => {
                    if action.child != state.head[row]
                        || action.parent >= n
                        || !state.in_tree[row * n + action.parent]
                    {
                        return Err(self.illegal(row, action));
                    }
                    state.in_tree[row * n + action.child] = true;
                    state.parent[row * n + action.child] = Some(action.parent);
                    state.phase[row] = DecodingPhase::SelectLoad;
                    state.done[row] = state.in_tree[row * n..(row + 1) * n].iter().all(|&t| t);
                }
            }
        }

        let reward = (state.all_done() && !self.withhold_reward)
            .then(|| (0..state.batch).map(|row| state.reward(row)).collect());
        Ok(StepOutput {
            next: state,
            reward,
        })
    }

    fn action_mask(&self, state: &TreeState) -> Result<ActionMask> {
        let n = state.nodes;
        Ok(ActionMask::from_fn(state.batch, n, |row, c, p| {
            if state.done[row] || self.empty_mask_row == Some(row) {
                return false;
            }
            match state.phase[row] {
                DecodingPhase::SelectLoad => p == 0 && !state.in_tree[row * n + c],
                DecodingPhase::ExtendTrajectory => {
                    c == state.head[row] && state.in_tree[row * n + p]
                }
            }
        }))
    }
}

/// Check an action against the mask the toy environment would have produced.
pub fn replay_is_legal(batch: usize, nodes: usize, history: &[Vec<Action>]) -> bool {
    let mut state = TreeState::new(batch, nodes);
    let mut env = ToyTreeEnv::new(1);
    for actions in history {
        match env.step(state, actions) {
            Ok(out) => state = out.next,
            Err(_) => return false,
        }
    }
    state.all_done()
}
