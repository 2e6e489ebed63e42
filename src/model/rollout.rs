//! The POCAT model and its multi-start rollout driver.
//!
//! A rollout encodes the instances once, replicates everything for the
//! environment's start nodes, commits the forced start loads with
//! log-probability 0, then alternates load selection and parent selection
//! until the environment reports every trajectory done.

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::config::{ModelConfig, PhaseConsistency};
use super::context::{Context, ContextSummarizer};
use super::decoder::{ActionSelector, DecodingPolicy, EncodedNodes, StepInputs};
use super::encoder::Encoder;
use super::env::{Action, ActionMask, DecodingPhase, DecodingState, PocatEnv};
use super::prompt::PromptNet;
use crate::error::{PocatError, Result};
use crate::nn::{Module, SeedStream};
use crate::tensor::Tensor;

/// Per-call rollout settings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutOptions {
    /// Abort after this many decoding steps (start step excluded).
    /// `None` loops until the environment finishes.
    pub max_steps: Option<usize>,
}

impl RolloutOptions {
    /// Set a step budget.
    #[must_use]
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = Some(max_steps);
        self
    }
}

/// Result of one rollout. Every field is indexed by replicated trajectory
/// (`start * batch + instance`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutOutput {
    /// Terminal reward per trajectory
    pub reward: Vec<f32>,
    /// Sum of `log_probs` per trajectory
    pub log_likelihood: Vec<f32>,
    /// Committed actions per trajectory, start action first
    pub actions: Vec<Vec<Action>>,
    /// Selection log-probability of every committed action
    pub log_probs: Vec<Vec<f32>>,
    /// Starts explored per instance
    pub num_starts: usize,
    /// Environment transitions taken, start step included
    pub num_steps: usize,
}

/// Best start of one instance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BestStart {
    /// Start index
    pub start: usize,
    /// Row in the replicated batch
    pub row: usize,
    /// Its reward
    pub reward: f32,
}

impl RolloutOutput {
    /// Number of trajectories (instances times starts).
    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.reward.len()
    }

    /// Number of original instances.
    #[must_use]
    pub fn num_instances(&self) -> usize {
        self.batch_size() / self.num_starts.max(1)
    }

    /// Highest-reward start of every instance; ties keep the lower start.
    #[must_use]
    pub fn best_per_instance(&self) -> Vec<BestStart> {
        let instances = self.num_instances();
        (0..instances)
            .map(|b| {
                let mut best = BestStart {
                    start: 0,
                    row: b,
                    reward: self.reward[b],
                };
                for s in 1..self.num_starts {
                    let row = s * instances + b;
                    if self.reward[row] > best.reward {
                        best = BestStart {
                            start: s,
                            row,
                            reward: self.reward[row],
                        };
                    }
                }
                best
            })
            .collect()
    }
}

/// Prompt-conditioned encoder, two-phase decoding policy and context summarizer.
///
/// The model is immutable while decoding; all per-episode data lives in the
/// rollout, so one model can serve any number of environments.
///
/// # Example
///
/// ```
/// use pocat::model::{ModelConfig, PocatModel};
///
/// let config = ModelConfig::default()
///     .with_embedding_dim(16)
///     .with_heads(2, 8)
///     .with_encoder_layers(1)
///     .with_seed(3);
/// let model = PocatModel::new(config).unwrap();
/// assert!(model.num_parameters() > 0);
/// ```
#[derive(Debug)]
pub struct PocatModel {
    config: ModelConfig,
    prompt_net: PromptNet,
    encoder: Encoder,
    policy: DecodingPolicy,
    summarizer: ContextSummarizer,
}

impl PocatModel {
    /// Build a model from `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::InvalidConfig`] if `config` fails validation.
    pub fn new(config: ModelConfig) -> Result<Self> {
        config.validate()?;
        let mut seeds = SeedStream::new(config.seed);
        let d = config.embedding_dim;

        let prompt_net = PromptNet::new(config.prompt_feature_dim, d, &mut seeds);
        let encoder = Encoder::new(&config, &mut seeds);
        let policy = DecodingPolicy::new(d, &mut seeds);
        let summarizer = ContextSummarizer::new(config.context_update, d, &mut seeds);

        Ok(Self {
            config,
            prompt_net,
            encoder,
            policy,
            summarizer,
        })
    }

    /// Configuration the model was built from.
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Total number of learned scalars.
    #[must_use]
    pub fn num_parameters(&self) -> usize {
        let mut params = self.prompt_net.parameters();
        params.extend(self.encoder.parameters());
        params.extend(self.policy.parameters());
        params.extend(self.summarizer.parameters());
        params.iter().map(|p| p.numel()).sum()
    }

    /// Selector using the configured decode mode.
    #[must_use]
    pub fn selector(&self, seed: Option<u64>) -> ActionSelector {
        ActionSelector::new(self.config.decode_mode, seed)
    }

    /// Encode the instances of `state` into `[B, N, d]` node embeddings.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::ShapeMismatch`] if the feature tensors do not
    /// match the configuration.
    pub fn encode<S: DecodingState>(&self, state: &S) -> Result<Tensor> {
        let (b, n) = (state.batch_size(), state.num_nodes());
        expect_shape(
            "node_features",
            state.node_features().shape(),
            &[b, n, self.config.node_feature_dim],
        )?;
        expect_shape(
            "prompt_features",
            state.prompt_features().shape(),
            &[b, self.config.prompt_feature_dim],
        )?;

        let prompt = self.prompt_net.forward(state.prompt_features());
        Ok(self.encoder.encode(state.node_features(), &prompt))
    }

    /// Run one episode with default options.
    ///
    /// # Errors
    ///
    /// See [`rollout_with`](Self::rollout_with).
    pub fn rollout<E: PocatEnv>(
        &self,
        env: &mut E,
        state: E::State,
        selector: &mut ActionSelector,
    ) -> Result<RolloutOutput> {
        self.rollout_with(env, state, selector, RolloutOptions::default())
    }

    /// Run one episode.
    ///
    /// # Errors
    ///
    /// - [`PocatError::ShapeMismatch`] when state, mask or reward sizes are off
    /// - [`PocatError::InvalidStartNodes`] for a bad start selection
    /// - [`PocatError::PhaseDivergence`] under lockstep decoding
    /// - [`PocatError::EmptyMask`] when an active trajectory has no legal action
    /// - [`PocatError::MissingReward`] when the final step carries no reward
    /// - [`PocatError::StepLimitExceeded`] when `options.max_steps` is hit
    /// - any error returned by the environment, unchanged
    pub fn rollout_with<E: PocatEnv>(
        &self,
        env: &mut E,
        state: E::State,
        selector: &mut ActionSelector,
        options: RolloutOptions,
    ) -> Result<RolloutOutput> {
        let embeddings = self.encode(&state)?;
        let (instances, n) = (state.batch_size(), state.num_nodes());

        let (num_starts, start_nodes) = env.select_start_nodes(&state)?;
        validate_starts(num_starts, &start_nodes, instances, n)?;
        debug!(
            instances,
            num_starts,
            num_nodes = n,
            mode = %selector.mode(),
            "starting rollout"
        );

        let nodes = self.policy.attach(embeddings).batchify(num_starts);
        let mut state = state.batchify(num_starts);
        let b = instances * num_starts;
        check_state(&state, b, n)?;

        let mut context = self.summarizer.initial(nodes.embeddings());
        let mut record = Trajectories::new(b);

        // Start loads were chosen outside the policy: probability one.
        let start_actions: Vec<Action> =
            start_nodes.iter().map(|&s| Action::select_load(s)).collect();
        let mut step = 0;
        let out = env.step(state, &start_actions)?;
        record.push(&start_actions, &vec![0.0; b]);
        if self.summarizer.includes_start_step() {
            self.fold(&nodes, &mut context, &start_actions);
        }
        state = out.next;
        let mut reward = out.reward;

        while !state.all_done() {
            step += 1;
            if let Some(limit) = options.max_steps {
                if step > limit {
                    return Err(PocatError::StepLimitExceeded { limit });
                }
            }
            check_state(&state, b, n)?;
            let mask = env.action_mask(&state)?;
            check_mask(&mask, b, n)?;

            let (load_rows, parent_rows) = self.partition_rows(&state, step)?;
            trace!(
                step,
                loads = load_rows.len(),
                parents = parent_rows.len(),
                "decoding step"
            );

            let mut actions = vec![Action::PAD; b];
            let mut log_probs = vec![0.0; b];
            if !load_rows.is_empty() {
                let inputs = StepInputs {
                    step,
                    rows: &load_rows,
                    mask: &mask,
                };
                let picks =
                    self.policy
                        .select_load(&nodes, inputs, state.main_tree_mask(), selector)?;
                for (&row, pick) in load_rows.iter().zip(picks) {
                    actions[row] = pick.action;
                    log_probs[row] = pick.log_prob;
                }
            }
            if !parent_rows.is_empty() {
                let inputs = StepInputs {
                    step,
                    rows: &parent_rows,
                    mask: &mask,
                };
                let picks = self.policy.select_parent(
                    &nodes,
                    inputs,
                    context.vector(),
                    state.trajectory_head(),
                    selector,
                )?;
                for (&row, pick) in parent_rows.iter().zip(picks) {
                    actions[row] = pick.action;
                    log_probs[row] = pick.log_prob;
                }
            }

            let out = env.step(state, &actions)?;
            record.push(&actions, &log_probs);
            self.fold(&nodes, &mut context, &actions);
            state = out.next;
            reward = out.reward;
        }

        let reward = reward.ok_or(PocatError::MissingReward { step })?;
        if reward.len() != b {
            return Err(PocatError::ShapeMismatch {
                expected: format!("{b} rewards"),
                actual: format!("{} rewards", reward.len()),
            });
        }
        debug!(steps = step + 1, trajectories = b, "rollout finished");

        Ok(record.finish(reward, num_starts, step + 1))
    }

    fn fold(&self, nodes: &EncodedNodes, context: &mut Context, actions: &[Action]) {
        let children: Vec<usize> = actions.iter().map(|a| a.child).collect();
        let parents: Vec<usize> = actions.iter().map(|a| a.parent).collect();
        let child = nodes.embeddings().gather_nodes(&children);
        let parent = nodes.embeddings().gather_nodes(&parents);
        self.summarizer.update(context, &child, &parent);
    }

    /// Split the active trajectories by phase, enforcing lockstep if configured.
    fn partition_rows<S: DecodingState>(
        &self,
        state: &S,
        step: usize,
    ) -> Result<(Vec<usize>, Vec<usize>)> {
        let mut load_rows = Vec::new();
        let mut parent_rows = Vec::new();
        for (row, (&done, &phase)) in state.done().iter().zip(state.decoding_phase()).enumerate() {
            if done {
                continue;
            }
            match phase {
                DecodingPhase::SelectLoad => load_rows.push(row),
                DecodingPhase::ExtendTrajectory => parent_rows.push(row),
            }
        }

        if self.config.phase_consistency == PhaseConsistency::Lockstep
            && !load_rows.is_empty()
            && !parent_rows.is_empty()
        {
            return Err(PocatError::PhaseDivergence {
                step,
                phases: vec![
                    DecodingPhase::SelectLoad.code(),
                    DecodingPhase::ExtendTrajectory.code(),
                ],
            });
        }
        Ok((load_rows, parent_rows))
    }
}

/// Per-trajectory action and log-probability logs.
struct Trajectories {
    actions: Vec<Vec<Action>>,
    log_probs: Vec<Vec<f32>>,
}

impl Trajectories {
    fn new(b: usize) -> Self {
        Self {
            actions: vec![Vec::new(); b],
            log_probs: vec![Vec::new(); b],
        }
    }

    fn push(&mut self, actions: &[Action], log_probs: &[f32]) {
        for (log, &a) in self.actions.iter_mut().zip(actions) {
            log.push(a);
        }
        for (log, &lp) in self.log_probs.iter_mut().zip(log_probs) {
            log.push(lp);
        }
    }

    fn finish(self, reward: Vec<f32>, num_starts: usize, num_steps: usize) -> RolloutOutput {
        let log_likelihood = self.log_probs.iter().map(|lps| lps.iter().sum::<f32>()).collect();
        RolloutOutput {
            reward,
            log_likelihood,
            actions: self.actions,
            log_probs: self.log_probs,
            num_starts,
            num_steps,
        }
    }
}

fn expect_shape(what: &str, actual: &[usize], expected: &[usize]) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(PocatError::ShapeMismatch {
            expected: format!("{what} {expected:?}"),
            actual: format!("{actual:?}"),
        })
    }
}

fn validate_starts(num_starts: usize, start_nodes: &[usize], instances: usize, n: usize) -> Result<()> {
    if num_starts == 0 {
        return Err(PocatError::InvalidStartNodes(
            "at least one start per instance is required".to_string(),
        ));
    }
    if start_nodes.len() != num_starts * instances {
        return Err(PocatError::InvalidStartNodes(format!(
            "expected {} start nodes ({num_starts} starts x {instances} instances), got {}",
            num_starts * instances,
            start_nodes.len()
        )));
    }
    if let Some(&bad) = start_nodes.iter().find(|&&s| s >= n) {
        return Err(PocatError::InvalidStartNodes(format!(
            "start node {bad} out of range for {n} nodes"
        )));
    }
    Ok(())
}

fn check_state<S: DecodingState>(state: &S, b: usize, n: usize) -> Result<()> {
    let lengths = [
        ("done", state.done().len(), b),
        ("decoding_phase", state.decoding_phase().len(), b),
        ("trajectory_head", state.trajectory_head().len(), b),
        ("main_tree_mask", state.main_tree_mask().len(), b * n),
    ];
    for (what, actual, expected) in lengths {
        if actual != expected {
            return Err(PocatError::ShapeMismatch {
                expected: format!("{what} of length {expected}"),
                actual: format!("length {actual}"),
            });
        }
    }
    if let Some(&head) = state.trajectory_head().iter().find(|&&h| h >= n) {
        return Err(PocatError::ShapeMismatch {
            expected: format!("trajectory_head < {n}"),
            actual: head.to_string(),
        });
    }
    Ok(())
}

fn check_mask(mask: &ActionMask, b: usize, n: usize) -> Result<()> {
    if mask.batch_size() == b && mask.num_nodes() == n {
        Ok(())
    } else {
        Err(PocatError::ShapeMismatch {
            expected: format!("action mask [{b}, {n}, {n}]"),
            actual: format!(
                "[{}, {}, {}]",
                mask.batch_size(),
                mask.num_nodes(),
                mask.num_nodes()
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output(reward: Vec<f32>, num_starts: usize) -> RolloutOutput {
        let b = reward.len();
        RolloutOutput {
            reward,
            log_likelihood: vec![0.0; b],
            actions: vec![Vec::new(); b],
            log_probs: vec![Vec::new(); b],
            num_starts,
            num_steps: 0,
        }
    }

    #[test]
    fn test_best_per_instance() {
        // 2 instances x 3 starts, start-major rows
        let out = output(vec![1.0, 5.0, 3.0, 2.0, 4.0, 5.0], 3);
        assert_eq!(out.num_instances(), 2);
        let best = out.best_per_instance();
        assert_eq!(best[0].start, 2);
        assert_eq!(best[0].row, 4);
        assert_eq!(best[1].start, 0);
        assert!((best[1].reward - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_validate_starts() {
        assert!(validate_starts(2, &[1, 2, 3, 1], 2, 4).is_ok());
        assert!(validate_starts(0, &[], 2, 4).is_err());
        assert!(validate_starts(2, &[1, 2, 3], 2, 4).is_err());
        assert!(validate_starts(1, &[1, 4], 2, 4).is_err());
    }

    #[test]
    fn test_model_rejects_invalid_config() {
        let err = PocatModel::new(ModelConfig::default().with_embedding_dim(0)).unwrap_err();
        assert!(matches!(err, PocatError::InvalidConfig { .. }));
    }

    #[test]
    fn test_same_seed_same_parameter_count() {
        let config = ModelConfig::default()
            .with_embedding_dim(16)
            .with_heads(2, 8)
            .with_encoder_layers(1)
            .with_seed(1);
        let a = PocatModel::new(config.clone()).unwrap();
        let b = PocatModel::new(config).unwrap();
        assert_eq!(a.num_parameters(), b.num_parameters());
    }

    #[test]
    fn test_options_builder() {
        assert_eq!(RolloutOptions::default().max_steps, None);
        assert_eq!(RolloutOptions::default().with_max_steps(5).max_steps, Some(5));
    }
}
