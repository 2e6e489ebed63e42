//! Error types for policy construction and rollouts.
//!
//! Three families of failure exist:
//!
//! - configuration errors, raised when a model is built from a bad
//!   [`ModelConfig`](crate::model::ModelConfig);
//! - environment-contract violations (empty masks, divergent phases,
//!   missing terminal reward), which abort the episode;
//! - failures reported by the environment itself, propagated unchanged.
//!
//! Numeric degeneracy (empty tree masks) is guarded with an epsilon and
//! never surfaces here.

use thiserror::Error;

/// Main error type for `pocat` operations.
///
/// # Examples
///
/// ```
/// use pocat::error::PocatError;
///
/// let err = PocatError::UnknownVariant {
///     kind: "norm_type",
///     value: "batch".to_string(),
/// };
/// assert!(err.to_string().contains("norm_type"));
/// ```
#[derive(Debug, Error)]
pub enum PocatError {
    /// A configuration value violates its constraint.
    #[error("Invalid configuration: {param} = {value}, expected {constraint}")]
    InvalidConfig {
        /// Parameter name
        param: &'static str,
        /// Provided value
        value: String,
        /// Constraint description
        constraint: &'static str,
    },

    /// A string-typed configuration enum holds an unrecognized variant.
    #[error("Unknown {kind} variant: {value:?}")]
    UnknownVariant {
        /// Which setting was being parsed
        kind: &'static str,
        /// The rejected value
        value: String,
    },

    /// Tensor or state dimensions disagree.
    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch {
        /// Expected shape description
        expected: String,
        /// Actual shape description
        actual: String,
    },

    /// Active trajectories disagree on the decoding phase while the model
    /// requires lockstep decoding.
    #[error("Decoding phase diverged across the batch at step {step}: {phases:?}")]
    PhaseDivergence {
        /// Decoding step (0 is the start-node pseudo-step)
        step: usize,
        /// Distinct phases observed among active trajectories
        phases: Vec<u8>,
    },

    /// A trajectory has no legal action at the current step.
    #[error("No legal action for trajectory {trajectory} at step {step}")]
    EmptyMask {
        /// Decoding step
        step: usize,
        /// Trajectory index within the (replicated) batch
        trajectory: usize,
    },

    /// The environment reported completion without a reward.
    #[error("Environment finished at step {step} without a terminal reward")]
    MissingReward {
        /// Step at which the last transition happened
        step: usize,
    },

    /// The start-node selection is inconsistent with the batch.
    #[error("Invalid start nodes: {0}")]
    InvalidStartNodes(String),

    /// The optional step budget of a rollout was exhausted.
    #[error("Rollout exceeded {limit} decoding steps")]
    StepLimitExceeded {
        /// Configured limit
        limit: usize,
    },

    /// Failure reported by the environment.
    #[error("Environment error: {0}")]
    Environment(String),

    /// Configuration (de)serialization failure.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for `pocat` operations.
pub type Result<T> = std::result::Result<T, PocatError>;
