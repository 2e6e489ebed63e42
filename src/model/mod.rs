//! The POCAT policy: prompt net, node encoder, two-phase decoder and
//! rollout driver.
//!
//! The environment that validates actions and scores finished trees is
//! supplied by the caller through [`PocatEnv`].

mod config;
mod context;
mod decoder;
mod encoder;
mod env;
mod prompt;
mod rollout;

pub use config::{ModelConfig, PhaseConsistency, FEATURE_DIM};
pub use context::{Context, ContextSummarizer, ContextUpdate};
pub use decoder::{
    ActionSelector, DecodeMode, DecodingPolicy, EncodedNodes, Selection, StepInputs,
    MASK_SENTINEL, TREE_MEAN_EPS,
};
pub use encoder::{Encoder, EncoderLayer};
pub use env::{Action, ActionMask, DecodingPhase, DecodingState, PocatEnv, StepOutput};
pub use prompt::PromptNet;
pub use rollout::{BestStart, PocatModel, RolloutOptions, RolloutOutput};
