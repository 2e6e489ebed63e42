//! Convenience re-exports for common usage.
//!
//! # Usage
//!
//! ```
//! use pocat::prelude::*;
//! ```

pub use crate::error::{PocatError, Result};
pub use crate::model::{
    Action, ActionMask, ActionSelector, ContextUpdate, DecodeMode, DecodingPhase, DecodingState,
    ModelConfig, PhaseConsistency, PocatEnv, PocatModel, RolloutOptions, RolloutOutput,
    StepOutput,
};
pub use crate::nn::{FeedForwardKind, Module, NormKind};
pub use crate::tensor::Tensor;
