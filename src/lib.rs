//! POCAT: a prompt-conditioned attention policy that builds distribution
//! trees one edge at a time.
//!
//! The policy encodes every node of a problem instance once, then decodes
//! autoregressively in two alternating phases: pick the next load to attach,
//! then pick parents for it until the environment closes the trajectory.
//! Several forced start loads per instance are explored in one batch
//! (POMO-style multi-start decoding).
//!
//! # Quick Start
//!
//! ```
//! use pocat::prelude::*;
//!
//! let config = ModelConfig::default()
//!     .with_embedding_dim(32)
//!     .with_heads(4, 8)
//!     .with_encoder_layers(2)
//!     .with_decode_mode(DecodeMode::Sampling)
//!     .with_seed(42);
//! let model = PocatModel::new(config).unwrap();
//!
//! // One selector per rollout; the seed makes sampling reproducible.
//! let selector = model.selector(Some(7));
//! assert_eq!(selector.mode(), DecodeMode::Sampling);
//! ```
//!
//! Driving a rollout requires an environment implementing
//! [`model::PocatEnv`]; see `tests/common/mod.rs` for a small one.
//!
//! # Modules
//!
//! - [`tensor`]: Dense inference-only `f32` tensor
//! - [`nn`]: Layers (linear, attention, GRU, feed-forward, normalization)
//! - [`model`]: Prompt net, encoder, decoding policy and rollout driver
//! - [`error`]: Error type shared by every fallible operation

pub mod error;
pub mod model;
pub mod nn;
pub mod prelude;
pub mod tensor;

pub use error::{PocatError, Result};
pub use tensor::Tensor;
