//! Neural network building blocks.
//!
//! Feed-forward layers implement the [`Module`] trait:
//!
//! - **Layers**: [`Linear`], [`MultiHeadAttention`]
//! - **Feed-forward**: [`ParallelGatedMLP`], [`FeedForward`]
//! - **Normalization**: [`LayerNorm`], [`RMSNorm`], [`InstanceNorm`]
//!
//! [`GRUCell`] is recurrent and exposes `step(x, h)` instead.
//!
//! Layers only run forward passes. Parameters are initialized with
//! Xavier-uniform weights and zero biases, seeded per layer from a
//! [`SeedStream`].

mod attention;
mod feedforward;
pub mod functional;
pub mod init;
mod linear;
mod module;
mod normalization;
mod rnn;

pub use attention::MultiHeadAttention;
pub use feedforward::{
    gated_inner_size, FeedForward, FeedForwardBlock, FeedForwardKind, ParallelGatedMLP,
};
pub use functional as F;
pub use init::SeedStream;
pub use linear::Linear;
pub use module::Module;
pub use normalization::{InstanceNorm, LayerNorm, NormKind, Normalization, RMSNorm};
pub use rnn::GRUCell;
