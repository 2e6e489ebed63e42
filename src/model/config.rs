//! Model hyperparameters.
//!
//! A [`ModelConfig`] fully determines the architecture, the default
//! decoding behavior and (through `seed`) the initial weights.
//!
//! # Example
//!
//! ```
//! use pocat::model::{DecodeMode, ModelConfig};
//! use pocat::nn::NormKind;
//!
//! let config = ModelConfig::default()
//!     .with_embedding_dim(32)
//!     .with_norm_type(NormKind::Layer)
//!     .with_decode_mode(DecodeMode::Sampling)
//!     .with_seed(7);
//! assert!(config.validate().is_ok());
//!
//! let json = config.to_json().unwrap();
//! let back = ModelConfig::from_json(&json).unwrap();
//! assert_eq!(back, config);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::context::ContextUpdate;
use super::decoder::DecodeMode;
use crate::error::{PocatError, Result};
use crate::nn::{FeedForwardKind, NormKind};

/// Number of raw features per node produced by the environment.
pub const FEATURE_DIM: usize = 8;

/// How the rollout treats per-trajectory decoding phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseConsistency {
    /// All active trajectories must share one phase at every step;
    /// divergence aborts the rollout.
    #[default]
    Lockstep,
    /// Each trajectory follows its own phase.
    Independent,
}

impl FromStr for PhaseConsistency {
    type Err = PocatError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "lockstep" => Ok(Self::Lockstep),
            "independent" => Ok(Self::Independent),
            other => Err(PocatError::UnknownVariant {
                kind: "phase_consistency",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for PhaseConsistency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Lockstep => "lockstep",
            Self::Independent => "independent",
        })
    }
}

/// Architecture and decoding configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of node, prompt and context embeddings
    pub embedding_dim: usize,
    /// Attention heads per encoder block
    pub head_num: usize,
    /// Per-head query/key/value width
    pub qkv_dim: usize,
    /// Number of encoder blocks
    pub encoder_layer_num: usize,
    /// Raw features per node
    pub node_feature_dim: usize,
    /// Global prompt features per instance
    pub prompt_feature_dim: usize,
    /// Normalization used inside encoder blocks
    pub norm_type: NormKind,
    /// Feed-forward sublayer used inside encoder blocks
    pub ffd: FeedForwardKind,
    /// Hidden width of the plain feed-forward sublayer
    pub ff_hidden_dim: usize,
    /// Default action selection rule
    pub decode_mode: DecodeMode,
    /// Phase handling across the batch
    pub phase_consistency: PhaseConsistency,
    /// How the running context is folded
    pub context_update: ContextUpdate,
    /// Root seed for weight initialization
    pub seed: Option<u64>,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            embedding_dim: 128,
            head_num: 8,
            qkv_dim: 16,
            encoder_layer_num: 6,
            node_feature_dim: FEATURE_DIM,
            prompt_feature_dim: 2,
            norm_type: NormKind::Rms,
            ffd: FeedForwardKind::Siglu,
            ff_hidden_dim: 512,
            decode_mode: DecodeMode::Greedy,
            phase_consistency: PhaseConsistency::Lockstep,
            context_update: ContextUpdate::Gru,
            seed: None,
        }
    }
}

impl ModelConfig {
    /// Set the embedding width.
    #[must_use]
    pub fn with_embedding_dim(mut self, embedding_dim: usize) -> Self {
        self.embedding_dim = embedding_dim;
        self
    }

    /// Set the attention layout.
    #[must_use]
    pub fn with_heads(mut self, head_num: usize, qkv_dim: usize) -> Self {
        self.head_num = head_num;
        self.qkv_dim = qkv_dim;
        self
    }

    /// Set the number of encoder blocks.
    #[must_use]
    pub fn with_encoder_layers(mut self, encoder_layer_num: usize) -> Self {
        self.encoder_layer_num = encoder_layer_num;
        self
    }

    /// Set the raw node feature width.
    #[must_use]
    pub fn with_node_feature_dim(mut self, node_feature_dim: usize) -> Self {
        self.node_feature_dim = node_feature_dim;
        self
    }

    /// Set the prompt feature width.
    #[must_use]
    pub fn with_prompt_feature_dim(mut self, prompt_feature_dim: usize) -> Self {
        self.prompt_feature_dim = prompt_feature_dim;
        self
    }

    /// Set the normalization variant.
    #[must_use]
    pub fn with_norm_type(mut self, norm_type: NormKind) -> Self {
        self.norm_type = norm_type;
        self
    }

    /// Set the feed-forward variant.
    #[must_use]
    pub fn with_ffd(mut self, ffd: FeedForwardKind) -> Self {
        self.ffd = ffd;
        self
    }

    /// Set the default decode mode.
    #[must_use]
    pub fn with_decode_mode(mut self, decode_mode: DecodeMode) -> Self {
        self.decode_mode = decode_mode;
        self
    }

    /// Set phase handling.
    #[must_use]
    pub fn with_phase_consistency(mut self, phase_consistency: PhaseConsistency) -> Self {
        self.phase_consistency = phase_consistency;
        self
    }

    /// Set the context update rule.
    #[must_use]
    pub fn with_context_update(mut self, context_update: ContextUpdate) -> Self {
        self.context_update = context_update;
        self
    }

    /// Set the initialization seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check every dimension constraint.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::InvalidConfig`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let non_zero = [
            ("embedding_dim", self.embedding_dim),
            ("head_num", self.head_num),
            ("qkv_dim", self.qkv_dim),
            ("node_feature_dim", self.node_feature_dim),
            ("prompt_feature_dim", self.prompt_feature_dim),
            ("ff_hidden_dim", self.ff_hidden_dim),
        ];
        for (param, value) in non_zero {
            if value == 0 {
                return Err(PocatError::InvalidConfig {
                    param,
                    value: value.to_string(),
                    constraint: "> 0",
                });
            }
        }
        if self.embedding_dim % 2 != 0 {
            return Err(PocatError::InvalidConfig {
                param: "embedding_dim",
                value: self.embedding_dim.to_string(),
                constraint: "an even number",
            });
        }
        Ok(())
    }

    /// Parse a configuration from JSON. Missing fields take their defaults.
    ///
    /// String-valued settings are checked with their `FromStr` impls first,
    /// so a bad value names the setting it belongs to.
    ///
    /// # Errors
    ///
    /// - [`PocatError::UnknownVariant`] for an unrecognized enum value
    /// - [`PocatError::Serialization`] on malformed JSON or a wrongly typed field
    pub fn from_json(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json)?;
        check_variant::<NormKind>(&value, "norm_type")?;
        check_variant::<FeedForwardKind>(&value, "ffd")?;
        check_variant::<DecodeMode>(&value, "decode_mode")?;
        check_variant::<PhaseConsistency>(&value, "phase_consistency")?;
        check_variant::<ContextUpdate>(&value, "context_update")?;
        Ok(serde_json::from_value(value)?)
    }

    /// Serialize to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`PocatError::Serialization`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

fn check_variant<T>(value: &serde_json::Value, key: &str) -> Result<()>
where
    T: FromStr<Err = PocatError>,
{
    match value.get(key).and_then(serde_json::Value::as_str) {
        Some(raw) => raw.parse::<T>().map(drop),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ModelConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.embedding_dim, 128);
        assert_eq!(config.norm_type, NormKind::Rms);
        assert_eq!(config.decode_mode, DecodeMode::Greedy);
    }

    #[test]
    fn test_zero_dimension_rejected() {
        let err = ModelConfig::default().with_heads(0, 16).validate().unwrap_err();
        assert!(matches!(err, PocatError::InvalidConfig { param: "head_num", .. }));
    }

    #[test]
    fn test_odd_embedding_rejected() {
        let err = ModelConfig::default().with_embedding_dim(33).validate().unwrap_err();
        assert!(matches!(err, PocatError::InvalidConfig { param: "embedding_dim", .. }));
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            ModelConfig::from_json(r#"{"embedding_dim": 64, "norm_type": "instance"}"#).unwrap();
        assert_eq!(config.embedding_dim, 64);
        assert_eq!(config.norm_type, NormKind::Instance);
        assert_eq!(config.head_num, 8);
    }

    #[test]
    fn test_from_json_unknown_norm_rejected() {
        let err = ModelConfig::from_json(r#"{"norm_type": "batch"}"#).unwrap_err();
        match err {
            PocatError::UnknownVariant { kind, value } => {
                assert_eq!(kind, "norm_type");
                assert_eq!(value, "batch");
            }
            other => panic!("expected UnknownVariant, got {other:?}"),
        }
    }

    #[test]
    fn test_from_json_unknown_variant_names_setting() {
        let cases = [
            (r#"{"ffd": "moe"}"#, "ffd"),
            (r#"{"decode_mode": "beam"}"#, "decode_mode"),
            (r#"{"phase_consistency": "first_row"}"#, "phase_consistency"),
            (r#"{"context_update": "lstm"}"#, "context_update"),
        ];
        for (json, setting) in cases {
            let err = ModelConfig::from_json(json).unwrap_err();
            assert!(
                matches!(err, PocatError::UnknownVariant { kind, .. } if kind == setting),
                "{json}: {err:?}"
            );
        }
    }

    #[test]
    fn test_from_json_malformed_is_serialization_error() {
        assert!(matches!(
            ModelConfig::from_json("{not json").unwrap_err(),
            PocatError::Serialization(_)
        ));
        assert!(matches!(
            ModelConfig::from_json(r#"{"embedding_dim": "wide"}"#).unwrap_err(),
            PocatError::Serialization(_)
        ));
    }

    #[test]
    fn test_phase_consistency_parse() {
        assert_eq!(
            "independent".parse::<PhaseConsistency>().ok(),
            Some(PhaseConsistency::Independent)
        );
        assert!("first_row".parse::<PhaseConsistency>().is_err());
    }
}
