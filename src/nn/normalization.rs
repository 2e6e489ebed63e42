//! Normalization layers for the encoder blocks.
//!
//! # References
//!
//! - Ba, J. L., Kiros, J. R., & Hinton, G. E. (2016). Layer normalization.
//!   arXiv:1607.06450.
//! - Zhang, B., & Sennrich, R. (2019). Root Mean Square Layer Normalization.
//!   `NeurIPS`.
//! - Ulyanov, D., Vedaldi, A., & Lempitsky, V. (2016). Instance
//!   normalization. arXiv:1607.08022.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::functional;
use super::init::constant;
use super::module::Module;
use crate::error::PocatError;
use crate::tensor::Tensor;

/// Which normalization the encoder blocks use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormKind {
    /// Standard layer normalization
    Layer,
    /// Root-mean-square normalization (scale only)
    #[default]
    Rms,
    /// Per-channel instance normalization over the node axis
    Instance,
}

impl FromStr for NormKind {
    type Err = PocatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "layer" => Ok(Self::Layer),
            "rms" => Ok(Self::Rms),
            "instance" => Ok(Self::Instance),
            other => Err(PocatError::UnknownVariant {
                kind: "norm_type",
                value: other.to_string(),
            }),
        }
    }
}

impl fmt::Display for NormKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Layer => "layer",
            Self::Rms => "rms",
            Self::Instance => "instance",
        })
    }
}

/// Layer Normalization (Ba et al., 2016).
///
/// ```text
/// y = (x - E[x]) / sqrt(Var[x] + eps) * gamma + beta
/// ```
#[derive(Debug)]
pub struct LayerNorm {
    eps: f32,
    weight: Tensor,
    bias: Tensor,
}

impl LayerNorm {
    /// Create a new `LayerNorm` over `dim` features (eps = 1e-5).
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self {
            eps: 1e-5,
            weight: constant(&[dim], 1.0),
            bias: constant(&[dim], 0.0),
        }
    }
}

impl Module for LayerNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        functional::layer_norm(input, &self.weight, &self.bias, self.eps)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }
}

/// Root Mean Square Layer Normalization (Zhang & Sennrich, 2019).
///
/// ```text
/// y = x / sqrt(mean(x^2) + eps) * gamma
/// ```
#[derive(Debug)]
pub struct RMSNorm {
    eps: f32,
    weight: Tensor,
}

impl RMSNorm {
    /// Create a new `RMSNorm` over `dim` features (eps = 1e-6).
    #[must_use]
    pub fn new(dim: usize) -> Self {
        Self::with_eps(dim, 1e-6)
    }

    /// Create `RMSNorm` with custom epsilon.
    #[must_use]
    pub fn with_eps(dim: usize, eps: f32) -> Self {
        Self {
            eps,
            weight: constant(&[dim], 1.0),
        }
    }

    /// Get the epsilon value.
    #[must_use]
    pub fn eps(&self) -> f32 {
        self.eps
    }
}

impl Module for RMSNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        functional::rms_norm(input, &self.weight, self.eps)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight]
    }
}

/// Instance Normalization with affine parameters and no running statistics.
///
/// Input is `[batch, nodes, channels]`; every channel is normalized over
/// the node axis of its own sample.
#[derive(Debug)]
pub struct InstanceNorm {
    eps: f32,
    weight: Tensor,
    bias: Tensor,
}

impl InstanceNorm {
    /// Create a new `InstanceNorm` for `num_channels` channels (eps = 1e-5).
    #[must_use]
    pub fn new(num_channels: usize) -> Self {
        Self {
            eps: 1e-5,
            weight: constant(&[num_channels], 1.0),
            bias: constant(&[num_channels], 0.0),
        }
    }
}

impl Module for InstanceNorm {
    fn forward(&self, input: &Tensor) -> Tensor {
        functional::instance_norm(input, &self.weight, &self.bias, self.eps)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        vec![&self.weight, &self.bias]
    }
}

/// Normalization chosen at construction time from a [`NormKind`].
#[derive(Debug)]
pub enum Normalization {
    /// Layer normalization
    Layer(LayerNorm),
    /// RMS normalization
    Rms(RMSNorm),
    /// Instance normalization
    Instance(InstanceNorm),
}

impl Normalization {
    /// Build the normalization for `dim` features.
    #[must_use]
    pub fn new(kind: NormKind, dim: usize) -> Self {
        match kind {
            NormKind::Layer => Self::Layer(LayerNorm::new(dim)),
            NormKind::Rms => Self::Rms(RMSNorm::new(dim)),
            NormKind::Instance => Self::Instance(InstanceNorm::new(dim)),
        }
    }

    /// Which variant this is.
    #[must_use]
    pub fn kind(&self) -> NormKind {
        match self {
            Self::Layer(_) => NormKind::Layer,
            Self::Rms(_) => NormKind::Rms,
            Self::Instance(_) => NormKind::Instance,
        }
    }
}

impl Module for Normalization {
    fn forward(&self, input: &Tensor) -> Tensor {
        match self {
            Self::Layer(n) => n.forward(input),
            Self::Rms(n) => n.forward(input),
            Self::Instance(n) => n.forward(input),
        }
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match self {
            Self::Layer(n) => n.parameters(),
            Self::Rms(n) => n.parameters(),
            Self::Instance(n) => n.parameters(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_norm_kind_from_str() {
        assert_eq!("layer".parse::<NormKind>().ok(), Some(NormKind::Layer));
        assert_eq!("rms".parse::<NormKind>().ok(), Some(NormKind::Rms));
        assert_eq!("instance".parse::<NormKind>().ok(), Some(NormKind::Instance));
    }

    #[test]
    fn test_norm_kind_unknown_is_error() {
        let err = "batch".parse::<NormKind>().unwrap_err();
        assert!(matches!(err, PocatError::UnknownVariant { kind: "norm_type", .. }));
    }

    #[test]
    fn test_norm_kind_display_roundtrip() {
        for kind in [NormKind::Layer, NormKind::Rms, NormKind::Instance] {
            assert_eq!(kind.to_string().parse::<NormKind>().ok(), Some(kind));
        }
    }

    #[test]
    fn test_normalization_preserves_shape() {
        let x = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 7.0, 1.0, 0.0], &[1, 2, 4]);
        for kind in [NormKind::Layer, NormKind::Rms, NormKind::Instance] {
            let norm = Normalization::new(kind, 4);
            assert_eq!(norm.kind(), kind);
            let y = norm.forward(&x);
            assert_eq!(y.shape(), x.shape());
            assert!(y.data().iter().all(|v| v.is_finite()));
        }
    }

    #[test]
    fn test_parameter_counts() {
        assert_eq!(Normalization::new(NormKind::Layer, 8).num_parameters(), 16);
        assert_eq!(Normalization::new(NormKind::Rms, 8).num_parameters(), 8);
        assert_eq!(Normalization::new(NormKind::Instance, 8).num_parameters(), 16);
    }

    #[test]
    fn test_rms_norm_default_eps() {
        assert!((RMSNorm::new(4).eps() - 1e-6).abs() < 1e-12);
    }
}
