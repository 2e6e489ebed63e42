//! Fully connected (linear) layer.
//!
//! Implements the transformation y = xW^T + b.
//!
//! # References
//!
//! - Glorot, X., & Bengio, Y. (2010). Understanding the difficulty of training
//!   deep feedforward neural networks. AISTATS.

use super::init::{constant, xavier_uniform};
use super::module::Module;
use crate::tensor::Tensor;

/// Fully connected layer: y = xW^T + b
///
/// # Shape
///
/// - Input: `(*, in_features)` where `*` means any number of batch dimensions
/// - Output: `(*, out_features)`
///
/// # Example
///
/// ```
/// use pocat::nn::{Linear, Module};
/// use pocat::Tensor;
///
/// let layer = Linear::with_seed(20, 30, Some(1));
/// let x = Tensor::ones(&[4, 7, 20]);
/// assert_eq!(layer.forward(&x).shape(), &[4, 7, 30]);
/// ```
pub struct Linear {
    /// Weight matrix, shape: [out_features, in_features]
    weight: Tensor,

    /// Cached transposed weight [in_features, out_features]
    weight_t: Tensor,

    /// Bias vector, shape: [out_features], or None if bias=false
    bias: Option<Tensor>,

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Create a new Linear layer with Xavier initialization.
    #[must_use]
    pub fn new(in_features: usize, out_features: usize) -> Self {
        Self::with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer with a specific random seed.
    #[must_use]
    pub fn with_seed(in_features: usize, out_features: usize, seed: Option<u64>) -> Self {
        let mut layer = Self::without_bias_with_seed(in_features, out_features, seed);
        layer.bias = Some(constant(&[out_features], 0.0));
        layer
    }

    /// Create a Linear layer without bias.
    #[must_use]
    pub fn without_bias(in_features: usize, out_features: usize) -> Self {
        Self::without_bias_with_seed(in_features, out_features, None)
    }

    /// Create a Linear layer without bias with a specific random seed.
    #[must_use]
    pub fn without_bias_with_seed(
        in_features: usize,
        out_features: usize,
        seed: Option<u64>,
    ) -> Self {
        let weight = xavier_uniform(&[out_features, in_features], in_features, out_features, seed);
        let weight_t = weight.transpose();
        Self {
            weight,
            weight_t,
            bias: None,
            in_features,
            out_features,
        }
    }

    /// Get the input feature dimension.
    #[must_use]
    pub fn in_features(&self) -> usize {
        self.in_features
    }

    /// Get the output feature dimension.
    #[must_use]
    pub fn out_features(&self) -> usize {
        self.out_features
    }

    /// Check if this layer has a bias term.
    #[must_use]
    pub fn has_bias(&self) -> bool {
        self.bias.is_some()
    }

    /// Get reference to weight tensor.
    #[must_use]
    pub fn weight(&self) -> &Tensor {
        &self.weight
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Tensor {
        let shape = input.shape();
        assert_eq!(
            input.last_dim(),
            self.in_features,
            "Linear expects last dim {}, got shape {:?}",
            self.in_features,
            shape
        );

        // Flatten leading dims, multiply, restore
        let rows = input.numel() / self.in_features;
        let mut output = input
            .reshape(&[rows, self.in_features])
            .matmul(&self.weight_t);

        if let Some(bias) = &self.bias {
            let b = bias.data();
            for row in output.data_mut().chunks_mut(self.out_features) {
                for (o, &bv) in row.iter_mut().zip(b) {
                    *o += bv;
                }
            }
        }

        let mut out_shape = shape[..shape.len() - 1].to_vec();
        out_shape.push(self.out_features);
        output.reshape(&out_shape)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        match &self.bias {
            Some(b) => vec![&self.weight, b],
            None => vec![&self.weight],
        }
    }
}

impl std::fmt::Debug for Linear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Linear")
            .field("in_features", &self.in_features)
            .field("out_features", &self.out_features)
            .field("bias", &self.bias.is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    impl Linear {
        fn set_weight(&mut self, weight: Tensor) {
            assert_eq!(weight.shape(), &[self.out_features, self.in_features]);
            self.weight_t = weight.transpose();
            self.weight = weight;
        }

        fn set_bias(&mut self, bias: Tensor) {
            assert_eq!(bias.shape(), &[self.out_features]);
            self.bias = Some(bias);
        }
    }

    #[test]
    fn test_linear_forward_shape() {
        let layer = Linear::new(10, 5);
        let x = Tensor::ones(&[32, 10]);
        assert_eq!(layer.forward(&x).shape(), &[32, 5]);
    }

    #[test]
    fn test_linear_forward_3d() {
        let layer = Linear::new(4, 6);
        let x = Tensor::ones(&[2, 3, 4]);
        assert_eq!(layer.forward(&x).shape(), &[2, 3, 6]);
    }

    #[test]
    fn test_linear_parameters() {
        let layer = Linear::new(10, 5);
        let params = layer.parameters();
        assert_eq!(params.len(), 2);
        assert_eq!(params[0].shape(), &[5, 10]);
        assert_eq!(params[1].shape(), &[5]);
        assert_eq!(layer.num_parameters(), 55);
    }

    #[test]
    fn test_linear_without_bias() {
        let layer = Linear::without_bias(10, 5);
        assert_eq!(layer.parameters().len(), 1);
        assert!(!layer.has_bias());
    }

    #[test]
    fn test_linear_reproducible() {
        let a = Linear::with_seed(10, 5, Some(42));
        let b = Linear::with_seed(10, 5, Some(42));
        assert_eq!(a.weight().data(), b.weight().data());
    }

    #[test]
    fn test_linear_with_bias() {
        let mut layer = Linear::with_seed(2, 2, Some(42));
        layer.set_weight(Tensor::new(&[1.0, 0.0, 0.0, 1.0], &[2, 2]));
        layer.set_bias(Tensor::new(&[10.0, 20.0], &[2]));

        let out = layer.forward(&Tensor::new(&[1.0, 2.0], &[1, 2]));
        assert!((out.data()[0] - 11.0).abs() < 1e-5);
        assert!((out.data()[1] - 22.0).abs() < 1e-5);
    }

    #[test]
    fn test_linear_non_square_weight() {
        let mut layer = Linear::without_bias_with_seed(3, 2, Some(0));
        // y0 = x0 + x2, y1 = 2*x1
        layer.set_weight(Tensor::new(&[1.0, 0.0, 1.0, 0.0, 2.0, 0.0], &[2, 3]));
        let out = layer.forward(&Tensor::new(&[1.0, 2.0, 3.0], &[1, 3]));
        assert_eq!(out.data(), &[4.0, 4.0]);
    }
}
