//! The [`Module`] trait implemented by every layer.

use crate::tensor::Tensor;

/// A neural network layer with learned parameters.
///
/// Layers are immutable during a forward pass, so a single model instance
/// can serve any number of rollouts.
pub trait Module {
    /// Apply the layer to `input`.
    fn forward(&self, input: &Tensor) -> Tensor;

    /// All learned tensors of this layer, in a stable order.
    fn parameters(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    /// Total number of learned scalars.
    fn num_parameters(&self) -> usize {
        self.parameters().iter().map(|p| p.numel()).sum()
    }
}
