//! Node encoder: raw features plus prompt embedding to contextual node embeddings.
//!
//! ```text
//! x = W_embed(nodes) + prompt
//! repeat encoder_layer_num times:
//!     h = norm1(x + MHA(x))
//!     x = norm2(h + FFN(h))
//! ```

use super::config::ModelConfig;
use crate::nn::{FeedForwardBlock, Linear, Module, MultiHeadAttention, Normalization, SeedStream};
use crate::tensor::Tensor;

/// One self-attention + feed-forward block with post-normalization.
#[derive(Debug)]
pub struct EncoderLayer {
    attention: MultiHeadAttention,
    norm1: Normalization,
    feed_forward: FeedForwardBlock,
    norm2: Normalization,
}

impl EncoderLayer {
    /// Build a block from the configuration.
    #[must_use]
    pub fn new(config: &ModelConfig, seeds: &mut SeedStream) -> Self {
        let d = config.embedding_dim;
        Self {
            attention: MultiHeadAttention::new(d, config.head_num, config.qkv_dim, || {
                seeds.next_seed()
            }),
            norm1: Normalization::new(config.norm_type, d),
            feed_forward: FeedForwardBlock::new(config.ffd, d, config.ff_hidden_dim, || {
                seeds.next_seed()
            }),
            norm2: Normalization::new(config.norm_type, d),
        }
    }
}

impl Module for EncoderLayer {
    fn forward(&self, input: &Tensor) -> Tensor {
        let h = self.norm1.forward(&input.add(&self.attention.forward(input)));
        self.norm2.forward(&h.add(&self.feed_forward.forward(&h)))
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.attention.parameters();
        p.extend(self.norm1.parameters());
        p.extend(self.feed_forward.parameters());
        p.extend(self.norm2.parameters());
        p
    }
}

/// Stack of [`EncoderLayer`]s over a linear feature embedding.
#[derive(Debug)]
pub struct Encoder {
    embedding: Linear,
    layers: Vec<EncoderLayer>,
}

impl Encoder {
    /// Build the encoder from the configuration.
    #[must_use]
    pub fn new(config: &ModelConfig, seeds: &mut SeedStream) -> Self {
        let embedding =
            Linear::with_seed(config.node_feature_dim, config.embedding_dim, seeds.next_seed());
        let layers = (0..config.encoder_layer_num)
            .map(|_| EncoderLayer::new(config, seeds))
            .collect();
        Self { embedding, layers }
    }

    /// Number of blocks.
    #[must_use]
    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Encode `[B, N, F]` node features with a `[B, 1, d]` prompt into `[B, N, d]`.
    #[must_use]
    pub fn encode(&self, node_features: &Tensor, prompt_embedding: &Tensor) -> Tensor {
        let mut x = self
            .embedding
            .forward(node_features)
            .add_broadcast_dim1(prompt_embedding);
        for layer in &self.layers {
            x = layer.forward(&x);
        }
        x
    }

    pub(crate) fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.embedding.parameters();
        for layer in &self.layers {
            p.extend(layer.parameters());
        }
        p
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nn::NormKind;

    fn small_config() -> ModelConfig {
        ModelConfig::default()
            .with_embedding_dim(16)
            .with_heads(2, 8)
            .with_encoder_layers(2)
            .with_node_feature_dim(3)
            .with_seed(11)
    }

    fn features(b: usize, n: usize) -> Tensor {
        let data: Vec<f32> = (0..b * n * 3).map(|i| (i as f32 * 0.29).sin()).collect();
        Tensor::from_vec(data, &[b, n, 3])
    }

    #[test]
    fn test_encoder_output_shape() {
        let config = small_config();
        let enc = Encoder::new(&config, &mut SeedStream::new(config.seed));
        assert_eq!(enc.num_layers(), 2);
        let out = enc.encode(&features(2, 5), &Tensor::zeros(&[2, 1, 16]));
        assert_eq!(out.shape(), &[2, 5, 16]);
        assert!(out.data().iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_encoder_all_norm_variants() {
        for norm in [NormKind::Layer, NormKind::Rms, NormKind::Instance] {
            let config = small_config().with_norm_type(norm);
            let enc = Encoder::new(&config, &mut SeedStream::new(config.seed));
            let out = enc.encode(&features(1, 4), &Tensor::zeros(&[1, 1, 16]));
            assert_eq!(out.shape(), &[1, 4, 16]);
        }
    }

    #[test]
    fn test_encoder_same_seed_same_output() {
        let config = small_config();
        let a = Encoder::new(&config, &mut SeedStream::new(config.seed));
        let b = Encoder::new(&config, &mut SeedStream::new(config.seed));
        let x = features(1, 4);
        let p = Tensor::full(&[1, 1, 16], 0.1);
        assert_eq!(a.encode(&x, &p), b.encode(&x, &p));
    }

    #[test]
    fn test_prompt_changes_embeddings() {
        let config = small_config();
        let enc = Encoder::new(&config, &mut SeedStream::new(config.seed));
        let x = features(1, 4);
        let a = enc.encode(&x, &Tensor::zeros(&[1, 1, 16]));
        let b = enc.encode(&x, &Tensor::full(&[1, 1, 16], 0.5));
        assert_ne!(a, b);
    }

    #[test]
    fn test_node_index_consistency() {
        // Embeddings follow node positions: swapping two nodes swaps their rows.
        let config = small_config();
        let enc = Encoder::new(&config, &mut SeedStream::new(config.seed));
        let x = features(1, 3);
        let mut swapped = x.data().to_vec();
        let (a, b) = swapped.split_at_mut(3);
        a.swap_with_slice(&mut b[..3]);
        let swapped = Tensor::from_vec(swapped, &[1, 3, 3]);

        let p = Tensor::zeros(&[1, 1, 16]);
        let y = enc.encode(&x, &p);
        let ys = enc.encode(&swapped, &p);
        for i in 0..16 {
            assert!((y.data()[i] - ys.data()[16 + i]).abs() < 1e-4);
            assert!((y.data()[16 + i] - ys.data()[i]).abs() < 1e-4);
            assert!((y.data()[32 + i] - ys.data()[32 + i]).abs() < 1e-4);
        }
    }
}
