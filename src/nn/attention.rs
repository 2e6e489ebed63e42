//! Multi-head self-attention over the node set (Vaswani et al., 2017).
//!
//! No masking is applied: every node attends to every other node.
//!
//! ```text
//! head_h = softmax(Q_h K_h^T / sqrt(qkv_dim)) V_h
//! out    = combine(concat(head_1, ..., head_H))
//! ```

use super::functional::softmax;
use super::linear::Linear;
use super::module::Module;
use crate::tensor::Tensor;

/// Unmasked multi-head self-attention.
///
/// Q/K/V projections map `embed_dim -> head_num * qkv_dim` without bias;
/// the combine projection maps back to `embed_dim` with bias.
pub struct MultiHeadAttention {
    embed_dim: usize,
    head_num: usize,
    qkv_dim: usize,
    w_q: Linear,
    w_k: Linear,
    w_v: Linear,
    combine: Linear,
}

impl MultiHeadAttention {
    /// Create a new attention layer.
    ///
    /// `seeds` supplies one seed per projection (Q, K, V, combine).
    #[must_use]
    pub fn new(
        embed_dim: usize,
        head_num: usize,
        qkv_dim: usize,
        mut seeds: impl FnMut() -> Option<u64>,
    ) -> Self {
        let inner = head_num * qkv_dim;
        Self {
            embed_dim,
            head_num,
            qkv_dim,
            w_q: Linear::without_bias_with_seed(embed_dim, inner, seeds()),
            w_k: Linear::without_bias_with_seed(embed_dim, inner, seeds()),
            w_v: Linear::without_bias_with_seed(embed_dim, inner, seeds()),
            combine: Linear::with_seed(inner, embed_dim, seeds()),
        }
    }

    /// Number of heads.
    #[must_use]
    pub fn head_num(&self) -> usize {
        self.head_num
    }

    /// Per-head width.
    #[must_use]
    pub fn qkv_dim(&self) -> usize {
        self.qkv_dim
    }
}

impl Module for MultiHeadAttention {
    /// `[B, N, embed_dim] -> [B, N, embed_dim]`
    fn forward(&self, input: &Tensor) -> Tensor {
        assert_eq!(input.ndim(), 3, "attention expects [batch, nodes, embed]");
        let (b, n) = (input.shape()[0], input.shape()[1]);

        let q = split_heads(&self.w_q.forward(input), self.head_num, self.qkv_dim);
        let k = split_heads(&self.w_k.forward(input), self.head_num, self.qkv_dim);
        let v = split_heads(&self.w_v.forward(input), self.head_num, self.qkv_dim);

        let scale = 1.0 / (self.qkv_dim as f32).sqrt();
        let k_t = transpose_last_two(&k);
        let scores = q.matmul_batched(&k_t).mul_scalar(scale);
        let weights = softmax(&scores);
        let heads = weights.matmul_batched(&v);

        let merged = merge_heads(&heads, b, n, self.head_num, self.qkv_dim);
        self.combine.forward(&merged)
    }

    fn parameters(&self) -> Vec<&Tensor> {
        let mut p = self.w_q.parameters();
        p.extend(self.w_k.parameters());
        p.extend(self.w_v.parameters());
        p.extend(self.combine.parameters());
        p
    }
}

impl std::fmt::Debug for MultiHeadAttention {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MultiHeadAttention")
            .field("embed_dim", &self.embed_dim)
            .field("head_num", &self.head_num)
            .field("qkv_dim", &self.qkv_dim)
            .finish_non_exhaustive()
    }
}

/// `[B, N, H*D] -> [B, H, N, D]`
fn split_heads(x: &Tensor, heads: usize, dim: usize) -> Tensor {
    let (b, n) = (x.shape()[0], x.shape()[1]);
    let data = x.data();
    let mut out = vec![0.0; data.len()];
    for bi in 0..b {
        for ni in 0..n {
            for h in 0..heads {
                let src = (bi * n + ni) * heads * dim + h * dim;
                let dst = ((bi * heads + h) * n + ni) * dim;
                out[dst..dst + dim].copy_from_slice(&data[src..src + dim]);
            }
        }
    }
    Tensor::from_vec(out, &[b, heads, n, dim])
}

/// `[B, H, N, D] -> [B, N, H*D]`
fn merge_heads(x: &Tensor, b: usize, n: usize, heads: usize, dim: usize) -> Tensor {
    let data = x.data();
    let mut out = vec![0.0; data.len()];
    for bi in 0..b {
        for h in 0..heads {
            for ni in 0..n {
                let src = ((bi * heads + h) * n + ni) * dim;
                let dst = (bi * n + ni) * heads * dim + h * dim;
                out[dst..dst + dim].copy_from_slice(&data[src..src + dim]);
            }
        }
    }
    Tensor::from_vec(out, &[b, n, heads * dim])
}

/// Swap the two trailing dims of a `[B, H, R, C]` tensor.
fn transpose_last_two(x: &Tensor) -> Tensor {
    let shape = x.shape();
    let (r, c) = (shape[2], shape[3]);
    let data = x.data();
    let mut out = vec![0.0; data.len()];
    for off in (0..data.len()).step_by((r * c).max(1)) {
        for i in 0..r {
            for j in 0..c {
                out[off + j * r + i] = data[off + i * c + j];
            }
        }
    }
    Tensor::from_vec(out, &[shape[0], shape[1], c, r])
}
