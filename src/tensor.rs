//! Dense `f32` tensor used by every layer of the policy.
//!
//! The tensor stores row-major data with an explicit shape. It carries no
//! gradient information: the policy only runs forward passes, and the
//! outer training loop owns differentiation.
//!
//! Shape violations are programming errors and panic with a descriptive
//! message. Anything that can go wrong because of *runtime input* (the
//! environment, the configuration) is reported through
//! [`PocatError`](crate::error::PocatError) one level up.

use std::fmt;

/// A dense, row-major `f32` tensor.
///
/// # Example
///
/// ```
/// use pocat::Tensor;
///
/// let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
/// assert_eq!(t.shape(), &[2, 2]);
/// assert_eq!(t.transpose().data(), &[1.0, 3.0, 2.0, 4.0]);
/// ```
#[derive(Clone, PartialEq)]
pub struct Tensor {
    data: Vec<f32>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Create a new tensor from a slice with the given shape.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape dimensions.
    #[must_use]
    pub fn new(data: &[f32], shape: &[usize]) -> Self {
        Self::from_vec(data.to_vec(), shape)
    }

    /// Create a tensor that takes ownership of `data`.
    ///
    /// # Panics
    ///
    /// Panics if the data length doesn't match the product of shape dimensions.
    #[must_use]
    pub fn from_vec(data: Vec<f32>, shape: &[usize]) -> Self {
        let expected_len: usize = shape.iter().product();
        assert_eq!(
            data.len(),
            expected_len,
            "Data length {} doesn't match shape {:?} (expected {})",
            data.len(),
            shape,
            expected_len
        );
        Self {
            data,
            shape: shape.to_vec(),
        }
    }

    /// Create a 1D tensor from a slice.
    #[must_use]
    pub fn from_slice(data: &[f32]) -> Self {
        Self::new(data, &[data.len()])
    }

    /// Create a tensor filled with `value`.
    #[must_use]
    pub fn full(shape: &[usize], value: f32) -> Self {
        let len: usize = shape.iter().product();
        Self::from_vec(vec![value; len], shape)
    }

    /// Create a tensor filled with zeros.
    #[must_use]
    pub fn zeros(shape: &[usize]) -> Self {
        Self::full(shape, 0.0)
    }

    /// Create a tensor filled with ones.
    #[must_use]
    pub fn ones(shape: &[usize]) -> Self {
        Self::full(shape, 1.0)
    }

    /// Get the shape of the tensor.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Get the total number of elements.
    #[must_use]
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Get the number of dimensions.
    #[must_use]
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Size of the last dimension (1 for a scalar).
    #[must_use]
    pub fn last_dim(&self) -> usize {
        self.shape.last().copied().unwrap_or(1)
    }

    /// Get a reference to the underlying data.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Get a mutable reference to the underlying data.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Consume the tensor and return its storage.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.data
    }

    /// Get a scalar value (for 0-d or 1-element tensors).
    ///
    /// # Panics
    ///
    /// Panics if the tensor has more than one element.
    #[must_use]
    pub fn item(&self) -> f32 {
        assert_eq!(
            self.numel(),
            1,
            "item() only works on tensors with exactly 1 element, got {}",
            self.numel()
        );
        self.data[0]
    }

    /// Return a tensor with the same data and a new shape.
    ///
    /// # Panics
    ///
    /// Panics if the element counts differ.
    #[must_use]
    pub fn reshape(&self, shape: &[usize]) -> Tensor {
        Tensor::new(&self.data, shape)
    }

    /// Apply `f` element-wise.
    #[must_use]
    pub fn map(&self, f: impl Fn(f32) -> f32) -> Tensor {
        Tensor::from_vec(self.data.iter().map(|&v| f(v)).collect(), &self.shape)
    }

    /// Combine two same-shaped tensors element-wise.
    ///
    /// # Panics
    ///
    /// Panics if the shapes differ.
    #[must_use]
    pub fn zip_map(&self, other: &Tensor, f: impl Fn(f32, f32) -> f32) -> Tensor {
        assert_eq!(
            self.shape, other.shape,
            "element-wise op shape mismatch: {:?} vs {:?}",
            self.shape, other.shape
        );
        let data = self
            .data
            .iter()
            .zip(&other.data)
            .map(|(&a, &b)| f(a, b))
            .collect();
        Tensor::from_vec(data, &self.shape)
    }

    /// Element-wise addition.
    #[must_use]
    pub fn add(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a + b)
    }

    /// Element-wise multiplication.
    #[must_use]
    pub fn mul(&self, other: &Tensor) -> Tensor {
        self.zip_map(other, |a, b| a * b)
    }

    /// Multiply every element by `scalar`.
    #[must_use]
    pub fn mul_scalar(&self, scalar: f32) -> Tensor {
        self.map(|v| v * scalar)
    }

    /// Add a `[B, 1, D]` (or `[B, D]`) tensor to every row of a `[B, N, D]` tensor.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not 3D or the batch/feature sizes disagree.
    #[must_use]
    pub fn add_broadcast_dim1(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 3, "add_broadcast_dim1 expects a 3D tensor");
        let (b, n, d) = (self.shape[0], self.shape[1], self.shape[2]);
        assert_eq!(
            other.numel(),
            b * d,
            "broadcast operand must hold {b}x{d} values, got shape {:?}",
            other.shape
        );
        let mut out = self.data.clone();
        for bi in 0..b {
            let row = &other.data[bi * d..(bi + 1) * d];
            for ni in 0..n {
                let start = (bi * n + ni) * d;
                for (o, &r) in out[start..start + d].iter_mut().zip(row) {
                    *o += r;
                }
            }
        }
        Tensor::from_vec(out, &self.shape)
    }

    /// Transpose a 2D tensor.
    ///
    /// # Panics
    ///
    /// Panics if the tensor is not 2D.
    #[must_use]
    pub fn transpose(&self) -> Tensor {
        assert_eq!(self.ndim(), 2, "transpose requires a 2D tensor");
        let (rows, cols) = (self.shape[0], self.shape[1]);
        let mut out = vec![0.0; self.numel()];
        for i in 0..rows {
            for j in 0..cols {
                out[j * rows + i] = self.data[i * cols + j];
            }
        }
        Tensor::from_vec(out, &[cols, rows])
    }

    /// Matrix multiplication of two 2D tensors: `[m, k] @ [k, n] -> [m, n]`.
    ///
    /// Dispatches to trueno's SIMD matmul and falls back to the scalar
    /// kernel if the backend rejects the operands.
    ///
    /// # Panics
    ///
    /// Panics if either tensor is not 2D or the inner dimensions differ.
    #[must_use]
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.ndim(), 2, "matmul requires 2D tensors");
        assert_eq!(other.ndim(), 2, "matmul requires 2D tensors");
        let (m, k1) = (self.shape[0], self.shape[1]);
        let (k2, n) = (other.shape[0], other.shape[1]);
        assert_eq!(k1, k2, "matmul dimension mismatch: {k1} vs {k2}");

        let simd = trueno::Matrix::from_vec(m, k1, self.data.clone())
            .and_then(|a| {
                trueno::Matrix::from_vec(k2, n, other.data.clone()).and_then(|b| a.matmul(&b))
            })
            .map(|c| c.as_slice().to_vec());

        match simd {
            Ok(data) if data.len() == m * n => Tensor::from_vec(data, &[m, n]),
            _ => Tensor::from_vec(matmul_scalar(&self.data, &other.data, m, k1, n), &[m, n]),
        }
    }

    /// Batched matmul over the two trailing dimensions:
    /// `[b, m, k] @ [b, k, n] -> [b, m, n]` or
    /// `[b, h, m, k] @ [b, h, k, n] -> [b, h, m, n]`.
    ///
    /// Runs on `trueno::Matrix::batched_matmul_4d`; a 3D operand is treated
    /// as a single head. If the backend rejects the operands, each slice goes
    /// through [`Tensor::matmul`] instead.
    ///
    /// # Panics
    ///
    /// Panics if the tensors are not both 3D or both 4D, or if the leading or
    /// inner dimensions differ.
    #[must_use]
    pub fn matmul_batched(&self, other: &Tensor) -> Tensor {
        let nd = self.ndim();
        assert!(nd == 3 || nd == 4, "matmul_batched requires 3D or 4D tensors");
        assert_eq!(other.ndim(), nd, "matmul_batched rank mismatch");
        let lead = &self.shape[..nd - 2];
        assert_eq!(
            lead,
            &other.shape[..nd - 2],
            "matmul_batched batch mismatch: {:?} vs {:?}",
            self.shape,
            other.shape
        );
        let (m, k1) = (self.shape[nd - 2], self.shape[nd - 1]);
        let (k2, n) = (other.shape[nd - 2], other.shape[nd - 1]);
        assert_eq!(k1, k2, "matmul_batched dimension mismatch: {k1} vs {k2}");

        let (batch, heads) = if nd == 4 { (lead[0], lead[1]) } else { (lead[0], 1) };
        let mut out_shape = lead.to_vec();
        out_shape.extend([m, n]);

        match trueno::Matrix::batched_matmul_4d(&self.data, &other.data, batch, heads, m, k1, n) {
            Ok(data) if data.len() == batch * heads * m * n => Tensor::from_vec(data, &out_shape),
            _ => {
                let mut out = Vec::with_capacity(batch * heads * m * n);
                for s in 0..batch * heads {
                    let lhs = Tensor::new(&self.data[s * m * k1..(s + 1) * m * k1], &[m, k1]);
                    let rhs = Tensor::new(&other.data[s * k1 * n..(s + 1) * k1 * n], &[k1, n]);
                    out.extend_from_slice(lhs.matmul(&rhs).data());
                }
                Tensor::from_vec(out, &out_shape)
            }
        }
    }

    /// Concatenate tensors along their last dimension.
    ///
    /// # Panics
    ///
    /// Panics if `parts` is empty or the leading dimensions differ.
    #[must_use]
    pub fn concat_last(parts: &[&Tensor]) -> Tensor {
        assert!(!parts.is_empty(), "concat_last needs at least one tensor");
        let lead = &parts[0].shape[..parts[0].ndim() - 1];
        for p in parts {
            assert_eq!(
                &p.shape[..p.ndim() - 1],
                lead,
                "concat_last leading dimension mismatch"
            );
        }
        let rows: usize = lead.iter().product();
        let total: usize = parts.iter().map(|p| p.last_dim()).sum();

        let mut out = Vec::with_capacity(rows * total);
        for r in 0..rows {
            for p in parts {
                let w = p.last_dim();
                out.extend_from_slice(&p.data[r * w..(r + 1) * w]);
            }
        }
        let mut shape = lead.to_vec();
        shape.push(total);
        Tensor::from_vec(out, &shape)
    }

    /// Slice of the data belonging to leading index `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn row(&self, i: usize) -> &[f32] {
        let stride = self.numel() / self.shape[0];
        &self.data[i * stride..(i + 1) * stride]
    }

    /// Gather one node vector per batch row: `[B, N, D]` with indices `[B]` -> `[B, D]`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not 3D, `indices.len() != B`, or an index is out of range.
    #[must_use]
    pub fn gather_nodes(&self, indices: &[usize]) -> Tensor {
        assert_eq!(self.ndim(), 3, "gather_nodes expects [B, N, D]");
        let (b, n, d) = (self.shape[0], self.shape[1], self.shape[2]);
        assert_eq!(indices.len(), b, "gather_nodes needs one index per row");

        let mut out = Vec::with_capacity(b * d);
        for (bi, &idx) in indices.iter().enumerate() {
            assert!(idx < n, "node index {idx} out of range for {n} nodes");
            let start = (bi * n + idx) * d;
            out.extend_from_slice(&self.data[start..start + d]);
        }
        Tensor::from_vec(out, &[b, d])
    }

    /// Mean over the node dimension: `[B, N, D]` -> `[B, D]`.
    #[must_use]
    pub fn mean_dim1(&self) -> Tensor {
        let n = self.shape[1];
        self.masked_mean_dim1(&vec![true; self.shape[0] * n], 0.0)
    }

    /// Mean over the nodes whose `mask` entry is set: `[B, N, D]` -> `[B, D]`.
    ///
    /// The denominator is `count + eps`, so an empty mask yields zeros
    /// instead of NaN when `eps > 0`.
    ///
    /// # Panics
    ///
    /// Panics if `self` is not 3D or `mask.len() != B * N`.
    #[must_use]
    pub fn masked_mean_dim1(&self, mask: &[bool], eps: f32) -> Tensor {
        assert_eq!(self.ndim(), 3, "masked_mean_dim1 expects [B, N, D]");
        let (b, n, d) = (self.shape[0], self.shape[1], self.shape[2]);
        assert_eq!(mask.len(), b * n, "mask must be [B, N]");

        let mut out = vec![0.0; b * d];
        for bi in 0..b {
            let acc = &mut out[bi * d..(bi + 1) * d];
            let mut count = 0.0f32;
            for ni in 0..n {
                if !mask[bi * n + ni] {
                    continue;
                }
                count += 1.0;
                let start = (bi * n + ni) * d;
                for (a, &v) in acc.iter_mut().zip(&self.data[start..start + d]) {
                    *a += v;
                }
            }
            let denom = count + eps;
            for a in acc.iter_mut() {
                *a /= denom;
            }
        }
        Tensor::from_vec(out, &[b, d])
    }

    /// Replicate the whole batch `n` times along the leading dimension.
    ///
    /// Row `s * B + b` of the result is row `b` of `self`, so every
    /// replica `s` keeps the original instance order.
    #[must_use]
    pub fn batchify(&self, n: usize) -> Tensor {
        let mut shape = self.shape.clone();
        if shape.is_empty() {
            shape.push(1);
        }
        shape[0] *= n;
        let mut out = Vec::with_capacity(self.numel() * n);
        for _ in 0..n {
            out.extend_from_slice(&self.data);
        }
        Tensor::from_vec(out, &shape)
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tensor")
            .field("shape", &self.shape)
            .finish_non_exhaustive()
    }
}

/// Replicate a per-row slice `n` times in the same layout as [`Tensor::batchify`].
#[must_use]
pub fn batchify_slice<T: Clone>(values: &[T], n: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(values.len() * n);
    for _ in 0..n {
        out.extend_from_slice(values);
    }
    out
}

fn matmul_scalar(a: &[f32], b: &[f32], m: usize, k: usize, n: usize) -> Vec<f32> {
    let mut out = vec![0.0; m * n];
    for i in 0..m {
        for p in 0..k {
            let av = a[i * k + p];
            if av == 0.0 {
                continue;
            }
            let row = &b[p * n..(p + 1) * n];
            for (o, &bv) in out[i * n..(i + 1) * n].iter_mut().zip(row) {
                *o += av * bv;
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor_creation() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.numel(), 4);
        assert_eq!(t.ndim(), 2);
    }

    #[test]
    #[should_panic(expected = "doesn't match shape")]
    fn test_tensor_bad_shape_panics() {
        let _ = Tensor::new(&[1.0, 2.0, 3.0], &[2, 2]);
    }

    #[test]
    fn test_item() {
        let t = Tensor::new(&[42.0], &[1]);
        assert_eq!(t.item(), 42.0);
    }

    #[test]
    fn test_matmul() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let b = Tensor::new(&[7.0, 8.0, 9.0, 10.0, 11.0, 12.0], &[3, 2]);
        let c = a.matmul(&b);
        assert_eq!(c.shape(), &[2, 2]);
        assert_eq!(c.data(), &[58.0, 64.0, 139.0, 154.0]);
    }

    #[test]
    fn test_matmul_batched_matches_per_batch_matmul() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 0.5, 0.5, 1.0, -1.0], &[2, 2, 2]);
        let b = Tensor::new(&[1.0, 0.0, 0.0, 1.0, 2.0, 1.0, 1.0, 2.0], &[2, 2, 2]);
        let c = a.matmul_batched(&b);
        assert_eq!(c.shape(), &[2, 2, 2]);
        assert_eq!(&c.data()[..4], &[1.0, 2.0, 3.0, 4.0]);
        assert_eq!(&c.data()[4..], &[1.5, 1.5, 1.0, -1.0]);
    }

    #[test]
    fn test_matmul_batched_4d_matches_slices() {
        // [1, 2, 2, 3] @ [1, 2, 3, 1]
        let a = Tensor::from_vec((0..12).map(|v| v as f32).collect(), &[1, 2, 2, 3]);
        let b = Tensor::new(&[1.0, 0.0, -1.0, 2.0, 2.0, 2.0], &[1, 2, 3, 1]);
        let c = a.matmul_batched(&b);
        assert_eq!(c.shape(), &[1, 2, 2, 1]);
        // head 0: [0,1,2]·[1,0,-1], [3,4,5]·[1,0,-1]
        // head 1: [6,7,8]·[2,2,2], [9,10,11]·[2,2,2]
        assert_eq!(c.data(), &[-2.0, -2.0, 42.0, 60.0]);
    }

    #[test]
    fn test_transpose() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
        let tt = t.transpose();
        assert_eq!(tt.shape(), &[3, 2]);
        assert_eq!(tt.data(), &[1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_concat_last() {
        let a = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let b = Tensor::new(&[9.0, 8.0], &[2, 1]);
        let c = Tensor::concat_last(&[&a, &b]);
        assert_eq!(c.shape(), &[2, 3]);
        assert_eq!(c.data(), &[1.0, 2.0, 9.0, 3.0, 4.0, 8.0]);
    }

    #[test]
    fn test_gather_nodes() {
        // [B=2, N=3, D=2]
        let t = Tensor::new(
            &[0.0, 0.1, 1.0, 1.1, 2.0, 2.1, 10.0, 10.1, 11.0, 11.1, 12.0, 12.1],
            &[2, 3, 2],
        );
        let g = t.gather_nodes(&[2, 0]);
        assert_eq!(g.shape(), &[2, 2]);
        assert_eq!(g.data(), &[2.0, 2.1, 10.0, 10.1]);
    }

    #[test]
    fn test_masked_mean_dim1() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[1, 3, 2]);
        let m = t.masked_mean_dim1(&[true, false, true], 0.0);
        assert_eq!(m.data(), &[3.0, 4.0]);
    }

    #[test]
    fn test_masked_mean_empty_mask_is_finite() {
        let t = Tensor::ones(&[2, 3, 4]);
        let m = t.masked_mean_dim1(&[false; 6], 1e-9);
        assert!(m.data().iter().all(|v| v.is_finite() && *v == 0.0));
    }

    #[test]
    fn test_mean_dim1() {
        let t = Tensor::new(&[1.0, 3.0, 5.0, 7.0], &[1, 2, 2]);
        assert_eq!(t.mean_dim1().data(), &[3.0, 5.0]);
    }

    #[test]
    fn test_batchify_layout_is_start_major() {
        let t = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let r = t.batchify(3);
        assert_eq!(r.shape(), &[6, 2]);
        assert_eq!(r.row(0), &[1.0, 2.0]);
        assert_eq!(r.row(1), &[3.0, 4.0]);
        assert_eq!(r.row(2), &[1.0, 2.0]);
        assert_eq!(r.row(5), &[3.0, 4.0]);
        assert_eq!(batchify_slice(&[7, 8], 2), vec![7, 8, 7, 8]);
    }

    #[test]
    fn test_add_broadcast_dim1() {
        let x = Tensor::zeros(&[2, 2, 2]);
        let p = Tensor::new(&[1.0, 2.0, 3.0, 4.0], &[2, 1, 2]);
        let y = x.add_broadcast_dim1(&p);
        assert_eq!(y.data(), &[1.0, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0, 4.0]);
    }
}
