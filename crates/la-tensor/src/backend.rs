use std::fmt::Debug;

use crate::error::Result;

/// Trait for pluggable compute backends.
///
/// All operations work on row-major f32 slices and return owned vectors.
/// Backends are shared read-only across requests, so every method takes
/// `&self`.
pub trait ComputeBackend: Send + Sync + Debug {
    /// Returns the name of this backend (e.g., "cpu").
    fn name(&self) -> &str;

    /// Linear projection of a batch of rows: Y = X @ W^T.
    ///
    /// - `x`: [rows, in_dim]
    /// - `w`: [out_dim, in_dim], the layout GGUF stores projection weights in
    /// - Returns: [rows, out_dim]
    fn linear(
        &self,
        x: &[f32],
        w: &[f32],
        rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Vec<f32>>;

    /// Element-wise addition: result[i] = a[i] + b[i].
    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// Element-wise multiplication: result[i] = a[i] * b[i].
    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>>;

    /// RMS normalization over each row of `hidden_size` elements:
    ///   result[i] = x[i] * weight[i] / sqrt(mean(x^2) + eps)
    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>>;

    /// Softmax over consecutive chunks of `n` elements.
    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>>;

    /// Rotary Position Embedding for one token.
    ///
    /// - `q`: [n_heads_q, head_dim], `k`: [n_heads_k, head_dim]
    /// - `pos`: absolute sequence position of the token
    /// - `theta`: frequency base (`rope.freq_base` in GGUF, usually 10000)
    ///
    /// Returns (rotated_q, rotated_k).
    #[allow(clippy::too_many_arguments)]
    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)>;

    /// SiLU activation: result[i] = x[i] / (1 + exp(-x[i])).
    fn silu(&self, x: &[f32]) -> Result<Vec<f32>>;
}
