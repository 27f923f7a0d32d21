pub mod matmul;
pub mod unary;

use crate::backend::ComputeBackend;
use crate::error::{Result, TensorError};

/// Pure-Rust CPU compute backend.
///
/// Straightforward loops optimized for correctness rather than peak
/// performance. Every method validates slice lengths before dispatching to
/// the kernels in `matmul` and `unary`.
#[derive(Debug, Clone, Default)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        CpuBackend
    }
}

fn expect_len(op: &str, what: &str, got: usize, expected: usize) -> Result<()> {
    if got != expected {
        return Err(TensorError::Other(format!(
            "{}: {}.len()={} but expected {}",
            op, what, got, expected
        )));
    }
    Ok(())
}

fn expect_multiple(op: &str, got: usize, chunk: usize) -> Result<()> {
    if chunk == 0 || got % chunk != 0 {
        return Err(TensorError::Other(format!(
            "{}: x.len()={} is not a multiple of {}",
            op, got, chunk
        )));
    }
    Ok(())
}

impl ComputeBackend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn linear(
        &self,
        x: &[f32],
        w: &[f32],
        rows: usize,
        in_dim: usize,
        out_dim: usize,
    ) -> Result<Vec<f32>> {
        expect_len("linear", "x", x.len(), rows * in_dim)?;
        expect_len("linear", "w", w.len(), out_dim * in_dim)?;
        Ok(matmul::linear(x, w, rows, in_dim, out_dim))
    }

    fn add(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b).map(|(x, y)| x + y).collect())
    }

    fn mul(&self, a: &[f32], b: &[f32]) -> Result<Vec<f32>> {
        if a.len() != b.len() {
            return Err(TensorError::ShapeMismatch {
                expected: vec![a.len()],
                got: vec![b.len()],
            });
        }
        Ok(a.iter().zip(b).map(|(x, y)| x * y).collect())
    }

    fn rms_norm(
        &self,
        x: &[f32],
        weight: &[f32],
        eps: f32,
        hidden_size: usize,
    ) -> Result<Vec<f32>> {
        expect_len("rms_norm", "weight", weight.len(), hidden_size)?;
        expect_multiple("rms_norm", x.len(), hidden_size)?;
        Ok(unary::rms_norm(x, weight, eps, hidden_size))
    }

    fn softmax(&self, x: &[f32], n: usize) -> Result<Vec<f32>> {
        expect_multiple("softmax", x.len(), n)?;
        Ok(unary::softmax(x, n))
    }

    fn rope(
        &self,
        q: &[f32],
        k: &[f32],
        head_dim: usize,
        pos: usize,
        n_heads_q: usize,
        n_heads_k: usize,
        theta: f32,
    ) -> Result<(Vec<f32>, Vec<f32>)> {
        expect_len("rope", "q", q.len(), n_heads_q * head_dim)?;
        expect_len("rope", "k", k.len(), n_heads_k * head_dim)?;
        if head_dim % 2 != 0 {
            return Err(TensorError::Other(format!(
                "rope: head_dim={} must be even",
                head_dim
            )));
        }

        let mut q_out = q.to_vec();
        let mut k_out = k.to_vec();
        unary::rope_in_place(&mut q_out, head_dim, pos, theta);
        unary::rope_in_place(&mut k_out, head_dim, pos, theta);
        Ok((q_out, k_out))
    }

    fn silu(&self, x: &[f32]) -> Result<Vec<f32>> {
        Ok(unary::silu(x))
    }
}
