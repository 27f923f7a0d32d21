//! Dense matrix kernels used by `CpuBackend`.

/// Y[rows, out_dim] = X[rows, in_dim] @ W[out_dim, in_dim]^T.
pub fn linear(x: &[f32], w: &[f32], rows: usize, in_dim: usize, out_dim: usize) -> Vec<f32> {
    let mut y = vec![0.0f32; rows * out_dim];
    for r in 0..rows {
        let x_row = &x[r * in_dim..(r + 1) * in_dim];
        for o in 0..out_dim {
            let w_row = &w[o * in_dim..(o + 1) * in_dim];
            y[r * out_dim + o] = dot(x_row, w_row);
        }
    }
    y
}

pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
