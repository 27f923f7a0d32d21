//! Row-wise and element-wise kernels used by `CpuBackend`.

pub fn silu(x: &[f32]) -> Vec<f32> {
    x.iter().map(|&v| v / (1.0 + (-v).exp())).collect()
}

/// Numerically stable softmax of every `n`-sized chunk of `x`.
pub fn softmax(x: &[f32], n: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; x.len()];
    for (src, dst) in x.chunks_exact(n).zip(out.chunks_exact_mut(n)) {
        let max_val = src.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mut sum = 0.0f32;
        for (d, &s) in dst.iter_mut().zip(src) {
            *d = (s - max_val).exp();
            sum += *d;
        }
        for d in dst.iter_mut() {
            *d /= sum;
        }
    }
    out
}

pub fn rms_norm(x: &[f32], weight: &[f32], eps: f32, hidden_size: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; x.len()];
    for (src, dst) in x.chunks_exact(hidden_size).zip(out.chunks_exact_mut(hidden_size)) {
        let mean_sq = src.iter().map(|v| v * v).sum::<f32>() / hidden_size as f32;
        let rms = (mean_sq + eps).sqrt();
        for ((d, &s), &w) in dst.iter_mut().zip(src).zip(weight) {
            *d = s * w / rms;
        }
    }
    out
}

/// Rotate consecutive (even, odd) pairs of every head in place.
pub fn rope_in_place(x: &mut [f32], head_dim: usize, pos: usize, theta: f32) {
    let half = head_dim / 2;
    for head in x.chunks_exact_mut(head_dim) {
        for i in 0..half {
            let freq = 1.0 / theta.powf(2.0 * i as f32 / head_dim as f32);
            let angle = pos as f32 * freq;
            let (sin, cos) = angle.sin_cos();
            let x0 = head[2 * i];
            let x1 = head[2 * i + 1];
            head[2 * i] = x0 * cos - x1 * sin;
            head[2 * i + 1] = x0 * sin + x1 * cos;
        }
    }
}
