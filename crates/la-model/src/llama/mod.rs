pub mod config;
pub mod kv_cache;
pub mod layers;

pub use config::LlamaConfig;
pub use kv_cache::KvCache;
pub use layers::{LlamaLayer, LlamaWeights};

use std::path::Path;

use la_tensor::{ComputeBackend, Shape, Tensor};
use tracing::{debug, trace};

use crate::architecture::{CausalLm, InferenceCache};
use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;
use crate::tokens::TokenBatch;

/// A LLaMA transformer model.
///
/// Holds the configuration and dequantized weights (as f32). The model is
/// immutable after loading; all per-request state lives in [`KvCache`].
#[derive(Debug, Clone)]
pub struct LlamaModel {
    /// Model hyperparameters.
    pub config: LlamaConfig,
    /// All weight tensors (dequantized to f32).
    pub weights: LlamaWeights,
}

impl LlamaModel {
    /// Load a LLaMA model from a parsed GGUF file.
    ///
    /// Parses the configuration from metadata, then loads and dequantizes
    /// all weight tensors.
    pub fn from_gguf(gguf: &GgufFile) -> Result<LlamaModel> {
        let config = LlamaConfig::from_gguf(&gguf.metadata)?;
        let weights = LlamaWeights::from_gguf(gguf, &config)?;
        debug!(
            n_layers = config.n_layers,
            n_embd = config.n_embd,
            n_vocab = config.n_vocab,
            max_seq_len = config.max_seq_len,
            "loaded llama weights"
        );
        Ok(LlamaModel { config, weights })
    }

    /// Open a GGUF file and load the model from it.
    pub fn open(path: &Path) -> Result<LlamaModel> {
        let gguf = GgufFile::open(path)?;
        Self::from_gguf(&gguf)
    }

    /// Build a model from in-memory weights, checking them against `config`.
    pub fn from_weights(config: LlamaConfig, weights: LlamaWeights) -> Result<LlamaModel> {
        config.validate()?;
        weights.validate(&config)?;
        Ok(LlamaModel { config, weights })
    }

    /// A model with deterministic random weights, see [`LlamaWeights::seeded`].
    pub fn seeded(config: LlamaConfig, seed: u64) -> Result<LlamaModel> {
        config.validate()?;
        let weights = LlamaWeights::seeded(&config, seed);
        Ok(LlamaModel { config, weights })
    }

    /// Returns a reference to the model configuration.
    pub fn config(&self) -> &LlamaConfig {
        &self.config
    }

    fn check_inputs(&self, tokens: &TokenBatch, start_pos: usize, cache: &KvCache) -> Result<()> {
        if tokens.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        if cache.batch_size() != tokens.batch_size() {
            return Err(ModelError::BatchMismatch {
                cache: cache.batch_size(),
                batch: tokens.batch_size(),
            });
        }
        let requested = (cache.seq_len() + tokens.seq_len()).max(start_pos + tokens.seq_len());
        if requested > self.config.max_seq_len {
            return Err(ModelError::ContextOverflow {
                requested,
                max: self.config.max_seq_len,
            });
        }
        if let Some(&id) = tokens
            .ids()
            .iter()
            .find(|&&id| id as usize >= self.config.n_vocab)
        {
            return Err(ModelError::InvalidToken {
                id,
                vocab_size: self.config.n_vocab,
            });
        }
        Ok(())
    }

    /// Causal grouped-query attention for the new tokens of one sequence.
    ///
    /// `q` is `[seq_len, q_dim]` for the new tokens; the cache row already
    /// holds `past + seq_len` positions, and query `t` sees the first
    /// `past + t + 1` of them.
    fn attend(&self, q: &[f32], cached_k: &[f32], cached_v: &[f32], past: usize) -> Vec<f32> {
        let cfg = &self.config;
        let head_dim = cfg.head_dim;
        let q_dim = cfg.q_dim();
        let kv_dim = cfg.kv_dim();
        let heads_per_kv = cfg.n_heads / cfg.n_kv_heads;
        let scale = 1.0 / (head_dim as f32).sqrt();
        let seq_len = q.len() / q_dim;

        let mut out = vec![0.0f32; q.len()];
        let mut scores = Vec::with_capacity(past + seq_len);
        for t in 0..seq_len {
            let visible = past + t + 1;
            for h in 0..cfg.n_heads {
                let kv_h = h / heads_per_kv;
                let q_start = t * q_dim + h * head_dim;
                let q_head = &q[q_start..q_start + head_dim];

                scores.clear();
                for s in 0..visible {
                    let k_offset = s * kv_dim + kv_h * head_dim;
                    let k_head = &cached_k[k_offset..k_offset + head_dim];
                    let dot: f32 = q_head.iter().zip(k_head).map(|(a, b)| a * b).sum();
                    scores.push(dot * scale);
                }

                let max_score = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
                let mut exp_sum = 0.0f32;
                for s in scores.iter_mut() {
                    *s = (*s - max_score).exp();
                    exp_sum += *s;
                }

                let dst = &mut out[q_start..q_start + head_dim];
                for (s, &p) in scores.iter().enumerate() {
                    let weight = p / exp_sum;
                    let v_offset = s * kv_dim + kv_h * head_dim;
                    for (d, &v) in dst.iter_mut().zip(&cached_v[v_offset..v_offset + head_dim]) {
                        *d += weight * v;
                    }
                }
            }
        }
        out
    }
}

impl CausalLm for LlamaModel {
    type Cache = KvCache;

    fn new_cache(&self, batch_size: usize) -> KvCache {
        let cfg = &self.config;
        KvCache::new(
            cfg.n_layers,
            cfg.n_kv_heads,
            cfg.head_dim,
            cfg.max_seq_len,
            batch_size,
        )
    }

    /// Run the LLaMA transformer over a `[batch, seq_len]` token block.
    ///
    /// Every row goes through embedding lookup, all transformer layers
    /// (attention + FFN with residual connections), the final norm and the
    /// output projection. Rows are independent; token `t` of every row is
    /// rotated for absolute position `start_pos + t`.
    ///
    /// Supports Grouped Query Attention (GQA) where n_kv_heads <= n_heads.
    fn forward(
        &self,
        tokens: &TokenBatch,
        start_pos: usize,
        cache: &mut KvCache,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor> {
        self.check_inputs(tokens, start_pos, cache)?;

        let cfg = &self.config;
        let n_embd = cfg.n_embd;
        let head_dim = cfg.head_dim;
        let q_dim = cfg.q_dim();
        let kv_dim = cfg.kv_dim();
        let batch = tokens.batch_size();
        let seq_len = tokens.seq_len();
        let rows = batch * seq_len;
        let past = cache.seq_len();

        trace!(batch, seq_len, start_pos, past, "llama forward");

        // Embedding lookup: hidden is [rows, n_embd].
        let mut hidden = Vec::with_capacity(rows * n_embd);
        for &id in tokens.ids() {
            let offset = id as usize * n_embd;
            hidden.extend_from_slice(&self.weights.token_embd[offset..offset + n_embd]);
        }

        for (layer_idx, layer) in self.weights.layers.iter().enumerate() {
            let normed = backend.rms_norm(&hidden, &layer.attn_norm, cfg.norm_eps, n_embd)?;

            // GGUF stores projections as [out_dim, in_dim], so each one is
            // a linear map over all rows at once.
            let q = backend.linear(&normed, &layer.wq, rows, n_embd, q_dim)?;
            let k = backend.linear(&normed, &layer.wk, rows, n_embd, kv_dim)?;
            let v = backend.linear(&normed, &layer.wv, rows, n_embd, kv_dim)?;

            let mut q_roped = Vec::with_capacity(q.len());
            for b in 0..batch {
                for t in 0..seq_len {
                    let r = b * seq_len + t;
                    let (q_r, k_r) = backend.rope(
                        &q[r * q_dim..(r + 1) * q_dim],
                        &k[r * kv_dim..(r + 1) * kv_dim],
                        head_dim,
                        start_pos + t,
                        cfg.n_heads,
                        cfg.n_kv_heads,
                        cfg.rope_theta,
                    )?;
                    q_roped.extend_from_slice(&q_r);
                    cache.append(layer_idx, b, &k_r, &v[r * kv_dim..(r + 1) * kv_dim]);
                }
            }

            let mut attn = Vec::with_capacity(rows * q_dim);
            for b in 0..batch {
                let q_rows = &q_roped[b * seq_len * q_dim..(b + 1) * seq_len * q_dim];
                attn.extend(self.attend(
                    q_rows,
                    cache.keys(layer_idx, b),
                    cache.values(layer_idx, b),
                    past,
                ));
            }

            let attn_proj = backend.linear(&attn, &layer.wo, rows, q_dim, n_embd)?;
            hidden = backend.add(&hidden, &attn_proj)?;

            // FFN: SwiGLU.
            //   gate = silu(ffn_gate @ normed)  -> [n_ff]
            //   up   = ffn_up @ normed          -> [n_ff]
            //   out  = ffn_down @ (gate * up)   -> [n_embd]
            let ffn_normed = backend.rms_norm(&hidden, &layer.ffn_norm, cfg.norm_eps, n_embd)?;
            let gate = backend.linear(&ffn_normed, &layer.ffn_gate, rows, n_embd, cfg.n_ff)?;
            let up = backend.linear(&ffn_normed, &layer.ffn_up, rows, n_embd, cfg.n_ff)?;
            let gate_up = backend.mul(&backend.silu(&gate)?, &up)?;
            let ffn_out = backend.linear(&gate_up, &layer.ffn_down, rows, cfg.n_ff, n_embd)?;
            hidden = backend.add(&hidden, &ffn_out)?;
        }

        let final_normed =
            backend.rms_norm(&hidden, &self.weights.output_norm, cfg.norm_eps, n_embd)?;
        let logits = backend.linear(&final_normed, &self.weights.output, rows, n_embd, cfg.n_vocab)?;

        Ok(Tensor::from_vec(
            logits,
            Shape::new(vec![batch, seq_len, cfg.n_vocab]),
        )?)
    }

    fn vocab_size(&self) -> usize {
        self.config.n_vocab
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use la_tensor::CpuBackend;

    fn tiny_config() -> LlamaConfig {
        LlamaConfig {
            n_vocab: 24,
            n_embd: 16,
            n_heads: 4,
            n_kv_heads: 2,
            n_layers: 2,
            n_ff: 32,
            norm_eps: 1e-5,
            max_seq_len: 32,
            rope_theta: 10000.0,
            head_dim: 4,
        }
    }

    fn model() -> LlamaModel {
        LlamaModel::seeded(tiny_config(), 7).unwrap()
    }

    #[test]
    fn test_logits_shape() {
        let m = model();
        let mut cache = m.new_cache(1);
        let logits = m
            .forward(&TokenBatch::single(&[1, 2, 3]), 0, &mut cache, &CpuBackend::new())
            .unwrap();
        assert_eq!(logits.shape().dims(), &[1, 3, 24]);
        assert_eq!(cache.seq_len(), 3);
    }

    #[test]
    fn test_incremental_matches_full_prefix() {
        let m = model();
        let backend = CpuBackend::new();

        let mut full = m.new_cache(1);
        let all = m
            .forward(&TokenBatch::single(&[4, 8, 15, 16]), 0, &mut full, &backend)
            .unwrap();

        let mut inc = m.new_cache(1);
        m.forward(&TokenBatch::single(&[4, 8, 15]), 0, &mut inc, &backend)
            .unwrap();
        let step = m
            .forward(&TokenBatch::single(&[16]), 3, &mut inc, &backend)
            .unwrap();

        let a = all.vector_at(&[0, 3]).unwrap();
        let b = step.vector_at(&[0, 0]).unwrap();
        for (x, y) in a.iter().zip(b) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-4);
        }
    }

    #[test]
    fn test_prefix_logits_ignore_later_tokens() {
        let m = model();
        let backend = CpuBackend::new();
        let mut c1 = m.new_cache(1);
        let mut c2 = m.new_cache(1);
        let a = m.forward(&TokenBatch::single(&[3, 5, 7]), 0, &mut c1, &backend).unwrap();
        let b = m.forward(&TokenBatch::single(&[3, 5, 9]), 0, &mut c2, &backend).unwrap();
        assert_eq!(a.vector_at(&[0, 1]).unwrap(), b.vector_at(&[0, 1]).unwrap());
        assert_ne!(a.vector_at(&[0, 2]).unwrap(), b.vector_at(&[0, 2]).unwrap());
    }

    #[test]
    fn test_batch_rows_are_independent() {
        let m = model();
        let backend = CpuBackend::new();

        let mut batched = m.new_cache(2);
        let both = m
            .forward(
                &TokenBatch::from_rows(&[vec![1, 2], vec![9, 10]]).unwrap(),
                0,
                &mut batched,
                &backend,
            )
            .unwrap();

        let mut single = m.new_cache(1);
        let second = m
            .forward(&TokenBatch::single(&[9, 10]), 0, &mut single, &backend)
            .unwrap();

        for (x, y) in both
            .vector_at(&[1, 1])
            .unwrap()
            .iter()
            .zip(second.vector_at(&[0, 1]).unwrap())
        {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_position_shift_changes_logits() {
        let m = model();
        let backend = CpuBackend::new();
        let mut prefix = m.new_cache(1);
        m.forward(&TokenBatch::single(&[2, 4, 6]), 0, &mut prefix, &backend)
            .unwrap();

        let mut right = prefix.clone();
        let mut shifted = prefix.clone();
        let a = m.forward(&TokenBatch::single(&[11]), 3, &mut right, &backend).unwrap();
        let b = m.forward(&TokenBatch::single(&[11]), 4, &mut shifted, &backend).unwrap();
        assert_ne!(a.data_f32(), b.data_f32());
    }

    #[test]
    fn test_seeded_is_deterministic() {
        let a = LlamaModel::seeded(tiny_config(), 3).unwrap();
        let b = LlamaModel::seeded(tiny_config(), 3).unwrap();
        let c = LlamaModel::seeded(tiny_config(), 4).unwrap();
        assert_eq!(a.weights.output, b.weights.output);
        assert_ne!(a.weights.output, c.weights.output);
    }

    #[test]
    fn test_rejects_invalid_inputs() {
        let m = model();
        let backend = CpuBackend::new();

        let mut cache = m.new_cache(1);
        let err = m
            .forward(&TokenBatch::single(&[99]), 0, &mut cache, &backend)
            .unwrap_err();
        assert!(matches!(err, ModelError::InvalidToken { id: 99, vocab_size: 24 }));

        let err = m
            .forward(&TokenBatch::single(&[]), 0, &mut cache, &backend)
            .unwrap_err();
        assert!(matches!(err, ModelError::EmptyBatch));

        let mut wide = m.new_cache(2);
        let err = m
            .forward(&TokenBatch::single(&[1]), 0, &mut wide, &backend)
            .unwrap_err();
        assert!(matches!(err, ModelError::BatchMismatch { cache: 2, batch: 1 }));

        let long: Vec<u32> = (0..33).map(|i| i % 24).collect();
        let err = m
            .forward(&TokenBatch::single(&long), 0, &mut cache, &backend)
            .unwrap_err();
        assert!(matches!(err, ModelError::ContextOverflow { requested: 33, max: 32 }));
    }

    #[test]
    fn test_from_weights_checks_sizes() {
        let cfg = tiny_config();
        let mut weights = LlamaWeights::seeded(&cfg, 1);
        weights.output_norm.pop();
        let err = LlamaModel::from_weights(cfg, weights).unwrap_err();
        assert!(matches!(err, ModelError::TensorSize { .. }));
    }
}
