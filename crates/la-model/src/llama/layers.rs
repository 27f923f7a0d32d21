use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::config::LlamaConfig;
use crate::error::{ModelError, Result};
use crate::gguf::reader::GgufFile;

/// Weight tensors for a single LLaMA transformer layer.
///
/// All weights are stored as flat f32 vectors in row-major order.
#[derive(Debug, Clone)]
pub struct LlamaLayer {
    /// RMS norm weights for the attention sub-layer, length = n_embd.
    pub attn_norm: Vec<f32>,
    /// Query projection weights, shape [n_heads * head_dim, n_embd].
    pub wq: Vec<f32>,
    /// Key projection weights, shape [n_kv_heads * head_dim, n_embd].
    pub wk: Vec<f32>,
    /// Value projection weights, shape [n_kv_heads * head_dim, n_embd].
    pub wv: Vec<f32>,
    /// Output projection weights, shape [n_embd, n_heads * head_dim].
    pub wo: Vec<f32>,
    /// RMS norm weights for the FFN sub-layer, length = n_embd.
    pub ffn_norm: Vec<f32>,
    /// Gate projection weights (w1), shape [n_ff, n_embd].
    pub ffn_gate: Vec<f32>,
    /// Up projection weights (w3), shape [n_ff, n_embd].
    pub ffn_up: Vec<f32>,
    /// Down projection weights (w2), shape [n_embd, n_ff].
    pub ffn_down: Vec<f32>,
}

/// All weight tensors for a LLaMA model.
#[derive(Debug, Clone)]
pub struct LlamaWeights {
    /// Token embedding matrix, shape [n_vocab, n_embd].
    pub token_embd: Vec<f32>,
    /// Final RMS norm weights, length = n_embd.
    pub output_norm: Vec<f32>,
    /// Output (LM head) projection weights, shape [n_vocab, n_embd].
    pub output: Vec<f32>,
    /// Per-layer weights.
    pub layers: Vec<LlamaLayer>,
}

/// Loads named tensors and checks their element counts against the config.
struct WeightLoader<'a> {
    gguf: &'a GgufFile,
}

impl WeightLoader<'_> {
    fn load(&self, name: &str, expected: usize) -> Result<Vec<f32>> {
        let data = self.gguf.get_tensor_f32(name)?.data_f32().to_vec();
        if data.len() != expected {
            return Err(ModelError::TensorSize {
                name: name.to_string(),
                expected,
                got: data.len(),
            });
        }
        Ok(data)
    }

    fn block(&self, i: usize, part: &str, expected: usize) -> Result<Vec<f32>> {
        self.load(&format!("blk.{}.{}.weight", i, part), expected)
    }
}

impl LlamaWeights {
    /// Load all LLaMA weights from a parsed GGUF file.
    ///
    /// GGUF tensor names follow this pattern:
    /// - `token_embd.weight`
    /// - `output_norm.weight`
    /// - `output.weight` (falls back to token_embd if not present, for tied embeddings)
    /// - `blk.{i}.attn_norm.weight`
    /// - `blk.{i}.attn_q.weight`, `blk.{i}.attn_k.weight`, `blk.{i}.attn_v.weight`
    /// - `blk.{i}.attn_output.weight`
    /// - `blk.{i}.ffn_norm.weight`
    /// - `blk.{i}.ffn_gate.weight`, `blk.{i}.ffn_up.weight`, `blk.{i}.ffn_down.weight`
    pub fn from_gguf(gguf: &GgufFile, config: &LlamaConfig) -> Result<LlamaWeights> {
        let loader = WeightLoader { gguf };
        let n_embd = config.n_embd;
        let vocab_embd = config.n_vocab * n_embd;

        let token_embd = loader.load("token_embd.weight", vocab_embd)?;
        let output_norm = loader.load("output_norm.weight", n_embd)?;
        let output = match loader.load("output.weight", vocab_embd) {
            Ok(w) => w,
            Err(ModelError::TensorNotFound(_)) => token_embd.clone(),
            Err(e) => return Err(e),
        };

        let (q_dim, kv_dim, n_ff) = (config.q_dim(), config.kv_dim(), config.n_ff);
        let mut layers = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            layers.push(LlamaLayer {
                attn_norm: loader.block(i, "attn_norm", n_embd)?,
                wq: loader.block(i, "attn_q", q_dim * n_embd)?,
                wk: loader.block(i, "attn_k", kv_dim * n_embd)?,
                wv: loader.block(i, "attn_v", kv_dim * n_embd)?,
                wo: loader.block(i, "attn_output", n_embd * q_dim)?,
                ffn_norm: loader.block(i, "ffn_norm", n_embd)?,
                ffn_gate: loader.block(i, "ffn_gate", n_ff * n_embd)?,
                ffn_up: loader.block(i, "ffn_up", n_ff * n_embd)?,
                ffn_down: loader.block(i, "ffn_down", n_embd * n_ff)?,
            });
        }

        Ok(LlamaWeights {
            token_embd,
            output_norm,
            output,
            layers,
        })
    }

    /// Deterministic random weights for `config`.
    ///
    /// Projections are drawn uniformly from `±1/sqrt(fan_in)` and norm
    /// weights are ones, which keeps activations bounded for small models.
    /// The same seed always yields the same weights.
    pub fn seeded(config: &LlamaConfig, seed: u64) -> LlamaWeights {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut matrix = |rows: usize, cols: usize| -> Vec<f32> {
            let bound = 1.0 / (cols.max(1) as f32).sqrt();
            (0..rows * cols).map(|_| rng.gen_range(-bound..=bound)).collect()
        };

        let n_embd = config.n_embd;
        let (q_dim, kv_dim, n_ff) = (config.q_dim(), config.kv_dim(), config.n_ff);

        // Embeddings use a unit bound so distinct tokens stay well separated.
        let token_embd = matrix(config.n_vocab * n_embd, 1);

        let layers = (0..config.n_layers)
            .map(|_| LlamaLayer {
                attn_norm: vec![1.0; n_embd],
                wq: matrix(q_dim, n_embd),
                wk: matrix(kv_dim, n_embd),
                wv: matrix(kv_dim, n_embd),
                wo: matrix(n_embd, q_dim),
                ffn_norm: vec![1.0; n_embd],
                ffn_gate: matrix(n_ff, n_embd),
                ffn_up: matrix(n_ff, n_embd),
                ffn_down: matrix(n_embd, n_ff),
            })
            .collect();
        let output = matrix(config.n_vocab, n_embd);

        LlamaWeights {
            token_embd,
            output_norm: vec![1.0; n_embd],
            output,
            layers,
        }
    }

    /// Check every tensor length against `config`.
    pub fn validate(&self, config: &LlamaConfig) -> Result<()> {
        let check = |name: &str, got: usize, expected: usize| -> Result<()> {
            if got != expected {
                return Err(ModelError::TensorSize {
                    name: name.to_string(),
                    expected,
                    got,
                });
            }
            Ok(())
        };
        let n_embd = config.n_embd;
        let (q_dim, kv_dim, n_ff) = (config.q_dim(), config.kv_dim(), config.n_ff);

        check("token_embd", self.token_embd.len(), config.n_vocab * n_embd)?;
        check("output_norm", self.output_norm.len(), n_embd)?;
        check("output", self.output.len(), config.n_vocab * n_embd)?;
        check("layers", self.layers.len(), config.n_layers)?;
        for layer in &self.layers {
            check("attn_norm", layer.attn_norm.len(), n_embd)?;
            check("attn_q", layer.wq.len(), q_dim * n_embd)?;
            check("attn_k", layer.wk.len(), kv_dim * n_embd)?;
            check("attn_v", layer.wv.len(), kv_dim * n_embd)?;
            check("attn_output", layer.wo.len(), n_embd * q_dim)?;
            check("ffn_norm", layer.ffn_norm.len(), n_embd)?;
            check("ffn_gate", layer.ffn_gate.len(), n_ff * n_embd)?;
            check("ffn_up", layer.ffn_up.len(), n_ff * n_embd)?;
            check("ffn_down", layer.ffn_down.len(), n_embd * n_ff)?;
        }
        Ok(())
    }
}
