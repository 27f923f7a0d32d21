use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// Architectures whose GGUF layout matches the LLaMA block structure.
pub const SUPPORTED_ARCHITECTURES: &[&str] = &["llama", "mistral"];

/// Configuration for a LLaMA-family model, parsed from GGUF metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct LlamaConfig {
    /// Vocabulary size (number of token embeddings).
    pub n_vocab: usize,
    /// Embedding dimension / hidden size.
    pub n_embd: usize,
    /// Number of attention heads for queries.
    pub n_heads: usize,
    /// Number of attention heads for keys/values (GQA).
    pub n_kv_heads: usize,
    /// Number of transformer layers.
    pub n_layers: usize,
    /// Feed-forward intermediate dimension.
    pub n_ff: usize,
    /// RMS normalization epsilon.
    pub norm_eps: f32,
    /// Maximum sequence length / context window size.
    pub max_seq_len: usize,
    /// RoPE frequency base (theta).
    pub rope_theta: f32,
    /// Dimension of each attention head (n_embd / n_heads).
    pub head_dim: usize,
}

impl LlamaConfig {
    /// Parse a configuration from GGUF metadata.
    ///
    /// Hyperparameter keys are prefixed with `general.architecture`, e.g.
    /// `llama.embedding_length` or `mistral.block_count`:
    /// - `{arch}.embedding_length` -> n_embd
    /// - `{arch}.attention.head_count` -> n_heads
    /// - `{arch}.attention.head_count_kv` -> n_kv_heads (defaults to n_heads)
    /// - `{arch}.block_count` -> n_layers
    /// - `{arch}.feed_forward_length` -> n_ff
    /// - `{arch}.attention.layer_norm_rms_epsilon` -> norm_eps
    /// - `{arch}.context_length` -> max_seq_len
    /// - `{arch}.rope.freq_base` -> rope_theta (default 10000.0)
    /// - vocab size inferred from `tokenizer.ggml.tokens` array length
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<LlamaConfig> {
        let arch = metadata
            .get_string_opt("general.architecture")?
            .unwrap_or("llama");
        if !SUPPORTED_ARCHITECTURES.contains(&arch) {
            return Err(ModelError::UnsupportedArchitecture(arch.to_string()));
        }
        let key = |suffix: &str| format!("{}.{}", arch, suffix);

        let n_embd = metadata.get_u32(&key("embedding_length"))? as usize;
        let n_heads = metadata.get_u32(&key("attention.head_count"))? as usize;
        let n_kv_heads = match metadata.get_u32(&key("attention.head_count_kv")) {
            Ok(v) => v as usize,
            Err(ModelError::MissingKey(_)) => n_heads,
            Err(e) => return Err(e),
        };
        let n_layers = metadata.get_u32(&key("block_count"))? as usize;
        let n_ff = metadata.get_u32(&key("feed_forward_length"))? as usize;
        let norm_eps = metadata.get_f32(&key("attention.layer_norm_rms_epsilon"))?;
        let max_seq_len = metadata.get_u32(&key("context_length"))? as usize;
        let rope_theta = metadata.get_f32(&key("rope.freq_base")).unwrap_or(10000.0);

        let n_vocab = metadata.get_string_array("tokenizer.ggml.tokens")?.len();

        let config = LlamaConfig {
            n_vocab,
            n_embd,
            n_heads,
            n_kv_heads,
            n_layers,
            n_ff,
            norm_eps,
            max_seq_len,
            rope_theta,
            head_dim: if n_heads == 0 { 0 } else { n_embd / n_heads },
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the head layout: heads divide the embedding, KV heads divide the
    /// query heads, and the head dimension is even for RoPE.
    pub fn validate(&self) -> Result<()> {
        if self.n_heads == 0 || self.n_kv_heads == 0 || self.n_vocab == 0 {
            return Err(ModelError::Other(
                "model config has zero heads or an empty vocabulary".to_string(),
            ));
        }
        if self.n_embd % self.n_heads != 0 || self.head_dim * self.n_heads != self.n_embd {
            return Err(ModelError::Other(format!(
                "embedding length {} is not divisible into {} heads",
                self.n_embd, self.n_heads
            )));
        }
        if self.n_heads % self.n_kv_heads != 0 {
            return Err(ModelError::Other(format!(
                "{} query heads cannot be grouped over {} kv heads",
                self.n_heads, self.n_kv_heads
            )));
        }
        if self.head_dim % 2 != 0 {
            return Err(ModelError::Other(format!(
                "head dimension {} must be even",
                self.head_dim
            )));
        }
        Ok(())
    }

    /// Query projection width.
    pub fn q_dim(&self) -> usize {
        self.n_heads * self.head_dim
    }

    /// Key/value projection width.
    pub fn kv_dim(&self) -> usize {
        self.n_kv_heads * self.head_dim
    }
}
