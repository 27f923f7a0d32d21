#![allow(dead_code)]

use la_model::gguf::{GgufBuilder, GgufMetadataValue};
use la_model::tokenizer::{TokenType, Vocab};
use la_model::{BpeTokenizer, LlamaConfig, LlamaModel, LlamaWeights};

pub const SEED: u64 = 7;
pub const INSTRUCTION: &str = "rewrite this";
pub const DOCUMENT: &str = "the cat sat";

/// Score-driven SentencePiece-style vocabulary: ChatML controls, a newline
/// byte, the space marker, every lowercase letter and a few merges.
pub fn vocab_entries() -> Vec<(String, f32, TokenType)> {
    let mut entries: Vec<(String, f32, TokenType)> = vec![
        ("<unk>".into(), 0.0, TokenType::Unknown),
        ("<s>".into(), 0.0, TokenType::Control),
        ("</s>".into(), 0.0, TokenType::Control),
        ("<|im_start|>".into(), 0.0, TokenType::Control),
        ("<|im_end|>".into(), 0.0, TokenType::Control),
        ("<0x0A>".into(), 0.0, TokenType::Byte),
        ("\u{2581}".into(), -1.0, TokenType::Normal),
    ];
    for c in 'a'..='z' {
        entries.push((c.to_string(), -1.0, TokenType::Normal));
    }
    for (piece, score) in [
        ("th", -0.5),
        ("the", -0.3),
        ("\u{2581}t", -0.6),
        ("\u{2581}the", -0.1),
        ("at", -0.5),
        ("\u{2581}c", -0.6),
        ("\u{2581}cat", -0.2),
        ("\u{2581}s", -0.6),
        ("\u{2581}sat", -0.2),
    ] {
        entries.push((piece.into(), score, TokenType::Normal));
    }
    entries
}

pub fn tokenizer() -> BpeTokenizer {
    prefixed_tokenizer().with_space_prefix(false)
}

/// The test vocabulary with the SentencePiece default of a leading space
/// marker.
pub fn prefixed_tokenizer() -> BpeTokenizer {
    let entries = vocab_entries();
    let vocab = Vocab::new(
        entries.iter().map(|e| e.0.clone()).collect(),
        entries.iter().map(|e| e.1).collect(),
        entries.iter().map(|e| e.2).collect(),
        1,
        2,
    )
    .unwrap();
    BpeTokenizer::new(vocab, Vec::new(), None).unwrap()
}

pub fn config() -> LlamaConfig {
    LlamaConfig {
        n_vocab: vocab_entries().len(),
        n_embd: 16,
        n_heads: 4,
        n_kv_heads: 2,
        n_layers: 2,
        n_ff: 32,
        norm_eps: 1e-5,
        max_seq_len: 256,
        rope_theta: 10000.0,
        head_dim: 4,
    }
}

pub fn model() -> LlamaModel {
    LlamaModel::seeded(config(), SEED).unwrap()
}

fn token_type_id(ty: TokenType) -> i32 {
    match ty {
        TokenType::Normal => 1,
        TokenType::Unknown => 2,
        TokenType::Control => 3,
        TokenType::UserDefined => 4,
        TokenType::Unused => 5,
        TokenType::Byte => 6,
    }
}

/// The seeded model and the test vocabulary packaged as one GGUF file.
pub fn gguf_builder() -> GgufBuilder {
    let config = config();
    let weights = LlamaWeights::seeded(&config, SEED);
    let entries = vocab_entries();
    let (embd, q_dim, kv_dim, ff) = (config.n_embd, config.q_dim(), config.kv_dim(), config.n_ff);

    let mut b = GgufBuilder::new();
    let u32v = |v: usize| GgufMetadataValue::U32(v as u32);
    b.metadata("general.architecture", GgufMetadataValue::String("llama".into()))
        .metadata("llama.embedding_length", u32v(embd))
        .metadata("llama.attention.head_count", u32v(config.n_heads))
        .metadata("llama.attention.head_count_kv", u32v(config.n_kv_heads))
        .metadata("llama.block_count", u32v(config.n_layers))
        .metadata("llama.feed_forward_length", u32v(ff))
        .metadata("llama.attention.layer_norm_rms_epsilon", GgufMetadataValue::F32(config.norm_eps))
        .metadata("llama.context_length", u32v(config.max_seq_len))
        .metadata("llama.rope.freq_base", GgufMetadataValue::F32(config.rope_theta))
        .metadata("tokenizer.ggml.model", GgufMetadataValue::String("llama".into()))
        .metadata(
            "tokenizer.ggml.tokens",
            GgufMetadataValue::Array(
                entries.iter().map(|e| GgufMetadataValue::String(e.0.clone())).collect(),
            ),
        )
        .metadata(
            "tokenizer.ggml.scores",
            GgufMetadataValue::Array(entries.iter().map(|e| GgufMetadataValue::F32(e.1)).collect()),
        )
        .metadata(
            "tokenizer.ggml.token_type",
            GgufMetadataValue::Array(
                entries.iter().map(|e| GgufMetadataValue::I32(token_type_id(e.2))).collect(),
            ),
        )
        .metadata("tokenizer.ggml.bos_token_id", GgufMetadataValue::U32(1))
        .metadata("tokenizer.ggml.eos_token_id", GgufMetadataValue::U32(2))
        .metadata("tokenizer.ggml.add_space_prefix", GgufMetadataValue::Bool(false));

    b.tensor_f32("token_embd.weight", &[config.n_vocab, embd], weights.token_embd)
        .tensor_f32("output_norm.weight", &[embd], weights.output_norm)
        .tensor_f32("output.weight", &[config.n_vocab, embd], weights.output);
    for (i, layer) in weights.layers.into_iter().enumerate() {
        let name = |part: &str| format!("blk.{}.{}.weight", i, part);
        b.tensor_f32(&name("attn_norm"), &[embd], layer.attn_norm)
            .tensor_f32(&name("attn_q"), &[q_dim, embd], layer.wq)
            .tensor_f32(&name("attn_k"), &[kv_dim, embd], layer.wk)
            .tensor_f32(&name("attn_v"), &[kv_dim, embd], layer.wv)
            .tensor_f32(&name("attn_output"), &[embd, q_dim], layer.wo)
            .tensor_f32(&name("ffn_norm"), &[embd], layer.ffn_norm)
            .tensor_f32(&name("ffn_gate"), &[ff, embd], layer.ffn_gate)
            .tensor_f32(&name("ffn_up"), &[ff, embd], layer.ffn_up)
            .tensor_f32(&name("ffn_down"), &[embd, ff], layer.ffn_down);
    }
    b
}
