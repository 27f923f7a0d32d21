//! `la-model` - causal language model capability for the lookahead engine.
//!
//! - [`CausalLm`] / [`InferenceCache`]: the seam the engine drives
//! - [`llama`]: batched LLaMA forward pass over a batched KV cache
//! - [`gguf`]: GGUF v3 reading (and writing, for synthetic models)
//! - [`tokenizer`]: the [`Tokenizer`] trait, a SentencePiece-style BPE
//!   tokenizer and Jinja chat templates

pub mod architecture;
pub mod error;
pub mod gguf;
pub mod llama;
pub mod tokenizer;
pub mod tokens;

pub use architecture::{CausalLm, InferenceCache};
pub use error::{ModelError, Result};
pub use llama::{KvCache, LlamaConfig, LlamaModel, LlamaWeights};
pub use tokenizer::{BpeTokenizer, ChatMessage, ChatTemplate, Tokenizer};
pub use tokens::{TokenBatch, TokenSequence};
