use std::collections::HashMap;

use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;

/// GGUF `tokenizer.ggml.token_type` values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenType {
    Normal,
    Unknown,
    Control,
    UserDefined,
    Unused,
    Byte,
}

impl TokenType {
    pub fn from_gguf(v: i32) -> TokenType {
        match v {
            2 => TokenType::Unknown,
            3 => TokenType::Control,
            4 => TokenType::UserDefined,
            5 => TokenType::Unused,
            6 => TokenType::Byte,
            _ => TokenType::Normal,
        }
    }

    /// Tokens dropped by `decode(.., skip_special = true)`.
    pub fn is_special(&self) -> bool {
        matches!(self, TokenType::Unknown | TokenType::Control | TokenType::Unused)
    }

    /// Tokens matched verbatim in input text instead of being merged.
    pub fn is_literal(&self) -> bool {
        matches!(self, TokenType::Control | TokenType::UserDefined)
    }
}

/// Token vocabulary loaded from GGUF metadata.
#[derive(Debug, Clone)]
pub struct Vocab {
    /// Token strings, indexed by token ID.
    pub tokens: Vec<String>,
    /// Merge priority scores, indexed by token ID.
    pub scores: Vec<f32>,
    pub token_types: Vec<TokenType>,
    /// Reverse mapping from token string to token ID.
    pub token_to_id: HashMap<String, u32>,
    pub bos_id: u32,
    pub eos_id: u32,
    pub unk_id: Option<u32>,
    /// Whether `encode(.., add_special = true)` prepends BOS.
    pub add_bos: bool,
}

impl Vocab {
    /// Build a vocabulary from parallel token, score and type tables.
    pub fn new(
        tokens: Vec<String>,
        scores: Vec<f32>,
        token_types: Vec<TokenType>,
        bos_id: u32,
        eos_id: u32,
    ) -> Result<Vocab> {
        if tokens.len() != scores.len() || tokens.len() != token_types.len() {
            return Err(ModelError::TokenizerError(format!(
                "vocab tables disagree: {} tokens, {} scores, {} types",
                tokens.len(),
                scores.len(),
                token_types.len()
            )));
        }
        for id in [bos_id, eos_id] {
            if id as usize >= tokens.len() {
                return Err(ModelError::InvalidToken {
                    id,
                    vocab_size: tokens.len(),
                });
            }
        }

        let mut token_to_id = HashMap::with_capacity(tokens.len());
        for (id, tok) in tokens.iter().enumerate() {
            // First occurrence wins for duplicated strings.
            token_to_id.entry(tok.clone()).or_insert(id as u32);
        }
        let unk_id = token_types
            .iter()
            .position(|t| *t == TokenType::Unknown)
            .map(|i| i as u32);

        Ok(Vocab {
            tokens,
            scores,
            token_types,
            token_to_id,
            bos_id,
            eos_id,
            unk_id,
            add_bos: true,
        })
    }

    /// Build a vocabulary from GGUF metadata.
    ///
    /// Reads the following metadata keys:
    /// - `tokenizer.ggml.tokens` (string array of token strings)
    /// - `tokenizer.ggml.scores` (f32 array, optional)
    /// - `tokenizer.ggml.token_type` (i32 array, optional)
    /// - `tokenizer.ggml.bos_token_id`, `tokenizer.ggml.eos_token_id` (u32)
    /// - `tokenizer.ggml.unknown_token_id` (u32, optional)
    /// - `tokenizer.ggml.add_bos_token` (bool, default true)
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<Vocab> {
        let tokens = metadata.get_string_array("tokenizer.ggml.tokens")?;
        let n = tokens.len();

        let scores = optional(metadata.get_f32_array("tokenizer.ggml.scores"))?
            .unwrap_or_else(|| vec![0.0; n]);
        let token_types = optional(metadata.get_i32_array("tokenizer.ggml.token_type"))?
            .map(|types| types.into_iter().map(TokenType::from_gguf).collect())
            .unwrap_or_else(|| vec![TokenType::Normal; n]);

        let bos_id = metadata.get_u32("tokenizer.ggml.bos_token_id")?;
        let eos_id = metadata.get_u32("tokenizer.ggml.eos_token_id")?;

        let mut vocab = Vocab::new(tokens, scores, token_types, bos_id, eos_id)?;
        if let Some(unk) = optional(metadata.get_u32("tokenizer.ggml.unknown_token_id"))? {
            vocab.unk_id = Some(unk);
        }
        if let Some(add_bos) = optional(metadata.get_bool("tokenizer.ggml.add_bos_token"))? {
            vocab.add_bos = add_bos;
        }
        Ok(vocab)
    }

    /// Number of tokens in the vocabulary.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn token_type(&self, id: u32) -> Option<TokenType> {
        self.token_types.get(id as usize).copied()
    }

    /// Text of a token id, or `InvalidToken` if out of range.
    pub fn token_str(&self, id: u32) -> Result<&str> {
        self.tokens
            .get(id as usize)
            .map(String::as_str)
            .ok_or(ModelError::InvalidToken {
                id,
                vocab_size: self.tokens.len(),
            })
    }

    pub fn id_of(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }
}

/// Treat a missing metadata key as `None`.
fn optional<T>(r: Result<T>) -> Result<Option<T>> {
    match r {
        Ok(v) => Ok(Some(v)),
        Err(ModelError::MissingKey(_)) => Ok(None),
        Err(e) => Err(e),
    }
}
