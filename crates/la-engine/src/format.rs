use la_model::{TokenSequence, Tokenizer};
use la_sampler::top_k_ids;
use la_tensor::{ComputeBackend, Tensor};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Per-token scoring of one document token.
///
/// `start`/`end` are character offsets into the text rebuilt by
/// concatenating the `token` strings in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Highlight {
    pub start: usize,
    pub end: usize,
    pub token: String,
    /// `-ln p(token)` under the model's prediction one position earlier.
    pub token_loss: f32,
    pub most_likely_token: String,
    pub topk_tokens: Vec<String>,
}

/// Score every token of `ids[prefix_len..]` against `logits`
/// (`[1, ids.len(), vocab]`, from a single forward pass over `ids`).
///
/// Each token's text is what it adds to the decoded region, so a character
/// spread over several byte pieces lands on the token that completes it and
/// the space marker the tokenizer prepends is dropped once. The token text
/// keeps special tokens so offsets cover everything the model saw; the
/// alternatives are decoded with special tokens skipped.
pub fn decode_highlights<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    backend: &dyn ComputeBackend,
    ids: &[u32],
    prefix_len: usize,
    logits: &Tensor,
    k: usize,
) -> Result<Vec<Highlight>> {
    if prefix_len == 0 || prefix_len > ids.len() {
        return Err(EngineError::InvalidArgument(format!(
            "prefix length {} out of range for {} tokens",
            prefix_len,
            ids.len()
        )));
    }
    let dims = logits.shape().dims();
    if dims.len() != 3 || dims[0] != 1 || dims[1] != ids.len() {
        return Err(EngineError::ShapeAssertion {
            what: "highlight logits",
            expected: vec![1, ids.len(), tokenizer.vocab_size()],
            got: dims.to_vec(),
        });
    }
    let vocab = dims[2];

    let region = &ids[prefix_len..];
    let strip_prefix_space = tokenizer.adds_space_prefix();
    let decode_region = |end: usize| -> Result<String> {
        let text = tokenizer.decode(&region[..end], false)?;
        Ok(match text.strip_prefix(' ') {
            Some(rest) if strip_prefix_space => rest.to_string(),
            _ => text,
        })
    };

    let mut highlights = Vec::with_capacity(region.len());
    let mut emitted = String::new();
    let mut offset = 0;
    for idx in prefix_len..ids.len() {
        let token_id = ids[idx];
        if token_id as usize >= vocab {
            return Err(EngineError::InvalidArgument(format!(
                "token {} outside vocabulary of {}",
                token_id, vocab
            )));
        }
        let row = logits.vector_at(&[0, idx - 1])?;
        let probs = backend.softmax(row, vocab)?;
        let token_loss = -probs[token_id as usize].ln();

        let end = idx + 1 - prefix_len;
        let text = decode_region(end)?;
        // an unfinished multi-byte character waits for the token completing it
        let token = if text.ends_with(char::REPLACEMENT_CHARACTER) && end < region.len() {
            String::new()
        } else {
            match text.strip_prefix(emitted.as_str()) {
                Some(added) => added.to_string(),
                None => tokenizer.decode(&[token_id], false)?,
            }
        };
        emitted.push_str(&token);
        let alternatives: Vec<TokenSequence> = top_k_ids(row, k)
            .into_iter()
            .map(|id| TokenSequence::new(vec![id]))
            .collect();
        let topk_tokens = tokenizer.batch_decode(&alternatives, true)?;
        let most_likely_token = topk_tokens.first().cloned().unwrap_or_default();

        let len = token.chars().count();
        highlights.push(Highlight {
            start: offset,
            end: offset + len,
            token,
            token_loss,
            most_likely_token,
            topk_tokens,
        });
        offset += len;
    }
    Ok(highlights)
}

/// Decode each branch with special tokens skipped.
pub fn decode_branches<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    branches: &[TokenSequence],
) -> Result<Vec<String>> {
    Ok(tokenizer.batch_decode(branches, true)?)
}
