//! Scripted model and tokenizer doubles.
//!
//! `ScriptedModel` produces logits from lookup rules keyed by the token at
//! each position, so branch selection and greedy follow-ups can be pinned
//! exactly. `ScriptedTokenizer` maps scripted texts to ids and decodes every
//! id to a recognisable piece.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use la_model::{
    CausalLm, ChatMessage, InferenceCache, ModelError, TokenBatch, TokenSequence, Tokenizer,
};
use la_tensor::{ComputeBackend, Shape, Tensor};

/// Beginning-of-sequence id used by [`ScriptedTokenizer`].
pub const SCRIPTED_BOS: u32 = 1;

/// One recorded [`ScriptedModel::forward`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardCall {
    pub batch: usize,
    pub seq_len: usize,
    pub start_pos: usize,
}

/// Token history per batch row.
#[derive(Debug, Clone, Default)]
pub struct ScriptedCache {
    rows: Vec<Vec<u32>>,
}

impl ScriptedCache {
    pub fn rows(&self) -> &[Vec<u32>] {
        &self.rows
    }
}

impl InferenceCache for ScriptedCache {
    fn batch_size(&self) -> usize {
        self.rows.len()
    }

    fn seq_len(&self) -> usize {
        self.rows.first().map(Vec::len).unwrap_or(0)
    }

    fn reorder(&self, indices: &[usize]) -> la_model::Result<Self> {
        let batch = self.rows.len();
        let rows = indices
            .iter()
            .map(|&i| {
                self.rows
                    .get(i)
                    .cloned()
                    .ok_or(ModelError::ReorderIndex { index: i, batch })
            })
            .collect::<la_model::Result<Vec<_>>>()?;
        Ok(ScriptedCache { rows })
    }
}

/// A causal "model" whose logits are looked up, not computed.
///
/// The logits after a token are all zero except for the entries scripted
/// for that token. A rule bound to an absolute position wins over a
/// position-independent one.
#[derive(Debug, Default)]
pub struct ScriptedModel {
    vocab_size: usize,
    rules: HashMap<u32, Vec<(u32, f32)>>,
    position_rules: HashMap<(u32, usize), Vec<(u32, f32)>>,
    output_width: Option<usize>,
    calls: Mutex<Vec<ForwardCall>>,
}

impl ScriptedModel {
    pub fn new(vocab_size: usize) -> Self {
        ScriptedModel {
            vocab_size,
            ..Default::default()
        }
    }

    /// After `token`, give each `(id, logit)` pair its logit.
    pub fn after(mut self, token: u32, logits: &[(u32, f32)]) -> Self {
        self.rules.insert(token, logits.to_vec());
        self
    }

    /// Like [`after`](Self::after), but only when `token` sits at `position`.
    pub fn after_at(mut self, token: u32, position: usize, logits: &[(u32, f32)]) -> Self {
        self.position_rules.insert((token, position), logits.to_vec());
        self
    }

    /// Emit logits of the wrong width, to exercise shape checks.
    pub fn with_output_width(mut self, width: usize) -> Self {
        self.output_width = Some(width);
        self
    }

    pub fn calls(&self) -> Vec<ForwardCall> {
        match self.calls.lock() {
            Ok(calls) => calls.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn logits_after(&self, token: u32, position: usize, width: usize) -> Vec<f32> {
        let mut row = vec![0.0; width];
        let rule = self
            .position_rules
            .get(&(token, position))
            .or_else(|| self.rules.get(&token));
        for &(id, logit) in rule.into_iter().flatten() {
            if let Some(slot) = row.get_mut(id as usize) {
                *slot = logit;
            }
        }
        row
    }
}

impl CausalLm for ScriptedModel {
    type Cache = ScriptedCache;

    fn new_cache(&self, batch_size: usize) -> ScriptedCache {
        ScriptedCache {
            rows: vec![Vec::new(); batch_size],
        }
    }

    fn forward(
        &self,
        tokens: &TokenBatch,
        start_pos: usize,
        cache: &mut ScriptedCache,
        _backend: &dyn ComputeBackend,
    ) -> la_model::Result<Tensor> {
        if tokens.is_empty() {
            return Err(ModelError::EmptyBatch);
        }
        if cache.batch_size() != tokens.batch_size() {
            return Err(ModelError::BatchMismatch {
                cache: cache.batch_size(),
                batch: tokens.batch_size(),
            });
        }
        match self.calls.lock() {
            Ok(mut calls) => calls.push(ForwardCall {
                batch: tokens.batch_size(),
                seq_len: tokens.seq_len(),
                start_pos,
            }),
            Err(poisoned) => poisoned.into_inner().push(ForwardCall {
                batch: tokens.batch_size(),
                seq_len: tokens.seq_len(),
                start_pos,
            }),
        }

        let width = self.output_width.unwrap_or(self.vocab_size);
        let mut data = Vec::with_capacity(tokens.ids().len() * width);
        for b in 0..tokens.batch_size() {
            for (t, &id) in tokens.row(b).iter().enumerate() {
                data.extend(self.logits_after(id, start_pos + t, width));
            }
            cache.rows[b].extend_from_slice(tokens.row(b));
        }
        Ok(Tensor::from_vec(
            data,
            Shape::new(vec![tokens.batch_size(), tokens.seq_len(), width]),
        )?)
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}

/// A tokenizer driven by lookup tables.
///
/// - `encode` knows only texts registered with [`with_text`](Self::with_text)
///   and prepends [`SCRIPTED_BOS`] when asked for special tokens.
/// - `apply_chat_template` renders messages to `role:content` lines joined
///   by `|` (plus `|gen` for the generation prompt) and looks the key up in
///   the [`with_chat`](Self::with_chat) table; unknown keys are template
///   errors.
/// - `decode` writes each id as its registered piece or `<id>`.
#[derive(Debug)]
pub struct ScriptedTokenizer {
    vocab_size: usize,
    texts: HashMap<String, Vec<u32>>,
    chats: HashMap<String, Vec<u32>>,
    pieces: HashMap<u32, String>,
    special: HashSet<u32>,
}

impl ScriptedTokenizer {
    pub fn new(vocab_size: usize) -> Self {
        ScriptedTokenizer {
            vocab_size,
            texts: HashMap::new(),
            chats: HashMap::new(),
            pieces: HashMap::new(),
            special: HashSet::from([SCRIPTED_BOS]),
        }
    }

    pub fn with_text(mut self, text: &str, ids: &[u32]) -> Self {
        self.texts.insert(text.to_string(), ids.to_vec());
        self
    }

    pub fn with_chat(mut self, key: &str, ids: &[u32]) -> Self {
        self.chats.insert(key.to_string(), ids.to_vec());
        self
    }

    pub fn with_piece(mut self, id: u32, piece: &str) -> Self {
        self.pieces.insert(id, piece.to_string());
        self
    }

    pub fn with_special(mut self, id: u32) -> Self {
        self.special.insert(id);
        self
    }

    /// The lookup key `apply_chat_template` uses for `messages`.
    pub fn chat_key(messages: &[ChatMessage], add_generation_prompt: bool) -> String {
        let mut key = messages
            .iter()
            .map(|m| format!("{}:{}", m.role, m.content))
            .collect::<Vec<_>>()
            .join("|");
        if add_generation_prompt {
            key.push_str("|gen");
        }
        key
    }
}

impl Tokenizer for ScriptedTokenizer {
    fn encode(&self, text: &str, add_special: bool) -> la_model::Result<TokenSequence> {
        let ids = self
            .texts
            .get(text)
            .ok_or_else(|| ModelError::TokenizerError(format!("unscripted text {:?}", text)))?;
        let mut out = Vec::with_capacity(ids.len() + 1);
        if add_special {
            out.push(SCRIPTED_BOS);
        }
        out.extend_from_slice(ids);
        Ok(TokenSequence::new(out))
    }

    fn decode(&self, ids: &[u32], skip_special: bool) -> la_model::Result<String> {
        let mut out = String::new();
        for &id in ids {
            if id as usize >= self.vocab_size {
                return Err(ModelError::InvalidToken {
                    id,
                    vocab_size: self.vocab_size,
                });
            }
            if skip_special && self.special.contains(&id) {
                continue;
            }
            match self.pieces.get(&id) {
                Some(piece) => out.push_str(piece),
                None => out.push_str(&format!("<{}>", id)),
            }
        }
        Ok(out)
    }

    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> la_model::Result<TokenSequence> {
        let key = Self::chat_key(messages, add_generation_prompt);
        self.chats
            .get(&key)
            .map(|ids| TokenSequence::from(ids.as_slice()))
            .ok_or_else(|| ModelError::Template(format!("no scripted rendering for {:?}", key)))
    }

    fn vocab_size(&self) -> usize {
        self.vocab_size
    }
}
