use std::collections::HashMap;

use tracing::debug;

use super::chat::{ChatMessage, ChatTemplate};
use super::vocab::{TokenType, Vocab};
use super::Tokenizer;
use crate::error::{ModelError, Result};
use crate::gguf::metadata::GgufMetadata;
use crate::tokens::TokenSequence;

/// SentencePiece word-boundary marker, standing in for a space.
pub const SPACE_MARKER: char = '\u{2581}';

/// Byte-Pair Encoding tokenizer in the SentencePiece convention.
///
/// Spaces are written as `▁`, characters missing from the vocabulary fall
/// back to `<0xHH>` byte tokens, and control/user-defined tokens such as
/// `<start_of_turn>` are matched verbatim before any merging happens.
#[derive(Debug)]
pub struct BpeTokenizer {
    /// The token vocabulary (strings, scores, types, special token IDs).
    pub vocab: Vocab,
    /// Map from merge pair to priority rank (lower rank = higher priority).
    /// Empty for score-driven vocabularies.
    merge_ranks: HashMap<(String, String), usize>,
    /// Literal tokens, longest first.
    literals: Vec<(String, u32)>,
    /// Prepend `▁` to text that does not start with a literal token.
    add_space_prefix: bool,
    template: ChatTemplate,
}

impl BpeTokenizer {
    /// Build a tokenizer from a vocabulary and ordered merge rules.
    ///
    /// With no merges, adjacent pieces are merged greedily by the vocabulary
    /// score of their concatenation. Without a template, ChatML is used.
    pub fn new(
        vocab: Vocab,
        merges: Vec<(String, String)>,
        template: Option<ChatTemplate>,
    ) -> Result<BpeTokenizer> {
        let merge_ranks = merges
            .into_iter()
            .enumerate()
            .map(|(rank, pair)| (pair, rank))
            .collect();

        let mut literals: Vec<(String, u32)> = vocab
            .tokens
            .iter()
            .zip(&vocab.token_types)
            .enumerate()
            .filter(|(_, (tok, ty))| ty.is_literal() && !tok.is_empty())
            .map(|(id, (tok, _))| (tok.clone(), id as u32))
            .collect();
        literals.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then(a.1.cmp(&b.1)));

        let template = match template {
            Some(t) => t,
            None => ChatTemplate::chatml(
                vocab.token_str(vocab.bos_id)?,
                vocab.token_str(vocab.eos_id)?,
            )?,
        };

        Ok(BpeTokenizer {
            vocab,
            merge_ranks,
            literals,
            add_space_prefix: true,
            template,
        })
    }

    pub fn with_space_prefix(mut self, add_space_prefix: bool) -> Self {
        self.add_space_prefix = add_space_prefix;
        self
    }

    /// Load a tokenizer from GGUF metadata.
    ///
    /// Reads the vocabulary via `Vocab::from_gguf`, merge rules from
    /// `tokenizer.ggml.merges` ("token1 token2" entries), the chat template
    /// from `tokenizer.chat_template` and the space-prefix flag from
    /// `tokenizer.ggml.add_space_prefix`.
    pub fn from_gguf(metadata: &GgufMetadata) -> Result<BpeTokenizer> {
        if let Some(model) = metadata.get_string_opt("tokenizer.ggml.model")? {
            if model == "gpt2" {
                return Err(ModelError::TokenizerError(
                    "byte-level BPE vocabularies are not supported".to_string(),
                ));
            }
        }
        let vocab = Vocab::from_gguf(metadata)?;

        let merge_strings = match metadata.get_string_array("tokenizer.ggml.merges") {
            Ok(m) => m,
            Err(ModelError::MissingKey(_)) => Vec::new(),
            Err(e) => return Err(e),
        };
        let mut merges = Vec::with_capacity(merge_strings.len());
        for entry in &merge_strings {
            match entry.split_once(' ') {
                Some((a, b)) => merges.push((a.to_string(), b.to_string())),
                None => {
                    return Err(ModelError::TokenizerError(format!(
                        "invalid merge entry: {:?}",
                        entry
                    )))
                }
            }
        }

        let template = match metadata.get_string_opt("tokenizer.chat_template")? {
            Some(source) => Some(ChatTemplate::new(
                source,
                vocab.token_str(vocab.bos_id)?,
                vocab.token_str(vocab.eos_id)?,
            )?),
            None => None,
        };
        let add_space_prefix = match metadata.get_bool("tokenizer.ggml.add_space_prefix") {
            Ok(v) => v,
            Err(ModelError::MissingKey(_)) => true,
            Err(e) => return Err(e),
        };

        debug!(
            n_vocab = vocab.len(),
            n_merges = merges.len(),
            has_template = template.is_some(),
            "loaded tokenizer"
        );
        Ok(BpeTokenizer::new(vocab, merges, template)?.with_space_prefix(add_space_prefix))
    }

    /// Returns the beginning-of-sequence token ID.
    pub fn bos_id(&self) -> u32 {
        self.vocab.bos_id
    }

    /// Returns the end-of-sequence token ID.
    pub fn eos_id(&self) -> u32 {
        self.vocab.eos_id
    }

    fn match_literal(&self, text: &str) -> Option<(usize, u32)> {
        self.literals
            .iter()
            .find(|(lit, _)| text.starts_with(lit.as_str()))
            .map(|(lit, id)| (lit.len(), *id))
    }

    /// Split `text` into plain-text runs and literal token ids.
    fn split_literals<'t>(&self, text: &'t str) -> Vec<Segment<'t>> {
        let mut segments = Vec::new();
        let mut plain_start = 0;
        let mut pos = 0;
        while pos < text.len() {
            if let Some((len, id)) = self.match_literal(&text[pos..]) {
                if plain_start < pos {
                    segments.push(Segment::Plain(&text[plain_start..pos], plain_start));
                }
                segments.push(Segment::Literal(id));
                pos += len;
                plain_start = pos;
            } else {
                // Advance by one whole character.
                pos += text[pos..].chars().next().map(char::len_utf8).unwrap_or(1);
            }
        }
        if plain_start < text.len() {
            segments.push(Segment::Plain(&text[plain_start..], plain_start));
        }
        segments
    }

    /// Priority of merging `a` and `b`; higher merges first.
    fn merge_priority(&self, a: &str, b: &str) -> Option<f32> {
        if self.merge_ranks.is_empty() {
            let merged = format!("{}{}", a, b);
            let id = self.vocab.id_of(&merged)?;
            Some(self.vocab.scores[id as usize])
        } else {
            self.merge_ranks
                .get(&(a.to_string(), b.to_string()))
                .map(|&rank| -(rank as f32))
        }
    }

    /// Encode one run of ordinary text.
    ///
    /// 1. Spaces become `▁`.
    /// 2. Each character maps to its vocabulary piece, or to `<0xHH>` byte
    ///    pieces when the character itself is missing.
    /// 3. The highest-priority adjacent pair is merged until none applies.
    fn encode_plain(&self, text: &str, at_start: bool, out: &mut Vec<u32>) -> Result<()> {
        let mut normalized = String::with_capacity(text.len() + 3);
        if at_start && self.add_space_prefix {
            normalized.push(SPACE_MARKER);
        }
        normalized.extend(text.chars().map(|c| if c == ' ' { SPACE_MARKER } else { c }));

        let mut pieces: Vec<String> = Vec::with_capacity(normalized.len());
        let mut buf = [0u8; 4];
        for c in normalized.chars() {
            let s = c.encode_utf8(&mut buf);
            if self.vocab.id_of(s).is_some() {
                pieces.push(s.to_string());
            } else {
                for byte in s.bytes() {
                    pieces.push(format!("<0x{:02X}>", byte));
                }
            }
        }

        while pieces.len() >= 2 {
            let best = (0..pieces.len() - 1)
                .filter_map(|i| self.merge_priority(&pieces[i], &pieces[i + 1]).map(|p| (i, p)))
                .fold(None, |best: Option<(usize, f32)>, (i, p)| match best {
                    Some((_, bp)) if bp >= p => best,
                    _ => Some((i, p)),
                });
            let Some((i, _)) = best else { break };
            let right = pieces.remove(i + 1);
            pieces[i].push_str(&right);
        }

        for piece in &pieces {
            match self.vocab.id_of(piece).or(self.vocab.unk_id) {
                Some(id) => out.push(id),
                None => {
                    return Err(ModelError::TokenizerError(format!(
                        "no token for {:?} and the vocabulary has no unknown token",
                        piece
                    )))
                }
            }
        }
        Ok(())
    }
}

enum Segment<'t> {
    /// Ordinary text and its byte offset in the input.
    Plain(&'t str, usize),
    Literal(u32),
}

/// Parse a `<0xHH>` byte-fallback piece.
fn byte_piece(tok: &str) -> Option<u8> {
    let hex = tok.strip_prefix("<0x")?.strip_suffix('>')?;
    if hex.len() != 2 {
        return None;
    }
    u8::from_str_radix(hex, 16).ok()
}

impl Tokenizer for BpeTokenizer {
    /// Encode text into token ids. With `add_special`, BOS is prepended when
    /// the vocabulary asks for it.
    fn encode(&self, text: &str, add_special: bool) -> Result<TokenSequence> {
        let mut ids = Vec::new();
        if add_special && self.vocab.add_bos {
            ids.push(self.vocab.bos_id);
        }
        for segment in self.split_literals(text) {
            match segment {
                Segment::Literal(id) => ids.push(id),
                Segment::Plain(run, offset) => self.encode_plain(run, offset == 0, &mut ids)?,
            }
        }
        Ok(TokenSequence::new(ids))
    }

    /// Decode ids back to text. `▁` becomes a space and byte pieces are
    /// reassembled; invalid UTF-8 is replaced.
    fn decode(&self, ids: &[u32], skip_special: bool) -> Result<String> {
        let mut bytes: Vec<u8> = Vec::new();
        for &id in ids {
            let tok = self.vocab.token_str(id)?;
            let ty = self.vocab.token_type(id).unwrap_or(TokenType::Normal);
            if skip_special && ty.is_special() {
                continue;
            }
            if let Some(b) = byte_piece(tok) {
                bytes.push(b);
                continue;
            }
            let mut buf = [0u8; 4];
            for c in tok.chars() {
                let c = if c == SPACE_MARKER { ' ' } else { c };
                bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            }
        }
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<TokenSequence> {
        let text = self.template.render(messages, add_generation_prompt)?;
        // Templates emit their own BOS.
        self.encode(&text, false)
    }

    fn vocab_size(&self) -> usize {
        self.vocab.len()
    }

    fn adds_space_prefix(&self) -> bool {
        self.add_space_prefix
    }
}
