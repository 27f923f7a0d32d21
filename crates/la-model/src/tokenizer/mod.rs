pub mod bpe;
pub mod chat;
pub mod vocab;

pub use bpe::BpeTokenizer;
pub use chat::{ChatMessage, ChatTemplate, CHATML_TEMPLATE};
pub use vocab::{TokenType, Vocab};

use crate::error::Result;
use crate::tokens::TokenSequence;

/// Text <-> token id conversion plus chat formatting for one model.
pub trait Tokenizer: Send + Sync {
    /// Encode `text`. `add_special` adds the model's leading special tokens
    /// (BOS for most vocabularies).
    fn encode(&self, text: &str, add_special: bool) -> Result<TokenSequence>;

    /// Decode ids to text, dropping special tokens when `skip_special` is set.
    fn decode(&self, ids: &[u32], skip_special: bool) -> Result<String>;

    fn batch_decode(&self, sequences: &[TokenSequence], skip_special: bool) -> Result<Vec<String>> {
        sequences
            .iter()
            .map(|seq| self.decode(seq, skip_special))
            .collect()
    }

    /// Render `messages` with the model's chat template and encode the result.
    fn apply_chat_template(
        &self,
        messages: &[ChatMessage],
        add_generation_prompt: bool,
    ) -> Result<TokenSequence>;

    fn vocab_size(&self) -> usize;

    /// Whether `encode` puts a space marker in front of text that starts
    /// with ordinary characters. Decoding such text yields one extra leading
    /// space.
    fn adds_space_prefix(&self) -> bool {
        false
    }
}
