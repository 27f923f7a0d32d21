use la_model::{ChatMessage, TokenSequence, Tokenizer};
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Removes the marker a tokenizer puts in front of freshly encoded text, so
/// the remainder can be appended directly after a rendered prompt.
pub trait MarkerStrategy: Send + Sync {
    fn strip_leading_marker(&self, seq: TokenSequence) -> TokenSequence;
}

/// Built-in marker strategies, selectable from config.
///
/// ```toml
/// leading_marker = "strip_first"
/// # or
/// leading_marker = { strip_if_present = 2 }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LeadingMarker {
    /// Drop exactly the first token, whatever it is.
    #[default]
    StripFirst,
    /// Drop the first token only if it is this id (e.g. the BOS id).
    StripIfPresent(u32),
    /// Keep every token; for tokenizers that add no marker.
    Keep,
}

impl MarkerStrategy for LeadingMarker {
    fn strip_leading_marker(&self, seq: TokenSequence) -> TokenSequence {
        match *self {
            LeadingMarker::StripFirst => seq.skip(1),
            LeadingMarker::StripIfPresent(id) if seq.first() == Some(&id) => seq.skip(1),
            LeadingMarker::StripIfPresent(_) | LeadingMarker::Keep => seq,
        }
    }
}

/// Token ids for a rendered conversation, ending with the generation prompt.
pub fn tokenize_messages<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    messages: &[ChatMessage],
) -> Result<TokenSequence> {
    Ok(tokenizer.apply_chat_template(messages, true)?)
}

/// The prompt every document request is scored against: one user turn of
/// `"{instruction}\n\n{document}"` followed by the generation prompt.
pub fn tokenize_prefix<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    instruction: &str,
    document: &str,
) -> Result<TokenSequence> {
    let message = ChatMessage::user(format!("{}\n\n{}", instruction, document));
    tokenize_messages(tokenizer, &[message])
}

/// Token ids for text that continues an already tokenized prefix.
///
/// Empty text yields an empty sequence without consulting the tokenizer.
pub fn tokenize_continuation<T: Tokenizer + ?Sized>(
    tokenizer: &T,
    text: &str,
    marker: &dyn MarkerStrategy,
) -> Result<TokenSequence> {
    if text.is_empty() {
        return Ok(TokenSequence::empty());
    }
    let encoded = tokenizer.encode(text, true)?;
    Ok(marker.strip_leading_marker(encoded))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::EngineError;
    use crate::testing::ScriptedTokenizer;

    fn tokenizer() -> ScriptedTokenizer {
        ScriptedTokenizer::new(64)
            .with_text("hello", &[20, 21])
            .with_chat("user:Rewrite.\n\nhello|gen", &[3, 5, 20, 21, 4])
    }

    #[test]
    fn test_prefix_renders_single_user_turn() {
        let t = tokenizer();
        let prefix = tokenize_prefix(&t, "Rewrite.", "hello").unwrap();
        assert_eq!(prefix.as_slice(), &[3, 5, 20, 21, 4]);
    }

    #[test]
    fn test_prefix_template_failure() {
        let t = tokenizer();
        let err = tokenize_prefix(&t, "Other.", "hello").unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
    }

    #[test]
    fn test_continuation_strips_first_token() {
        let t = tokenizer();
        let seq = tokenize_continuation(&t, "hello", &LeadingMarker::StripFirst).unwrap();
        // the scripted tokenizer prepends BOS = 1
        assert_eq!(seq.as_slice(), &[20, 21]);
    }

    #[test]
    fn test_empty_continuation_skips_tokenizer() {
        let t = ScriptedTokenizer::new(8);
        // "" has no scripted encoding, so reaching the tokenizer would fail
        let seq = tokenize_continuation(&t, "", &LeadingMarker::StripFirst).unwrap();
        assert!(seq.is_empty());
    }

    #[test]
    fn test_marker_strategies() {
        let seq = TokenSequence::new(vec![1, 7, 8]);
        assert_eq!(
            LeadingMarker::StripIfPresent(1).strip_leading_marker(seq.clone()).as_slice(),
            &[7, 8]
        );
        assert_eq!(
            LeadingMarker::StripIfPresent(2).strip_leading_marker(seq.clone()).as_slice(),
            &[1, 7, 8]
        );
        assert_eq!(LeadingMarker::Keep.strip_leading_marker(seq.clone()), seq);
        assert!(LeadingMarker::StripFirst
            .strip_leading_marker(TokenSequence::empty())
            .is_empty());
    }

    #[test]
    fn test_marker_config_forms() {
        #[derive(Deserialize)]
        struct Holder {
            leading_marker: LeadingMarker,
        }
        let h: Holder = toml::from_str("leading_marker = \"keep\"").unwrap();
        assert_eq!(h.leading_marker, LeadingMarker::Keep);
        let h: Holder = toml::from_str("leading_marker = { strip_if_present = 2 }").unwrap();
        assert_eq!(h.leading_marker, LeadingMarker::StripIfPresent(2));
    }
}
