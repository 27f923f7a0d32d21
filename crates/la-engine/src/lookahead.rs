use la_model::{CausalLm, ChatMessage, TokenBatch, TokenSequence, Tokenizer};
use la_sampler::{GreedySampler, SamplerChain, TopKSampler};
use la_tensor::{ComputeBackend, Shape, Tensor};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};
use crate::format::{decode_branches, decode_highlights, Highlight};
use crate::stepper::Stepper;
use crate::tokenization::{tokenize_continuation, tokenize_messages, tokenize_prefix, MarkerStrategy};

/// One of the K hypotheses: its generated token ids and their text.
#[derive(Debug, Clone, PartialEq)]
pub struct Branch {
    pub text: String,
    pub tokens: TokenSequence,
}

/// Result of a next-token lookahead.
#[derive(Debug, Clone)]
pub struct Predictions {
    /// Ordered as the top-K selection, most likely branch token first.
    pub branches: Vec<Branch>,
    /// Logits that picked each branch's follow-up token, `[k, vocab]`.
    pub logits: Tensor,
}

impl Predictions {
    pub fn texts(&self) -> Vec<String> {
        self.branches.iter().map(|b| b.text.clone()).collect()
    }
}

/// Branch-and-greedy-continue decoding over a resident model.
///
/// The engine borrows the model and tokenizer; every call builds its own
/// [`Stepper`] and cache, so nothing outlives a request.
pub struct LookaheadEngine<'a, M: CausalLm, T: Tokenizer + ?Sized> {
    model: &'a M,
    tokenizer: &'a T,
    backend: &'a dyn ComputeBackend,
    marker: &'a dyn MarkerStrategy,
    cancel: CancelToken,
}

impl<'a, M: CausalLm, T: Tokenizer + ?Sized> LookaheadEngine<'a, M, T> {
    pub fn new(
        model: &'a M,
        tokenizer: &'a T,
        backend: &'a dyn ComputeBackend,
        marker: &'a dyn MarkerStrategy,
    ) -> Self {
        LookaheadEngine {
            model,
            tokenizer,
            backend,
            marker,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    fn stepper(&self) -> Stepper<'a, M> {
        Stepper::new(self.model, self.backend, self.cancel.clone())
    }

    fn check_width(&self, k: usize) -> Result<()> {
        let vocab = self.model.vocab_size();
        if k == 0 || k > vocab {
            return Err(EngineError::InvalidArgument(format!(
                "branch width {} outside 1..={}",
                k, vocab
            )));
        }
        Ok(())
    }

    /// Rendered prompt followed by the document-in-progress tokens.
    fn document_ids(&self, document: &str, instruction: &str, continuation: &str) -> Result<TokenSequence> {
        let prefix = tokenize_prefix(self.tokenizer, instruction, document)?;
        let suffix = tokenize_continuation(self.tokenizer, continuation, self.marker)?;
        Ok(prefix.concat(&suffix))
    }

    /// Top-`k` token ids of the last position of `[1, n, vocab]` logits.
    fn branch_tokens(&self, logits: &Tensor, k: usize) -> Result<Vec<u32>> {
        let n = logits.shape().dim(1);
        let last = logits.vector_at(&[0, n - 1])?;
        let chain = SamplerChain::new().with(Box::new(TopKSampler::new(k)));
        let branch: Vec<u32> = chain.candidates(last).into_iter().map(|c| c.token_id).collect();
        if branch.len() != k {
            return Err(EngineError::ShapeAssertion {
                what: "branch tokens",
                expected: vec![k],
                got: vec![branch.len()],
            });
        }
        Ok(branch)
    }

    /// `k` independent hypotheses sharing the single forward pass over
    /// `prefix`, each advanced greedily `extra` more tokens.
    ///
    /// Returns the branch token sequences (`extra + 1` tokens each) and the
    /// logits of the last step, if any was taken.
    fn branch_and_continue(
        &self,
        prefix: &[u32],
        k: usize,
        extra: usize,
    ) -> Result<(Vec<Vec<u32>>, Option<Tensor>)> {
        let mut stepper = self.stepper();
        let logits = stepper.score_prefix(prefix)?;
        let branch = self.branch_tokens(&logits, k)?;
        debug!(prefix_len = prefix.len(), ?branch, "selected branch tokens");

        stepper.replicate(k)?;
        let mut sequences: Vec<Vec<u32>> = branch.iter().map(|&t| vec![t]).collect();
        let mut last = branch;
        let mut step_logits = None;
        for i in 0..extra {
            let next = stepper.advance_one_step(&last, prefix.len() + i)?;
            last = greedy_rows(&next)?;
            for (seq, &t) in sequences.iter_mut().zip(&last) {
                seq.push(t);
            }
            step_logits = Some(next);
        }
        stepper.finish();
        Ok((sequences, step_logits))
    }

    fn to_branches(&self, sequences: Vec<Vec<u32>>) -> Result<Vec<Branch>> {
        let tokens: Vec<TokenSequence> = sequences.into_iter().map(TokenSequence::new).collect();
        let texts = decode_branches(self.tokenizer, &tokens)?;
        Ok(texts
            .into_iter()
            .zip(tokens)
            .map(|(text, tokens)| Branch { text, tokens })
            .collect())
    }

    /// The `k` most likely next tokens after `continuation`, each followed
    /// by its greedy successor.
    pub fn next_token_predictions(
        &self,
        document: &str,
        instruction: &str,
        continuation: &str,
        k: usize,
    ) -> Result<Predictions> {
        self.check_width(k)?;
        let ids = self.document_ids(document, instruction, continuation)?;
        let (sequences, logits) = self.branch_and_continue(&ids, k, 1)?;
        let logits = logits.ok_or_else(|| EngineError::ShapeAssertion {
            what: "branch logits",
            expected: vec![k, self.model.vocab_size()],
            got: Vec::new(),
        })?;
        Ok(Predictions {
            branches: self.to_branches(sequences)?,
            logits,
        })
    }

    /// Same result as [`next_token_predictions`](Self::next_token_predictions)
    /// without the shared cache: every branch re-runs the whole prefix.
    pub fn next_token_predictions_uncached(
        &self,
        document: &str,
        instruction: &str,
        continuation: &str,
        k: usize,
    ) -> Result<Predictions> {
        self.check_width(k)?;
        let ids = self.document_ids(document, instruction, continuation)?;

        let mut stepper = self.stepper();
        let logits = stepper.score_prefix(&ids)?;
        let branch = self.branch_tokens(&logits, k)?;
        stepper.finish();

        let rows: Vec<Vec<u32>> = branch
            .iter()
            .map(|&t| {
                let mut row = ids.to_vec();
                row.push(t);
                row
            })
            .collect();
        let mut stepper = self.stepper();
        let full = stepper.score_batch(&TokenBatch::from_rows(&rows)?)?;
        stepper.finish();

        let vocab = self.model.vocab_size();
        let mut last = Vec::with_capacity(k * vocab);
        for b in 0..k {
            last.extend_from_slice(full.vector_at(&[b, ids.len()])?);
        }
        let logits = Tensor::from_vec(last, Shape::new(vec![k, vocab]))?;
        let follow = greedy_rows(&logits)?;

        let sequences = branch.into_iter().zip(follow).map(|(b, f)| vec![b, f]).collect();
        Ok(Predictions {
            branches: self.to_branches(sequences)?,
            logits,
        })
    }

    /// Continue a conversation along `k` branches of `n_future_tokens + 1`
    /// tokens: the branch token and its greedy continuation.
    pub fn continue_messages(
        &self,
        messages: &[ChatMessage],
        k: usize,
        n_future_tokens: usize,
    ) -> Result<Vec<Branch>> {
        self.check_width(k)?;
        let prefix = tokenize_messages(self.tokenizer, messages)?;
        let (sequences, _) = self.branch_and_continue(&prefix, k, n_future_tokens)?;
        self.to_branches(sequences)
    }

    /// Per-token loss and alternatives for the document region.
    ///
    /// `edited_document` is scored when given and not blank, `document`
    /// otherwise; the prompt is always built from `document`.
    pub fn highlights(
        &self,
        document: &str,
        instruction: &str,
        edited_document: Option<&str>,
        k: usize,
    ) -> Result<Vec<Highlight>> {
        self.check_width(k)?;
        let scored = match edited_document {
            Some(text) if !text.trim().is_empty() => text,
            _ => document,
        };
        let prefix = tokenize_prefix(self.tokenizer, instruction, document)?;
        let suffix = tokenize_continuation(self.tokenizer, scored, self.marker)?;
        let ids = prefix.concat(&suffix);

        let mut stepper = self.stepper();
        let logits = stepper.score_prefix(&ids)?;
        stepper.finish();
        decode_highlights(self.tokenizer, self.backend, &ids, prefix.len(), &logits, k)
    }
}

/// Arg-max of every row of `[k, vocab]` logits.
fn greedy_rows(logits: &Tensor) -> Result<Vec<u32>> {
    let k = logits.shape().dim(0);
    let greedy = SamplerChain::new().with(Box::new(GreedySampler::new()));
    (0..k)
        .map(|b| {
            let row = logits.vector_at(&[b])?;
            greedy.sample(row).ok_or(EngineError::ShapeAssertion {
                what: "greedy row",
                expected: vec![k, 1],
                got: vec![k, 0],
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ForwardCall, ScriptedModel, ScriptedTokenizer};
    use crate::tokenization::LeadingMarker;
    use la_tensor::CpuBackend;

    const CHAT: &str = "user:Rewrite.\n\nThe doc|gen";

    fn model() -> ScriptedModel {
        ScriptedModel::new(128)
            .after(12, &[(42, 2.0), (7, 1.0)])
            .after(42, &[(99, 1.0)])
            .after(7, &[(3, 1.0)])
            .after(99, &[(50, 1.0)])
            .after(3, &[(60, 1.0)])
    }

    fn tokenizer() -> ScriptedTokenizer {
        ScriptedTokenizer::new(128)
            .with_chat(CHAT, &[5, 9, 12])
            .with_chat("system:Be brief.|user:Hi|gen", &[5, 9, 12])
            .with_text("so", &[12])
    }

    #[test]
    fn test_two_branch_scenario() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let p = engine.next_token_predictions("The doc", "Rewrite.", "", 2).unwrap();

        assert_eq!(p.texts(), vec!["<42><99>".to_string(), "<7><3>".to_string()]);
        assert_eq!(p.branches[0].tokens.as_slice(), &[42, 99]);
        assert_eq!(p.logits.shape().dims(), &[2, 128]);
        assert_eq!(
            m.calls(),
            vec![
                ForwardCall { batch: 1, seq_len: 3, start_pos: 0 },
                ForwardCall { batch: 2, seq_len: 1, start_pos: 3 },
            ]
        );
    }

    #[test]
    fn test_step_uses_absolute_position() {
        // 42 only leads to 99 when it sits right after the 3-token prefix
        let m = ScriptedModel::new(128)
            .after(12, &[(42, 2.0), (7, 1.0)])
            .after(42, &[(11, 1.0)])
            .after_at(42, 3, &[(99, 1.0)]);
        let (t, b) = (tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let p = engine.next_token_predictions("The doc", "Rewrite.", "", 2).unwrap();
        assert_eq!(p.branches[0].tokens.as_slice(), &[42, 99]);
    }

    #[test]
    fn test_continuation_extends_prefix() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        engine.next_token_predictions("The doc", "Rewrite.", "so", 1).unwrap();
        let calls = m.calls();
        assert_eq!(calls[0].seq_len, 4);
        assert_eq!(calls[1].start_pos, 4);
    }

    #[test]
    fn test_uncached_matches_cached() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let fast = engine.next_token_predictions("The doc", "Rewrite.", "", 2).unwrap();
        let slow = engine
            .next_token_predictions_uncached("The doc", "Rewrite.", "", 2)
            .unwrap();
        assert_eq!(fast.branches, slow.branches);
        assert_eq!(fast.logits.data_f32(), slow.logits.data_f32());
        assert_eq!(
            m.calls()[3],
            ForwardCall { batch: 2, seq_len: 4, start_pos: 0 }
        );
    }

    #[test]
    fn test_continue_messages_fixed_width() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let messages = [ChatMessage::system("Be brief."), ChatMessage::user("Hi")];
        let branches = engine.continue_messages(&messages, 2, 2).unwrap();

        assert_eq!(branches.len(), 2);
        assert_eq!(branches[0].tokens.as_slice(), &[42, 99, 50]);
        assert_eq!(branches[1].tokens.as_slice(), &[7, 3, 60]);
        let starts: Vec<usize> = m.calls().iter().map(|c| c.start_pos).collect();
        assert_eq!(starts, vec![0, 3, 4]);
    }

    #[test]
    fn test_continue_without_future_tokens() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let branches = engine
            .continue_messages(&[ChatMessage::system("Be brief."), ChatMessage::user("Hi")], 2, 0)
            .unwrap();
        assert_eq!(branches[0].tokens.as_slice(), &[42]);
        assert_eq!(m.calls().len(), 1);
    }

    #[test]
    fn test_width_bounds() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        for k in [0, 129] {
            let err = engine.next_token_predictions("The doc", "Rewrite.", "", k).unwrap_err();
            assert!(matches!(err, EngineError::InvalidArgument(_)));
        }
        let p = engine.next_token_predictions("The doc", "Rewrite.", "", 128).unwrap();
        assert_eq!(p.branches.len(), 128);
        assert!(p.branches.iter().all(|b| b.tokens.len() == 2));
        assert_eq!(m.calls().len(), 2);
    }

    #[test]
    fn test_template_error_surfaces() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let err = engine.next_token_predictions("Other", "Rewrite.", "", 2).unwrap_err();
        assert!(matches!(err, EngineError::Template(_)));
        assert!(m.calls().is_empty());
    }

    #[test]
    fn test_cancelled_request_runs_nothing() {
        let (m, t, b) = (model(), tokenizer(), CpuBackend::new());
        let cancel = CancelToken::new();
        cancel.cancel();
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst).with_cancel(cancel);
        let err = engine
            .continue_messages(&[ChatMessage::system("Be brief."), ChatMessage::user("Hi")], 2, 3)
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
        assert!(m.calls().is_empty());
    }

    #[test]
    fn test_highlights_blank_edit_falls_back() {
        let t = tokenizer().with_text("The doc", &[20, 21]).with_piece(20, "The").with_piece(21, " doc");
        let (m, b) = (model(), CpuBackend::new());
        let engine = LookaheadEngine::new(&m, &t, &b, &LeadingMarker::StripFirst);
        let h = engine.highlights("The doc", "Rewrite.", Some("  "), 2).unwrap();
        assert_eq!(h.len(), 2);
        assert_eq!(h[0].token, "The");
        assert_eq!((h[1].start, h[1].end), (3, 7));
        assert_eq!(m.calls(), vec![ForwardCall { batch: 1, seq_len: 5, start_pos: 0 }]);
        // after 12 the model prefers 42
        assert_eq!(h[0].topk_tokens, vec!["<42>".to_string(), "<7>".to_string()]);
    }
}
