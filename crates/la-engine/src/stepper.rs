use std::fmt;

use la_model::{CausalLm, InferenceCache, TokenBatch};
use la_tensor::{ComputeBackend, Shape, Tensor};
use tracing::{debug, trace};

use crate::cancel::CancelToken;
use crate::error::{EngineError, Result};

/// Where a branching decode currently stands.
///
/// `Init -> PrefixScored -> Branched -> Advancing* -> Done`; nothing returns
/// to `PrefixScored`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeState {
    Init,
    PrefixScored,
    Branched,
    Advancing,
    Done,
}

impl DecodeState {
    fn name(&self) -> &'static str {
        match self {
            DecodeState::Init => "init",
            DecodeState::PrefixScored => "prefix_scored",
            DecodeState::Branched => "branched",
            DecodeState::Advancing => "advancing",
            DecodeState::Done => "done",
        }
    }
}

impl fmt::Display for DecodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Drives one request's forward passes against a request-scoped cache.
///
/// The cache is created when the prefix is scored and dropped by
/// [`finish`](Self::finish) (or with the stepper). Every forward pass checks
/// the cancel token first and the output shape after.
pub struct Stepper<'a, M: CausalLm> {
    model: &'a M,
    backend: &'a dyn ComputeBackend,
    cancel: CancelToken,
    cache: Option<M::Cache>,
    prefix_len: usize,
    state: DecodeState,
}

impl<'a, M: CausalLm> Stepper<'a, M> {
    pub fn new(model: &'a M, backend: &'a dyn ComputeBackend, cancel: CancelToken) -> Self {
        Stepper {
            model,
            backend,
            cancel,
            cache: None,
            prefix_len: 0,
            state: DecodeState::Init,
        }
    }

    pub fn state(&self) -> DecodeState {
        self.state
    }

    /// Length of the scored prefix; the absolute position of the first
    /// branch token.
    pub fn prefix_len(&self) -> usize {
        self.prefix_len
    }

    pub fn cache(&self) -> Option<&M::Cache> {
        self.cache.as_ref()
    }

    fn transition(&mut self, allowed: &[DecodeState], op: &'static str, to: DecodeState) -> Result<()> {
        if !allowed.contains(&self.state) {
            return Err(EngineError::InvalidTransition {
                from: self.state.name(),
                op,
            });
        }
        trace!(from = %self.state, to = %to, op, "decode transition");
        self.state = to;
        Ok(())
    }

    /// Raw forward pass: `tokens` is `[batch, seq_len]`, every row starting at
    /// absolute position `start_pos`. Returns `[batch, seq_len, vocab]`.
    pub fn forward(&mut self, tokens: &TokenBatch, start_pos: usize) -> Result<Tensor> {
        self.cancel.check()?;
        let cache = self.cache.as_mut().ok_or(EngineError::InvalidTransition {
            from: self.state.name(),
            op: "forward",
        })?;
        let logits = self.model.forward(tokens, start_pos, cache, self.backend)?;

        let expected = vec![tokens.batch_size(), tokens.seq_len(), self.model.vocab_size()];
        if logits.shape().dims() != expected.as_slice() {
            return Err(EngineError::ShapeAssertion {
                what: "forward logits",
                expected,
                got: logits.shape().dims().to_vec(),
            });
        }
        debug!(
            batch = tokens.batch_size(),
            seq_len = tokens.seq_len(),
            start_pos,
            cached = cache.seq_len(),
            "forward pass"
        );
        Ok(logits)
    }

    /// Process the whole prefix once on a fresh single-row cache and return
    /// its logits, `[1, prefix.len(), vocab]`.
    pub fn score_prefix(&mut self, prefix: &[u32]) -> Result<Tensor> {
        self.score_batch(&TokenBatch::single(prefix))
    }

    /// Like [`score_prefix`](Self::score_prefix) for several full sequences
    /// of equal length at once, `[batch, seq_len, vocab]`.
    pub fn score_batch(&mut self, batch: &TokenBatch) -> Result<Tensor> {
        if batch.is_empty() {
            return Err(EngineError::InvalidArgument(
                "cannot score an empty prefix".to_string(),
            ));
        }
        self.transition(&[DecodeState::Init], "score_prefix", DecodeState::PrefixScored)?;
        self.cache = Some(self.model.new_cache(batch.batch_size()));
        self.prefix_len = batch.seq_len();
        self.forward(batch, 0)
    }

    /// Fan the scored prefix out to `k` identical branch rows.
    pub fn replicate(&mut self, k: usize) -> Result<()> {
        self.transition(&[DecodeState::PrefixScored], "replicate", DecodeState::Branched)?;
        let cache = self.cache.as_ref().ok_or(EngineError::InvalidTransition {
            from: "branched",
            op: "replicate",
        })?;
        let replicated = cache.replicate(k)?;
        if replicated.batch_size() != k || replicated.seq_len() != cache.seq_len() {
            return Err(EngineError::ShapeAssertion {
                what: "replicated cache",
                expected: vec![k, cache.seq_len()],
                got: vec![replicated.batch_size(), replicated.seq_len()],
            });
        }
        debug!(k, prefix_len = self.prefix_len, "replicated prefix cache");
        self.cache = Some(replicated);
        Ok(())
    }

    /// Feed one token per branch at `absolute_position` and return the next
    /// logits as `[k, vocab]`.
    ///
    /// `absolute_position` must be the prefix length plus the number of
    /// tokens each branch already holds; it is not derived from the cache.
    pub fn advance_one_step(&mut self, last_tokens: &[u32], absolute_position: usize) -> Result<Tensor> {
        let k = self.cache.as_ref().map(InferenceCache::batch_size).unwrap_or(0);
        if last_tokens.len() != k {
            return Err(EngineError::InvalidArgument(format!(
                "{} tokens supplied for {} branches",
                last_tokens.len(),
                k
            )));
        }
        self.transition(
            &[DecodeState::Branched, DecodeState::Advancing],
            "advance_one_step",
            DecodeState::Advancing,
        )?;

        let logits = self.forward(&TokenBatch::column(last_tokens), absolute_position)?;
        let vocab = self.model.vocab_size();
        if logits.shape().dims() != [k, 1, vocab] {
            return Err(EngineError::ShapeAssertion {
                what: "branch logits",
                expected: vec![k, vocab],
                got: logits.shape().dims().to_vec(),
            });
        }
        Ok(logits.reshape(Shape::new(vec![k, vocab]))?)
    }

    /// End the decode and release the cache.
    pub fn finish(&mut self) {
        if self.state != DecodeState::Done {
            trace!(from = %self.state, "decode finished");
        }
        self.state = DecodeState::Done;
        self.cache = None;
    }
}
