use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use la_model::gguf::GgufFile;
use la_model::{BpeTokenizer, CausalLm, ChatMessage, LlamaModel, Tokenizer};
use la_tensor::CpuBackend;
use serde::{Deserialize, Serialize};
use tracing::{info, info_span};

use crate::cancel::CancelToken;
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::format::Highlight;
use crate::lookahead::{Branch, LookaheadEngine, Predictions};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HighlightRequest {
    pub document: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub edited_document: Option<String>,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NextTokenRequest {
    pub original_document: String,
    #[serde(default)]
    pub instruction: Option<String>,
    #[serde(default)]
    pub continuation: String,
    #[serde(default)]
    pub k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinueRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub n_branch_tokens: Option<usize>,
    #[serde(default)]
    pub n_future_tokens: Option<usize>,
}

struct Resident<M, T> {
    model: M,
    tokenizer: T,
}

/// Owns the resident model and tokenizer between `init` and `close` and
/// runs one request at a time against them.
///
/// Requests fill unset fields from the [`EngineConfig`] and queue on the
/// service mutex.
pub struct InferenceService<M: CausalLm, T: Tokenizer> {
    config: EngineConfig,
    backend: CpuBackend,
    resident: Mutex<Option<Resident<M, T>>>,
}

impl<M: CausalLm, T: Tokenizer> InferenceService<M, T> {
    pub fn new(config: EngineConfig) -> Self {
        InferenceService {
            config,
            backend: CpuBackend::new(),
            resident: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, Option<Resident<M, T>>> {
        self.resident.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn init(&self, model: M, tokenizer: T) -> Result<()> {
        let mut resident = self.lock();
        if resident.is_some() {
            return Err(EngineError::AlreadyInitialized);
        }
        info!(vocab_size = model.vocab_size(), "inference service ready");
        *resident = Some(Resident { model, tokenizer });
        Ok(())
    }

    /// Release the model and tokenizer. Closing an idle service is a no-op.
    pub fn close(&self) {
        if self.lock().take().is_some() {
            info!("inference service closed");
        }
    }

    pub fn is_ready(&self) -> bool {
        self.lock().is_some()
    }

    fn with_engine<R>(
        &self,
        cancel: &CancelToken,
        f: impl FnOnce(&LookaheadEngine<'_, M, T>) -> Result<R>,
    ) -> Result<R> {
        let resident = self.lock();
        let resident = resident.as_ref().ok_or(EngineError::NotInitialized)?;
        let engine = LookaheadEngine::new(
            &resident.model,
            &resident.tokenizer,
            &self.backend,
            &self.config.leading_marker,
        )
        .with_cancel(cancel.clone());
        f(&engine)
    }

    pub fn highlights(&self, req: &HighlightRequest, cancel: &CancelToken) -> Result<Vec<Highlight>> {
        let k = self.config.check_branch_width(req.k.unwrap_or(self.config.highlight_top_k))?;
        let instruction = req.instruction.as_deref().unwrap_or(&self.config.default_instruction);
        let span = info_span!("highlights", k, doc_len = req.document.len());
        let _enter = span.enter();

        let highlights = self.with_engine(cancel, |engine| {
            engine.highlights(&req.document, instruction, req.edited_document.as_deref(), k)
        })?;
        info!(tokens = highlights.len(), "highlights done");
        Ok(highlights)
    }

    pub fn next_token_predictions(&self, req: &NextTokenRequest, cancel: &CancelToken) -> Result<Predictions> {
        let k = self.config.check_branch_width(req.k.unwrap_or(self.config.branch_width))?;
        let instruction = req.instruction.as_deref().unwrap_or(&self.config.default_instruction);
        let span = info_span!("next_token_predictions", k, continuation_len = req.continuation.len());
        let _enter = span.enter();

        let predictions = self.with_engine(cancel, |engine| {
            engine.next_token_predictions(&req.original_document, instruction, &req.continuation, k)
        })?;
        info!(branches = predictions.branches.len(), "next-token predictions done");
        Ok(predictions)
    }

    pub fn continue_messages(&self, req: &ContinueRequest, cancel: &CancelToken) -> Result<Vec<Branch>> {
        let k = self
            .config
            .check_branch_width(req.n_branch_tokens.unwrap_or(self.config.branch_width))?;
        let n = self
            .config
            .check_future_tokens(req.n_future_tokens.unwrap_or(self.config.n_future_tokens))?;
        let span = info_span!("continue_messages", k, n, messages = req.messages.len());
        let _enter = span.enter();

        let branches = self.with_engine(cancel, |engine| engine.continue_messages(&req.messages, k, n))?;
        info!(branches = branches.len(), "continuation done");
        Ok(branches)
    }
}

impl InferenceService<LlamaModel, BpeTokenizer> {
    /// Load the bundled LLaMA model and its tokenizer from one GGUF file,
    /// `path` or else the configured `model_path`.
    pub fn init_from_gguf(&self, path: Option<&Path>) -> Result<()> {
        let path = path
            .or(self.config.model_path.as_deref())
            .ok_or_else(|| EngineError::Config("no model path given".into()))?;
        info!(path = %path.display(), "loading model");
        let gguf = GgufFile::open(path)?;
        let model = LlamaModel::from_gguf(&gguf)?;
        let tokenizer = BpeTokenizer::from_gguf(&gguf.metadata)?;
        self.init(model, tokenizer)
    }
}
