//! `la-engine` - speculative multi-branch next-token lookahead.
//!
//! A prompt is scored once, its cache is replicated into K branches (one per
//! top-K next token) and the branches advance together in batched one-token
//! steps:
//!
//! - [`tokenization`]: prompt and continuation token ids
//! - [`stepper`]: the request-scoped cache and forward-pass bookkeeping
//! - [`lookahead`]: next-token predictions, continuation and highlights
//! - [`format`]: decoding results back to text with character offsets
//! - [`service`]: the resident model behind an `init`/`close` lifecycle

pub mod cancel;
pub mod config;
pub mod error;
pub mod format;
pub mod lookahead;
pub mod service;
pub mod stepper;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tokenization;

pub use cancel::CancelToken;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use format::Highlight;
pub use lookahead::{Branch, LookaheadEngine, Predictions};
pub use service::{ContinueRequest, HighlightRequest, InferenceService, NextTokenRequest};
pub use stepper::{DecodeState, Stepper};
pub use tokenization::{LeadingMarker, MarkerStrategy};
