use la_tensor::{ComputeBackend, Tensor};

use crate::error::Result;
use crate::tokens::TokenBatch;

/// Per-request key/value state of a causal model.
///
/// A cache holds `batch_size()` independent sequences that all have the same
/// length. It is created empty by [`CausalLm::new_cache`], extended in place
/// by [`CausalLm::forward`], and fanned out with [`InferenceCache::reorder`].
pub trait InferenceCache: Send + Sized {
    /// Number of sequences (batch rows) held.
    fn batch_size(&self) -> usize;

    /// Number of cached positions per sequence.
    fn seq_len(&self) -> usize;

    /// A new cache whose row `i` is a copy of row `indices[i]` of `self`.
    fn reorder(&self, indices: &[usize]) -> Result<Self>;

    /// `k` copies of row 0: one shared prefix becomes `k` branch roots.
    fn replicate(&self, k: usize) -> Result<Self> {
        self.reorder(&vec![0; k])
    }
}

/// A causal language model that scores token batches against a cache.
///
/// Weights are borrowed immutably, so one resident model can serve any number
/// of request-scoped caches.
pub trait CausalLm: Send + Sync {
    type Cache: InferenceCache;

    /// A fresh, empty cache for `batch_size` sequences.
    fn new_cache(&self, batch_size: usize) -> Self::Cache;

    /// Run the model over `tokens` (`[batch, seq_len]`).
    ///
    /// `start_pos` is the absolute position of the first token of every row.
    /// The cache is extended by `seq_len` positions and the logits for every
    /// input position are returned as `[batch, seq_len, vocab_size]`.
    fn forward(
        &self,
        tokens: &TokenBatch,
        start_pos: usize,
        cache: &mut Self::Cache,
        backend: &dyn ComputeBackend,
    ) -> Result<Tensor>;

    /// Returns the vocabulary size (number of output logits).
    fn vocab_size(&self) -> usize;
}
