use tracing::debug;

use crate::architecture::InferenceCache;
use crate::error::{ModelError, Result};

/// Key/value rows of one layer for one sequence.
///
/// `k` and `v` are flat `[len, n_kv_heads * head_dim]` buffers that grow by
/// one row per processed token.
#[derive(Debug, Clone, Default)]
struct SequenceSlot {
    k: Vec<f32>,
    v: Vec<f32>,
}

/// Key-Value cache for a batch of sequences.
///
/// Layout: `slots[layer][batch_row]`. Every row of every layer holds the
/// same number of positions once a forward pass completes. The cache does
/// not track absolute positions; rotary phases are derived from the start
/// position the caller passes to the model.
#[derive(Debug, Clone)]
pub struct KvCache {
    slots: Vec<Vec<SequenceSlot>>,
    kv_dim: usize,
    max_seq_len: usize,
}

impl KvCache {
    /// Create an empty cache for `batch_size` sequences.
    pub fn new(
        n_layers: usize,
        n_kv_heads: usize,
        head_dim: usize,
        max_seq_len: usize,
        batch_size: usize,
    ) -> Self {
        let slots = (0..n_layers)
            .map(|_| vec![SequenceSlot::default(); batch_size])
            .collect();
        KvCache {
            slots,
            kv_dim: n_kv_heads * head_dim,
            max_seq_len,
        }
    }

    pub fn n_layers(&self) -> usize {
        self.slots.len()
    }

    /// Width of one cached key (or value) row.
    pub fn kv_dim(&self) -> usize {
        self.kv_dim
    }

    pub fn max_seq_len(&self) -> usize {
        self.max_seq_len
    }

    /// Append one token's key and value for `(layer, row)`.
    pub fn append(&mut self, layer: usize, row: usize, k: &[f32], v: &[f32]) {
        let slot = &mut self.slots[layer][row];
        slot.k.extend_from_slice(k);
        slot.v.extend_from_slice(v);
    }

    /// Cached keys for `(layer, row)` as a flat `[len, kv_dim]` slice.
    pub fn keys(&self, layer: usize, row: usize) -> &[f32] {
        &self.slots[layer][row].k
    }

    /// Cached values for `(layer, row)` as a flat `[len, kv_dim]` slice.
    pub fn values(&self, layer: usize, row: usize) -> &[f32] {
        &self.slots[layer][row].v
    }

    /// Approximate heap footprint of the cached keys and values.
    pub fn size_bytes(&self) -> usize {
        self.slots
            .iter()
            .flatten()
            .map(|s| (s.k.len() + s.v.len()) * std::mem::size_of::<f32>())
            .sum()
    }
}

impl InferenceCache for KvCache {
    fn batch_size(&self) -> usize {
        self.slots.first().map(|l| l.len()).unwrap_or(0)
    }

    fn seq_len(&self) -> usize {
        match self.slots.first().and_then(|l| l.first()) {
            Some(slot) if self.kv_dim > 0 => slot.k.len() / self.kv_dim,
            _ => 0,
        }
    }

    fn reorder(&self, indices: &[usize]) -> Result<Self> {
        let batch = self.batch_size();
        if let Some(&index) = indices.iter().find(|&&i| i >= batch) {
            return Err(ModelError::ReorderIndex { index, batch });
        }
        let slots = self
            .slots
            .iter()
            .map(|layer| indices.iter().map(|&i| layer[i].clone()).collect())
            .collect();
        let reordered = KvCache {
            slots,
            kv_dim: self.kv_dim,
            max_seq_len: self.max_seq_len,
        };
        debug!(
            from_batch = batch,
            to_batch = indices.len(),
            seq_len = self.seq_len(),
            bytes = reordered.size_bytes(),
            "reordered kv cache"
        );
        Ok(reordered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(batch: usize, positions: usize) -> KvCache {
        // 2 layers, 1 kv head, head_dim 2 -> kv_dim 2
        let mut cache = KvCache::new(2, 1, 2, 16, batch);
        for layer in 0..2 {
            for row in 0..batch {
                for p in 0..positions {
                    let base = (layer * 100 + row * 10 + p) as f32;
                    cache.append(layer, row, &[base, base + 0.5], &[-base, -base - 0.5]);
                }
            }
        }
        cache
    }

    #[test]
    fn test_new_cache_is_empty() {
        let cache = KvCache::new(4, 2, 8, 32, 1);
        assert_eq!(cache.n_layers(), 4);
        assert_eq!(cache.batch_size(), 1);
        assert_eq!(cache.seq_len(), 0);
        assert_eq!(cache.kv_dim(), 16);
        assert_eq!(cache.size_bytes(), 0);
    }

    #[test]
    fn test_append_grows_seq_len() {
        let cache = filled(1, 3);
        assert_eq!(cache.seq_len(), 3);
        assert_eq!(cache.keys(1, 0)[..2], [100.0, 100.5]);
        assert_eq!(cache.values(0, 0)[4..6], [-2.0, -2.5]);
    }

    #[test]
    fn test_replicate_copies_row_zero() {
        let cache = filled(1, 3);
        let wide = cache.replicate(4).unwrap();
        assert_eq!(wide.batch_size(), 4);
        assert_eq!(wide.seq_len(), 3);
        for row in 0..4 {
            for layer in 0..2 {
                assert_eq!(wide.keys(layer, row), cache.keys(layer, 0));
                assert_eq!(wide.values(layer, row), cache.values(layer, 0));
            }
        }
    }

    #[test]
    fn test_replicas_are_independent() {
        let mut wide = filled(1, 2).replicate(2).unwrap();
        wide.append(0, 1, &[9.0, 9.0], &[9.0, 9.0]);
        assert_eq!(wide.keys(0, 0).len(), 4);
        assert_eq!(wide.keys(0, 1).len(), 6);
    }

    #[test]
    fn test_reorder_gathers_rows() {
        let cache = filled(3, 1);
        let gathered = cache.reorder(&[2, 0]).unwrap();
        assert_eq!(gathered.batch_size(), 2);
        assert_eq!(gathered.keys(0, 0), cache.keys(0, 2));
        assert_eq!(gathered.keys(0, 1), cache.keys(0, 0));
    }

    #[test]
    fn test_reorder_out_of_range() {
        let cache = filled(2, 1);
        let err = cache.reorder(&[0, 2]).unwrap_err();
        assert!(matches!(err, ModelError::ReorderIndex { index: 2, batch: 2 }));
    }
}
