use std::ops::Deref;

use crate::error::{ModelError, Result};

/// An immutable, ordered sequence of token ids.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct TokenSequence(Vec<u32>);

impl TokenSequence {
    pub fn new(ids: Vec<u32>) -> Self {
        TokenSequence(ids)
    }

    pub fn empty() -> Self {
        TokenSequence(Vec::new())
    }

    pub fn as_slice(&self) -> &[u32] {
        &self.0
    }

    pub fn into_vec(self) -> Vec<u32> {
        self.0
    }

    /// A new sequence holding `self` followed by `suffix`.
    pub fn concat(&self, suffix: &TokenSequence) -> TokenSequence {
        let mut ids = Vec::with_capacity(self.0.len() + suffix.0.len());
        ids.extend_from_slice(&self.0);
        ids.extend_from_slice(&suffix.0);
        TokenSequence(ids)
    }

    /// Drop the first `n` tokens (saturating).
    pub fn skip(&self, n: usize) -> TokenSequence {
        TokenSequence(self.0.iter().skip(n).copied().collect())
    }
}

impl Deref for TokenSequence {
    type Target = [u32];

    fn deref(&self) -> &[u32] {
        &self.0
    }
}

impl From<Vec<u32>> for TokenSequence {
    fn from(ids: Vec<u32>) -> Self {
        TokenSequence(ids)
    }
}

impl From<&[u32]> for TokenSequence {
    fn from(ids: &[u32]) -> Self {
        TokenSequence(ids.to_vec())
    }
}

/// A rectangular `[batch, seq_len]` block of token ids, stored row-major.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenBatch {
    ids: Vec<u32>,
    batch: usize,
    seq_len: usize,
}

impl TokenBatch {
    /// Build a batch from equal-length rows.
    pub fn from_rows<S: AsRef<[u32]>>(rows: &[S]) -> Result<TokenBatch> {
        let seq_len = rows.first().map(|r| r.as_ref().len()).unwrap_or(0);
        let mut ids = Vec::with_capacity(rows.len() * seq_len);
        for (row, r) in rows.iter().enumerate() {
            let r = r.as_ref();
            if r.len() != seq_len {
                return Err(ModelError::RaggedBatch {
                    row,
                    expected: seq_len,
                    got: r.len(),
                });
            }
            ids.extend_from_slice(r);
        }
        Ok(TokenBatch {
            ids,
            batch: rows.len(),
            seq_len,
        })
    }

    /// A single-row batch.
    pub fn single(seq: &[u32]) -> TokenBatch {
        TokenBatch {
            ids: seq.to_vec(),
            batch: 1,
            seq_len: seq.len(),
        }
    }

    /// A `[tokens.len(), 1]` batch: one new token per sequence.
    pub fn column(tokens: &[u32]) -> TokenBatch {
        TokenBatch {
            ids: tokens.to_vec(),
            batch: tokens.len(),
            seq_len: 1,
        }
    }

    pub fn batch_size(&self) -> usize {
        self.batch
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn row(&self, b: usize) -> &[u32] {
        &self.ids[b * self.seq_len..(b + 1) * self.seq_len]
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_and_skip() {
        let a = TokenSequence::new(vec![1, 2]);
        let b = TokenSequence::from(vec![3]);
        assert_eq!(a.concat(&b).as_slice(), &[1, 2, 3]);
        assert_eq!(a.skip(1).as_slice(), &[2]);
        assert!(a.skip(5).is_empty());
    }

    #[test]
    fn test_batch_from_rows() {
        let batch = TokenBatch::from_rows(&[vec![1, 2], vec![3, 4], vec![5, 6]]).unwrap();
        assert_eq!(batch.batch_size(), 3);
        assert_eq!(batch.seq_len(), 2);
        assert_eq!(batch.row(1), &[3, 4]);
    }

    #[test]
    fn test_ragged_batch_rejected() {
        let err = TokenBatch::from_rows(&[vec![1, 2], vec![3]]).unwrap_err();
        assert!(matches!(err, ModelError::RaggedBatch { row: 1, .. }));
    }

    #[test]
    fn test_column() {
        let batch = TokenBatch::column(&[42, 7]);
        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.seq_len(), 1);
        assert_eq!(batch.row(0), &[42]);
        assert_eq!(batch.row(1), &[7]);
    }
}
