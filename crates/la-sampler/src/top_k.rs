use crate::sampler::{Sampler, TokenLogit};

/// Keeps the `k` highest-logit tokens, ordered best first.
///
/// Unlike a filter-only top-K, the survivors are always sorted, so the
/// output order is the branch order callers hand back to users.
pub struct TopKSampler {
    k: usize,
}

impl TopKSampler {
    pub fn new(k: usize) -> Self {
        Self { k }
    }
}

impl Sampler for TopKSampler {
    fn name(&self) -> &str {
        "top_k"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        if self.k == 0 {
            logits.clear();
            return;
        }
        if self.k < logits.len() {
            logits.select_nth_unstable_by(self.k - 1, TokenLogit::rank);
            logits.truncate(self.k);
        }
        logits.sort_by(TokenLogit::rank);
    }
}

/// Token ids of the `k` best logits, best first.
pub fn top_k_ids(logits: &[f32], k: usize) -> Vec<u32> {
    let mut candidates: Vec<TokenLogit> = logits
        .iter()
        .enumerate()
        .map(|(i, &logit)| TokenLogit {
            token_id: i as u32,
            logit,
        })
        .collect();
    TopKSampler::new(k).apply(&mut candidates);
    candidates.into_iter().map(|t| t.token_id).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_top_k_sorted_best_first() {
        assert_eq!(top_k_ids(&[0.1, 3.0, -1.0, 2.0, 0.5], 3), vec![1, 3, 4]);
    }

    #[test]
    fn test_k_equal_to_vocab_sorts_everything() {
        assert_eq!(top_k_ids(&[0.1, 3.0, -1.0], 3), vec![1, 0, 2]);
        assert_eq!(top_k_ids(&[0.1, 3.0, -1.0], 10), vec![1, 0, 2]);
    }

    #[test]
    fn test_ties_are_deterministic() {
        let logits = [1.0, 2.0, 2.0, 2.0, 0.0];
        let first = top_k_ids(&logits, 2);
        assert_eq!(first, vec![1, 2]);
        assert_eq!(top_k_ids(&logits, 2), first);
    }

    #[test]
    fn test_zero_k_selects_nothing() {
        assert!(top_k_ids(&[1.0, 2.0], 0).is_empty());
    }
}
