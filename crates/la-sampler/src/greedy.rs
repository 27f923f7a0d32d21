use crate::sampler::{Sampler, TokenLogit};

/// Greedy sampler: selects the single token with the highest logit.
#[derive(Debug, Default)]
pub struct GreedySampler;

impl GreedySampler {
    pub fn new() -> Self {
        Self
    }
}

impl Sampler for GreedySampler {
    fn name(&self) -> &str {
        "greedy"
    }

    fn apply(&self, logits: &mut Vec<TokenLogit>) {
        let best = logits
            .iter()
            .min_by(|a, b| TokenLogit::rank(a, b))
            .cloned();
        logits.clear();
        logits.extend(best);
    }
}
