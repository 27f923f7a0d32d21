use std::cmp::Ordering;

/// A token ID paired with its logit value.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenLogit {
    pub token_id: u32,
    pub logit: f32,
}

impl TokenLogit {
    /// Ranking order used by every selector: higher logit first, ties broken
    /// by lower token id, NaN ranked below every number.
    pub fn rank(a: &TokenLogit, b: &TokenLogit) -> Ordering {
        match (a.logit.is_nan(), b.logit.is_nan()) {
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            _ => b
                .logit
                .total_cmp(&a.logit)
                .then_with(|| a.token_id.cmp(&b.token_id)),
        }
    }
}

/// Trait for samplers that modify or select from a set of token logits.
pub trait Sampler: Send + Sync {
    /// Returns the name of this sampler.
    fn name(&self) -> &str;

    /// Modify logits in-place (filtering, reordering, etc.)
    fn apply(&self, logits: &mut Vec<TokenLogit>);
}

/// Composes multiple samplers into a pipeline.
pub struct SamplerChain {
    samplers: Vec<Box<dyn Sampler>>,
}

impl SamplerChain {
    /// Create a new empty sampler chain.
    pub fn new() -> Self {
        Self {
            samplers: Vec::new(),
        }
    }

    /// Add a sampler to the end of the chain. Returns self for builder-style usage.
    pub fn with(mut self, sampler: Box<dyn Sampler>) -> Self {
        self.samplers.push(sampler);
        self
    }

    /// Run all samplers in order on raw logits and return every survivor,
    /// in the order the last sampler left them.
    pub fn candidates(&self, logits: &[f32]) -> Vec<TokenLogit> {
        let mut token_logits: Vec<TokenLogit> = logits
            .iter()
            .enumerate()
            .map(|(i, &logit)| TokenLogit {
                token_id: i as u32,
                logit,
            })
            .collect();

        for sampler in &self.samplers {
            sampler.apply(&mut token_logits);
        }
        token_logits
    }

    /// The first surviving token, or `None` for empty logits.
    pub fn sample(&self, logits: &[f32]) -> Option<u32> {
        self.candidates(logits).first().map(|t| t.token_id)
    }
}

impl Default for SamplerChain {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tl(token_id: u32, logit: f32) -> TokenLogit {
        TokenLogit { token_id, logit }
    }

    #[test]
    fn test_rank_orders_by_logit_then_id() {
        let mut v = vec![tl(3, 1.0), tl(1, 2.0), tl(0, 1.0), tl(2, f32::NAN)];
        v.sort_by(TokenLogit::rank);
        let ids: Vec<u32> = v.iter().map(|t| t.token_id).collect();
        assert_eq!(ids, vec![1, 0, 3, 2]);
    }

    #[test]
    fn test_empty_chain_keeps_everything() {
        let chain = SamplerChain::new();
        assert_eq!(chain.candidates(&[0.5, 0.1]).len(), 2);
        assert_eq!(chain.sample(&[0.5, 0.1]), Some(0));
        assert_eq!(chain.sample(&[]), None);
    }
}
