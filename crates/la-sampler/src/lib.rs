//! `la-sampler` - deterministic logit selection.
//!
//! The lookahead engine never samples randomly: branch tokens come from
//! [`TopKSampler`] and every follow-up token from [`GreedySampler`], so
//! repeated requests are reproducible.

pub mod greedy;
pub mod sampler;
pub mod top_k;

pub use greedy::GreedySampler;
pub use sampler::{Sampler, SamplerChain, TokenLogit};
pub use top_k::{top_k_ids, TopKSampler};
