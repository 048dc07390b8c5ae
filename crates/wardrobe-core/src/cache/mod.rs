//! Pairwise compatibility scores: the SQLite cache and the scorer in front of it.

mod compatibility;
mod scoring;

pub use compatibility::CompatibilityCache;
pub use scoring::{CompatibilityModel, CompatibilityScorer, PairPrediction};
