use serde::{Deserialize, Serialize};
use std::fmt;

/// Order-independent key for a pair of item IDs.
///
/// `low <= high` always holds, so `{a, b}` and `{b, a}` build the same key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PairKey {
    low: String,
    high: String,
}

impl PairKey {
    pub fn new(a: &str, b: &str) -> Self {
        if a <= b {
            Self {
                low: a.to_string(),
                high: b.to_string(),
            }
        } else {
            Self {
                low: b.to_string(),
                high: a.to_string(),
            }
        }
    }

    pub fn low(&self) -> &str {
        &self.low
    }

    pub fn high(&self) -> &str {
        &self.high
    }

    pub fn contains(&self, id: &str) -> bool {
        self.low == id || self.high == id
    }
}

impl fmt::Display for PairKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}|{}", self.low, self.high)
    }
}

/// Pairwise compatibility score plus both embeddings.
///
/// `embedding_a` belongs to `item_a` and `embedding_b` to `item_b`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityResult {
    pub item_a: String,
    pub item_b: String,
    pub score: f64,
    pub embedding_a: Vec<f32>,
    pub embedding_b: Vec<f32>,
    pub model_version: String,
}

impl CompatibilityResult {
    pub fn pair_key(&self) -> PairKey {
        PairKey::new(&self.item_a, &self.item_b)
    }

    pub fn is_canonical(&self) -> bool {
        self.item_a <= self.item_b
    }

    /// Reorder so `item_a <= item_b`, moving each embedding with its item.
    pub fn canonical(mut self) -> Self {
        if !self.is_canonical() {
            std::mem::swap(&mut self.item_a, &mut self.item_b);
            std::mem::swap(&mut self.embedding_a, &mut self.embedding_b);
        }
        self
    }

    /// Embedding for one side of the pair, whichever order it is stored in.
    pub fn embedding_for(&self, item_id: &str) -> Option<&[f32]> {
        if self.item_a == item_id {
            Some(&self.embedding_a)
        } else if self.item_b == item_id {
            Some(&self.embedding_b)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_key_is_order_independent() {
        assert_eq!(PairKey::new("x", "y"), PairKey::new("y", "x"));
        assert_eq!(PairKey::new("y", "x").low(), "x");
        assert_eq!(PairKey::new("same", "same").to_string(), "same|same");
    }

    #[test]
    fn test_canonical_moves_embeddings_with_ids() {
        let result = CompatibilityResult {
            item_a: "zeta".into(),
            item_b: "alpha".into(),
            score: 0.8,
            embedding_a: vec![1.0],
            embedding_b: vec![2.0],
            model_version: "v1.0".into(),
        };
        let canonical = result.clone().canonical();
        assert_eq!(canonical.item_a, "alpha");
        assert_eq!(canonical.embedding_for("alpha"), Some(&[2.0][..]));
        assert_eq!(canonical.embedding_for("zeta"), Some(&[1.0][..]));
        assert_eq!(result.pair_key(), canonical.pair_key());
    }
}
