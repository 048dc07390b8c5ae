//! Resolution of outfit item references against an ID space.
//!
//! The same resolver serves migration (old ID -> new ID mapping) and normal
//! reads (identity mapping over the item IDs that currently exist).

use std::collections::{HashMap, HashSet};

/// Maps a referenced item ID to its ID in the target space.
pub trait IdMapping {
    fn resolve(&self, id: &str) -> Option<String>;
}

impl IdMapping for HashMap<String, String> {
    fn resolve(&self, id: &str) -> Option<String> {
        self.get(id).cloned()
    }
}

/// Identity mapping: an ID resolves to itself when it exists.
pub struct ExistingIds<'a> {
    known: &'a HashSet<String>,
}

impl<'a> ExistingIds<'a> {
    pub fn new(known: &'a HashSet<String>) -> Self {
        Self { known }
    }
}

impl IdMapping for ExistingIds<'_> {
    fn resolve(&self, id: &str) -> Option<String> {
        self.known.contains(id).then(|| id.to_string())
    }
}

/// Old item ID -> new item ID table built during one migration run.
///
/// Insertion order is kept for the report. Never persisted across runs.
#[derive(Debug, Clone, Default)]
pub struct IdMap {
    entries: Vec<(String, String)>,
    index: HashMap<String, usize>,
}

impl IdMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a mapping. A repeated old ID keeps its first position and takes
    /// the newest target.
    pub fn insert(&mut self, old_id: impl Into<String>, new_id: impl Into<String>) {
        let old_id = old_id.into();
        let new_id = new_id.into();
        match self.index.get(&old_id) {
            Some(&pos) => self.entries[pos].1 = new_id,
            None => {
                self.index.insert(old_id.clone(), self.entries.len());
                self.entries.push((old_id, new_id));
            }
        }
    }

    pub fn get(&self, old_id: &str) -> Option<&str> {
        self.index
            .get(old_id)
            .map(|&pos| self.entries[pos].1.as_str())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(o, n)| (o.as_str(), n.as_str()))
    }
}

impl IdMapping for IdMap {
    fn resolve(&self, id: &str) -> Option<String> {
        self.get(id).map(String::from)
    }
}

/// Outcome of resolving one outfit's references.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resolution {
    /// Mapped IDs, in the outfit's original order (duplicates kept).
    pub resolved_ids: Vec<String>,
    /// Referenced IDs with no mapping, in order of appearance.
    pub missing_ids: Vec<String>,
}

/// What the caller must do with a resolved outfit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionVerdict {
    /// Every reference resolved.
    Complete,
    /// Create the outfit with the resolved subset and report the gap as a warning.
    Partial,
    /// Nothing resolved: skip, never create an empty outfit.
    Unresolvable,
}

impl Resolution {
    pub fn verdict(&self) -> ResolutionVerdict {
        if self.resolved_ids.is_empty() {
            ResolutionVerdict::Unresolvable
        } else if self.missing_ids.is_empty() {
            ResolutionVerdict::Complete
        } else {
            ResolutionVerdict::Partial
        }
    }

    pub fn has_gap(&self) -> bool {
        !self.missing_ids.is_empty()
    }
}

/// Resolves outfit item references through an [`IdMapping`].
pub struct ReferenceResolver<'m, M: IdMapping + ?Sized> {
    mapping: &'m M,
}

impl<'m, M: IdMapping + ?Sized> ReferenceResolver<'m, M> {
    pub fn new(mapping: &'m M) -> Self {
        Self { mapping }
    }

    pub fn resolve(&self, item_ids: &[String]) -> Resolution {
        let mut resolution = Resolution::default();
        for id in item_ids {
            match self.mapping.resolve(id) {
                Some(target) => resolution.resolved_ids.push(target),
                None => resolution.missing_ids.push(id.clone()),
            }
        }
        resolution
    }
}
