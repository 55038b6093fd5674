//! Diff Engine.
//!
//! Classifies the documents of the current fetch against the content-hash
//! map stored for the previous indexed snapshot. Classification is pure
//! hash equality; content is never inspected, so re-indexing unchanged
//! content is a no-op.
//!
//! The engine cannot tell that a *future* version has already been
//! committed by a concurrent run. The commit stage re-checks that under
//! the source lock.

use std::collections::{BTreeMap, HashMap};

/// Classification of one current path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Unchanged,
    Changed,
    /// Path absent from the previous map. Always reprocessed.
    New,
}

impl ChangeKind {
    pub fn needs_indexing(&self) -> bool {
        !matches!(self, ChangeKind::Unchanged)
    }
}

/// Output of [`diff`]. All path lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    kinds: BTreeMap<String, ChangeKind>,
    pub deleted: Vec<String>,
}

impl DiffResult {
    pub fn kind(&self, path: &str) -> Option<ChangeKind> {
        self.kinds.get(path).copied()
    }

    fn paths_of(&self, kind: ChangeKind) -> Vec<String> {
        self.kinds
            .iter()
            .filter(|(_, k)| **k == kind)
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn unchanged(&self) -> Vec<String> {
        self.paths_of(ChangeKind::Unchanged)
    }

    pub fn changed(&self) -> Vec<String> {
        self.paths_of(ChangeKind::Changed)
    }

    pub fn new_paths(&self) -> Vec<String> {
        self.paths_of(ChangeKind::New)
    }

    /// Changed and new paths together.
    pub fn to_index(&self) -> Vec<String> {
        self.kinds
            .iter()
            .filter(|(_, k)| k.needs_indexing())
            .map(|(p, _)| p.clone())
            .collect()
    }

    pub fn is_noop(&self) -> bool {
        self.deleted.is_empty() && self.kinds.values().all(|k| !k.needs_indexing())
    }
}

/// Compare current `(path, content_hash)` pairs against the previous map.
///
/// Pass an empty `previous` map to force every path to be treated as new.
pub fn diff<'a, I>(current: I, previous: &HashMap<String, String>) -> DiffResult
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut kinds = BTreeMap::new();

    for (path, hash) in current {
        let kind = match previous.get(path) {
            Some(prev) if prev == hash => ChangeKind::Unchanged,
            Some(_) => ChangeKind::Changed,
            None => ChangeKind::New,
        };
        kinds.insert(path.to_string(), kind);
    }

    let mut deleted: Vec<String> = previous
        .keys()
        .filter(|p| !kinds.contains_key(p.as_str()))
        .cloned()
        .collect();
    deleted.sort();

    DiffResult { kinds, deleted }
}
