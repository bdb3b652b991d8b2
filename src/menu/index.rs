//! Path index — reverse map from menu path to owning system code.
//!
//! Built by walking systems in ascending code order; the first system to
//! claim a path keeps it, so conflicts resolve the same way on every build.

use std::collections::{BTreeMap, HashMap};

use super::tree::{internal_paths, MenuItem};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathIndex {
    entries: HashMap<String, String>,
}

impl PathIndex {
    /// Build from `(code, tree)` pairs given in ascending code order.
    pub fn build<'a, I>(trees: I) -> Self
    where
        I: IntoIterator<Item = (&'a String, &'a Vec<MenuItem>)>,
    {
        let mut entries = HashMap::new();
        for (code, tree) in trees {
            for path in internal_paths(tree) {
                entries
                    .entry(path.to_string())
                    .or_insert_with(|| code.clone());
            }
        }
        Self { entries }
    }

    pub fn get(&self, path: &str) -> Option<&str> {
        self.entries.get(path).map(String::as_str)
    }

    /// Record an owner found by re-scan. Existing owners are kept.
    pub fn insert(&mut self, path: &str, code: &str) {
        self.entries
            .entry(path.to_string())
            .or_insert_with(|| code.to_string());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// JSON object `path -> systemCode`, keys sorted.
    pub fn to_json(&self) -> serde_json::Result<String> {
        let sorted: BTreeMap<&String, &String> = self.entries.iter().collect();
        serde_json::to_string(&sorted)
    }

    /// Parse a persisted copy. Anything but an object of strings is rejected.
    pub fn from_json(raw: &str) -> serde_json::Result<Self> {
        let entries: HashMap<String, String> = serde_json::from_str(raw)?;
        Ok(Self { entries })
    }
}
