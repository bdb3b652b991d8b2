//! Quota-exceeded eviction ladder.
//!
//! Cached state is ranked by how cheap it is to rebuild. Menu trees and the
//! path index can be re-fetched, so they go first; layout, theme, and the
//! authenticated-user cache are only touched when the write that hit the
//! quota is itself of equal or higher rank.

use tracing::info;

use super::namespace::Namespaced;
use super::Tier;

/// Category of cached state, cheapest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EvictionClass {
    MenuTree,
    PathIndex,
    Layout,
    Theme,
    User,
}

/// What one eviction pass removed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evicted {
    pub class: EvictionClass,
    pub removed: usize,
}

/// Ordered eviction rungs, each a class plus the base key prefixes it owns.
#[derive(Debug, Clone)]
pub struct EvictionLadder {
    rungs: Vec<(EvictionClass, Vec<String>)>,
}

impl Default for EvictionLadder {
    fn default() -> Self {
        Self {
            rungs: vec![
                (EvictionClass::MenuTree, vec![crate::menu::MENU_TREE_PREFIX.into()]),
                (EvictionClass::PathIndex, vec![crate::menu::PATH_INDEX_KEY.into()]),
                (EvictionClass::Layout, vec!["layout".into()]),
                (EvictionClass::Theme, vec!["theme".into()]),
                (EvictionClass::User, vec!["user".into()]),
            ],
        }
    }
}

impl EvictionLadder {
    /// Replace the prefixes owned by `class`.
    pub fn with_prefixes(mut self, class: EvictionClass, prefixes: &[&str]) -> Self {
        let prefixes: Vec<String> = prefixes.iter().map(|p| p.to_string()).collect();
        match self.rungs.iter_mut().find(|(c, _)| *c == class) {
            Some(rung) => rung.1 = prefixes,
            None => {
                self.rungs.push((class, prefixes));
                self.rungs.sort_by_key(|(c, _)| *c);
            }
        }
        self
    }

    /// Base prefixes owned by `class`.
    pub fn prefixes(&self, class: EvictionClass) -> &[String] {
        self.rungs
            .iter()
            .find(|(c, _)| *c == class)
            .map(|(_, p)| p.as_slice())
            .unwrap_or(&[])
    }

    /// Purge the cheapest non-empty rung ranked at or below `writer`,
    /// sparing `protected_base` (the key being written). Returns `None` when
    /// nothing eligible was found.
    pub fn evict_for(
        &self,
        ns: &Namespaced,
        tier: Tier,
        writer: EvictionClass,
        protected_base: &str,
    ) -> Option<Evicted> {
        let protected = ns.variants(protected_base);
        let keys = ns.store().keys(tier);

        for (class, bases) in self.rungs.iter().filter(|(c, _)| *c <= writer) {
            let prefixes: Vec<String> = bases.iter().flat_map(|b| ns.variants(b)).collect();
            let victims: Vec<&String> = keys
                .iter()
                .filter(|k| prefixes.iter().any(|p| k.starts_with(p.as_str())))
                .filter(|k| !protected.contains(*k))
                .collect();
            if victims.is_empty() {
                continue;
            }
            for key in &victims {
                ns.store().remove(key, &[tier]);
            }
            info!(?class, removed = victims.len(), "evicted cache rung under quota pressure");
            return Some(Evicted {
                class: *class,
                removed: victims.len(),
            });
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{KvStore, WriteOptions};

    fn seeded() -> Namespaced {
        let ns = Namespaced::new(KvStore::in_memory(), "acme");
        for base in ["menu-tree:A", "menu-tree:B", "menu-path-index", "layout", "theme", "user"] {
            ns.write(base, "1", WriteOptions::persistent());
        }
        ns
    }

    #[test]
    fn menu_trees_go_first() {
        let ns = seeded();
        let ladder = EvictionLadder::default();
        let evicted = ladder
            .evict_for(&ns, Tier::Persistent, EvictionClass::User, "user")
            .unwrap();
        assert_eq!(evicted.class, EvictionClass::MenuTree);
        assert_eq!(evicted.removed, 2);
        assert!(ns
            .read_with_legacy_fallback("layout", &[Tier::Persistent])
            .is_some());
    }

    #[test]
    fn protected_key_survives() {
        let ns = seeded();
        let ladder = EvictionLadder::default();
        let evicted = ladder
            .evict_for(&ns, Tier::Persistent, EvictionClass::MenuTree, "menu-tree:A")
            .unwrap();
        assert_eq!(evicted.removed, 1);
        assert!(ns
            .read_with_legacy_fallback("menu-tree:A", &[Tier::Persistent])
            .is_some());
    }

    #[test]
    fn never_climbs_above_writer_rank() {
        let ns = Namespaced::new(KvStore::in_memory(), "");
        ns.write("theme", "dark", WriteOptions::persistent());
        ns.write("menu-tree:A", "[]", WriteOptions::persistent());
        let ladder = EvictionLadder::default();

        // Only the protected key exists in the MenuTree rung, and theme outranks it.
        assert!(ladder
            .evict_for(&ns, Tier::Persistent, EvictionClass::MenuTree, "menu-tree:A")
            .is_none());
        assert!(ns.read_with_legacy_fallback("theme", &[Tier::Persistent]).is_some());
    }

    #[test]
    fn custom_prefixes_replace_rung() {
        let ladder = EvictionLadder::default().with_prefixes(EvictionClass::Layout, &["app-layout"]);
        assert_eq!(ladder.prefixes(EvictionClass::Layout), ["app-layout".to_string()]);
    }
}
