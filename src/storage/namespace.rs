//! Namespacing — tenant-scoped key names with legacy fallback.
//!
//! With namespace `acme`, base key `menu-tree:A` is stored as
//! `acme:menu-tree:A`. Reads fall back to the unscoped key so a deployment can
//! turn namespacing on without losing existing state; writes always land on
//! the scoped key and delete the unscoped one.

use super::{KvStore, Tier, WriteOptions, WriteOutcome};

/// A `KvStore` view scoped to one namespace.
#[derive(Clone)]
pub struct Namespaced {
    store: KvStore,
    namespace: String,
}

impl Namespaced {
    pub fn new(store: KvStore, namespace: impl Into<String>) -> Self {
        Self {
            store,
            namespace: namespace.into().trim().to_string(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The underlying unscoped store.
    pub fn store(&self) -> &KvStore {
        &self.store
    }

    /// `"{namespace}:{base}"`, or `base` when no namespace is configured.
    pub fn scoped(&self, base: &str) -> String {
        if self.namespace.is_empty() {
            base.to_string()
        } else {
            format!("{}:{base}", self.namespace)
        }
    }

    /// Scoped and legacy forms of `base`, deduplicated.
    pub fn variants(&self, base: &str) -> Vec<String> {
        let scoped = self.scoped(base);
        if scoped == base {
            vec![scoped]
        } else {
            vec![scoped, base.to_string()]
        }
    }

    /// Read the scoped key; only if absent, read the legacy key.
    pub fn read_with_legacy_fallback(&self, base: &str, tiers: &[Tier]) -> Option<String> {
        self.variants(base)
            .iter()
            .find_map(|key| self.store.read(key, tiers))
    }

    /// Write to the scoped key. On success the legacy key is removed from the
    /// tiers this write could have targeted.
    pub fn write_with_eviction<F>(
        &self,
        base: &str,
        value: &str,
        opts: WriteOptions,
        on_quota_exceeded: F,
    ) -> WriteOutcome
    where
        F: FnOnce(),
    {
        let key = self.scoped(base);
        let outcome = self
            .store
            .write_with_eviction(&key, value, opts, on_quota_exceeded);
        if outcome.is_stored() && key != base {
            self.store.remove(base, &write_tiers(opts));
        }
        outcome
    }

    pub fn write(&self, base: &str, value: &str, opts: WriteOptions) -> WriteOutcome {
        self.write_with_eviction(base, value, opts, || {})
    }

    /// Remove both scoped and legacy forms of `base`.
    pub fn remove(&self, base: &str, tiers: &[Tier]) {
        for key in self.variants(base) {
            self.store.remove(&key, tiers);
        }
    }

    /// Remove every key under the scoped or legacy form of `base_prefix`.
    pub fn remove_by_prefix(&self, base_prefix: &str, tier: Tier) -> usize {
        let prefixes = self.variants(base_prefix);
        let refs: Vec<&str> = prefixes.iter().map(String::as_str).collect();
        self.store.remove_by_prefix(&refs, tier)
    }

    /// Keys in `tier` under `base_prefix`, with the namespace stripped.
    /// Scoped keys shadow legacy keys of the same base name.
    pub fn keys_with_prefix(&self, base_prefix: &str, tier: Tier) -> Vec<String> {
        let scoped_prefix = self.scoped("");
        let mut out: Vec<String> = Vec::new();
        for key in self.store.keys(tier) {
            let base = if !scoped_prefix.is_empty() && key.starts_with(&scoped_prefix) {
                &key[scoped_prefix.len()..]
            } else {
                key.as_str()
            };
            if base.starts_with(base_prefix) && !out.iter().any(|k| k == base) {
                out.push(base.to_string());
            }
        }
        out.sort();
        out
    }
}

fn write_tiers(opts: WriteOptions) -> Vec<Tier> {
    let mut tiers = vec![opts.primary];
    if let Some(fallback) = opts.fallback {
        if fallback != opts.primary {
            tiers.push(fallback);
        }
    }
    tiers
}
