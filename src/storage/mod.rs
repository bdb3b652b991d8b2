//! Storage — uniform key/value access over two tiers.
//!
//! - Persistent tier: survives restarts (menu trees, path index, shell caches)
//! - Volatile tier: session-only (open tabs)
//!
//! Every operation here degrades silently. An unavailable tier reads as a
//! miss and swallows writes; a full tier triggers one caller-supplied
//! eviction pass, one retry, then the fallback tier, then the write is dropped.

pub mod backend;
pub mod error;
pub mod eviction;
pub mod file;
pub mod namespace;

use std::sync::Arc;

use tracing::{debug, warn};

use backend::{MemoryBackend, StorageBackend};
use error::StorageError;

/// Which storage tier an operation targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Persistent,
    Volatile,
}

/// Default probe order for reads: persistent first.
pub const DEFAULT_READ_ORDER: [Tier; 2] = [Tier::Persistent, Tier::Volatile];

/// Where a write should land.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteOptions {
    pub primary: Tier,
    pub fallback: Option<Tier>,
}

impl WriteOptions {
    pub fn persistent() -> Self {
        Self {
            primary: Tier::Persistent,
            fallback: None,
        }
    }

    pub fn volatile() -> Self {
        Self {
            primary: Tier::Volatile,
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, tier: Tier) -> Self {
        self.fallback = Some(tier);
        self
    }
}

impl Default for WriteOptions {
    fn default() -> Self {
        Self::persistent()
    }
}

/// What a write actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// Stored in the primary tier (possibly after eviction).
    Primary,
    /// Primary refused; stored in the fallback tier.
    Fallback,
    /// Nothing was stored.
    Dropped,
}

impl WriteOutcome {
    pub fn is_stored(self) -> bool {
        !matches!(self, Self::Dropped)
    }
}

/// Byte size of a value as storage quotas count it.
pub fn byte_len(value: &str) -> usize {
    // Rust strings are UTF-8, so the byte length is the encoded length.
    value.len()
}

/// Two-tier key/value adapter.
#[derive(Clone)]
pub struct KvStore {
    persistent: Arc<dyn StorageBackend>,
    volatile: Arc<dyn StorageBackend>,
}

impl KvStore {
    pub fn new(persistent: Arc<dyn StorageBackend>, volatile: Arc<dyn StorageBackend>) -> Self {
        Self {
            persistent,
            volatile,
        }
    }

    /// Both tiers in memory, unbounded.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(MemoryBackend::new()),
        )
    }

    fn tier(&self, tier: Tier) -> &dyn StorageBackend {
        match tier {
            Tier::Persistent => self.persistent.as_ref(),
            Tier::Volatile => self.volatile.as_ref(),
        }
    }

    /// First non-empty value found probing `tiers` in order.
    pub fn read(&self, key: &str, tiers: &[Tier]) -> Option<String> {
        for &tier in tiers {
            match self.tier(tier).get(key) {
                Ok(Some(value)) if !value.is_empty() => return Some(value),
                Ok(_) => {}
                Err(e) => debug!(key, ?tier, error = %e, "storage read failed"),
            }
        }
        None
    }

    /// Write without an eviction hook.
    pub fn write(&self, key: &str, value: &str, opts: WriteOptions) -> WriteOutcome {
        self.write_with_eviction(key, value, opts, || {})
    }

    /// Write `value`, calling `on_quota_exceeded` once if the primary tier is
    /// full and retrying before falling back.
    pub fn write_with_eviction<F>(
        &self,
        key: &str,
        value: &str,
        opts: WriteOptions,
        on_quota_exceeded: F,
    ) -> WriteOutcome
    where
        F: FnOnce(),
    {
        match self.tier(opts.primary).set(key, value) {
            Ok(()) => return WriteOutcome::Primary,
            Err(e) if e.is_quota_exceeded() => {
                debug!(key, bytes = byte_len(value), "primary tier full, evicting");
                on_quota_exceeded();
                match self.tier(opts.primary).set(key, value) {
                    Ok(()) => return WriteOutcome::Primary,
                    Err(e) => warn!(key, error = %e, "write failed after eviction"),
                }
            }
            Err(e) => debug!(key, tier = ?opts.primary, error = %e, "primary write failed"),
        }

        if let Some(fallback) = opts.fallback {
            match self.tier(fallback).set(key, value) {
                Ok(()) => return WriteOutcome::Fallback,
                Err(e) => debug!(key, ?fallback, error = %e, "fallback write failed"),
            }
        }

        warn!(key, bytes = byte_len(value), "dropping write");
        WriteOutcome::Dropped
    }

    /// Remove `key` from each of `tiers`.
    pub fn remove(&self, key: &str, tiers: &[Tier]) {
        for &tier in tiers {
            if let Err(e) = self.tier(tier).remove(key) {
                debug!(key, ?tier, error = %e, "storage remove failed");
            }
        }
    }

    /// Keys currently stored in `tier` (empty if unavailable).
    pub fn keys(&self, tier: Tier) -> Vec<String> {
        self.tier(tier).keys().unwrap_or_else(|e| {
            debug!(?tier, error = %e, "storage scan failed");
            Vec::new()
        })
    }

    /// Scan `tier` and delete every key starting with one of `prefixes`.
    /// Returns how many keys were removed.
    pub fn remove_by_prefix(&self, prefixes: &[&str], tier: Tier) -> usize {
        let backend = self.tier(tier);
        let mut removed = 0;
        for key in self.keys(tier) {
            if !prefixes.iter().any(|p| key.starts_with(p)) {
                continue;
            }
            match backend.remove(&key) {
                Ok(()) => removed += 1,
                Err(StorageError::Unavailable(_)) => break,
                Err(e) => debug!(key, error = %e, "prefix remove failed"),
            }
        }
        removed
    }
}
