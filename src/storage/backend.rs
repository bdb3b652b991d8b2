//! Storage backends — the raw key/value tiers underneath `KvStore`.
//!
//! A backend behaves like a browser storage area: string keys, string values,
//! a byte quota, and the possibility of being switched off entirely.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::error::{StorageError, StorageResult};

/// One key/value tier.
pub trait StorageBackend: Send + Sync {
    fn get(&self, key: &str) -> StorageResult<Option<String>>;
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;
    fn remove(&self, key: &str) -> StorageResult<()>;
    /// Snapshot of every key currently stored.
    fn keys(&self) -> StorageResult<Vec<String>>;
}

/// Size of a stored entry as the quota sees it: UTF-8 bytes of key plus value.
pub fn entry_bytes(key: &str, value: &str) -> usize {
    key.len() + value.len()
}

/// Check whether replacing `key` with `value` fits in `quota`.
pub(crate) fn check_quota(
    entries: &BTreeMap<String, String>,
    quota: Option<usize>,
    key: &str,
    value: &str,
) -> StorageResult<()> {
    let Some(quota) = quota else {
        return Ok(());
    };
    let used: usize = entries
        .iter()
        .filter(|(k, _)| k.as_str() != key)
        .map(|(k, v)| entry_bytes(k, v))
        .sum();
    let needed = entry_bytes(key, value);
    let available = quota.saturating_sub(used);
    if needed > available {
        return Err(StorageError::QuotaExceeded {
            key: key.to_string(),
            needed,
            available,
        });
    }
    Ok(())
}

pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// In-memory tier with an optional byte quota.
#[derive(Debug, Default)]
pub struct MemoryBackend {
    entries: Mutex<BTreeMap<String, String>>,
    quota: Option<usize>,
    disabled: bool,
}

impl MemoryBackend {
    /// Unbounded in-memory tier.
    pub fn new() -> Self {
        Self::default()
    }

    /// In-memory tier that rejects writes once `quota` bytes are in use.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..Self::default()
        }
    }

    /// A tier whose every operation fails, like storage in a locked-down
    /// private browsing profile.
    pub fn unavailable() -> Self {
        Self {
            disabled: true,
            ..Self::default()
        }
    }

    /// Bytes currently counted against the quota.
    pub fn used_bytes(&self) -> usize {
        lock(&self.entries)
            .iter()
            .map(|(k, v)| entry_bytes(k, v))
            .sum()
    }

    fn guard(&self) -> StorageResult<()> {
        if self.disabled {
            return Err(StorageError::Unavailable("memory tier disabled".into()));
        }
        Ok(())
    }
}

impl StorageBackend for MemoryBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        self.guard()?;
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        self.guard()?;
        let mut entries = lock(&self.entries);
        check_quota(&entries, self.quota, key, value)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        self.guard()?;
        lock(&self.entries).remove(key);
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.guard()?;
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_set_get_remove() {
        let backend = MemoryBackend::new();
        backend.set("a", "1").unwrap();
        assert_eq!(backend.get("a").unwrap(), Some("1".into()));
        backend.remove("a").unwrap();
        assert_eq!(backend.get("a").unwrap(), None);
    }

    #[test]
    fn quota_counts_utf8_bytes() {
        // "é" is one char but two bytes.
        let backend = MemoryBackend::with_quota(4);
        backend.set("k", "é").unwrap();
        assert_eq!(backend.used_bytes(), 3);
        let err = backend.set("k2", "é").unwrap_err();
        assert!(err.is_quota_exceeded());
    }

    #[test]
    fn overwrite_does_not_double_count() {
        let backend = MemoryBackend::with_quota(6);
        backend.set("k", "12345").unwrap();
        backend.set("k", "54321").unwrap();
        assert_eq!(backend.get("k").unwrap(), Some("54321".into()));
    }

    #[test]
    fn unavailable_backend_errors() {
        let backend = MemoryBackend::unavailable();
        assert!(matches!(
            backend.get("a"),
            Err(StorageError::Unavailable(_))
        ));
        assert!(backend.set("a", "1").is_err());
        assert!(backend.keys().is_err());
    }
}
