//! File-backed persistent tier.
//!
//! On-disk format:
//! ```text
//! [crc32: u32 LE][json object of key → value]
//! ```
//!
//! The whole map is rewritten on every mutation (write to a sibling temp file,
//! then rename). A checksum or JSON mismatch on open is treated as corruption:
//! the store starts empty rather than trusting a partial document.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crc32fast::Hasher;
use tracing::warn;

use super::backend::{check_quota, lock, StorageBackend};
use super::error::{StorageError, StorageResult};

/// Persistent key/value tier stored in a single file.
pub struct FileBackend {
    entries: Mutex<BTreeMap<String, String>>,
    path: PathBuf,
    quota: Option<usize>,
}

impl FileBackend {
    /// Open or create the store file at `path`.
    pub fn open(path: &Path) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries = match fs::read(path) {
            Ok(bytes) => decode(&bytes).unwrap_or_else(|e| {
                warn!(path = %path.display(), error = %e, "discarding corrupted store file");
                BTreeMap::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self {
            entries: Mutex::new(entries),
            path: path.to_path_buf(),
            quota: None,
        })
    }

    /// Cap the total UTF-8 bytes this tier will hold.
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self, entries: &BTreeMap<String, String>) -> StorageResult<()> {
        let bytes = encode(entries)?;
        let tmp = self.path.with_extension("tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

fn checksum(body: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(body);
    hasher.finalize()
}

fn encode(entries: &BTreeMap<String, String>) -> StorageResult<Vec<u8>> {
    let body = serde_json::to_vec(entries)?;
    let mut buf = Vec::with_capacity(4 + body.len());
    buf.extend_from_slice(&checksum(&body).to_le_bytes());
    buf.extend_from_slice(&body);
    Ok(buf)
}

fn decode(bytes: &[u8]) -> StorageResult<BTreeMap<String, String>> {
    if bytes.is_empty() {
        return Ok(BTreeMap::new());
    }
    if bytes.len() < 4 {
        return Err(StorageError::Corrupted("truncated header".into()));
    }
    let (header, body) = bytes.split_at(4);
    let stored = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
    let actual = checksum(body);
    if stored != actual {
        return Err(StorageError::Corrupted(format!(
            "checksum mismatch: stored {stored:08x}, computed {actual:08x}"
        )));
    }
    Ok(serde_json::from_slice(body)?)
}

impl StorageBackend for FileBackend {
    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(lock(&self.entries).get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        check_quota(&entries, self.quota, key, value)?;
        let previous = entries.insert(key.to_string(), value.to_string());
        if let Err(e) = self.flush(&entries) {
            // Keep memory and disk in agreement.
            match previous {
                Some(old) => entries.insert(key.to_string(), old),
                None => entries.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<()> {
        let mut entries = lock(&self.entries);
        if entries.remove(key).is_some() {
            self.flush(&entries)?;
        }
        Ok(())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        Ok(lock(&self.entries).keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn file_backend_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        {
            let backend = FileBackend::open(&path).unwrap();
            backend.set("menu-tree:A", "[]").unwrap();
            backend.set("other", "x").unwrap();
            backend.remove("other").unwrap();
        }
        let backend = FileBackend::open(&path).unwrap();
        assert_eq!(backend.get("menu-tree:A").unwrap(), Some("[]".into()));
        assert_eq!(backend.get("other").unwrap(), None);
    }

    #[test]
    fn corrupted_file_starts_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("store.bin");
        {
            let backend = FileBackend::open(&path).unwrap();
            backend.set("k", "v").unwrap();
        }
        let mut bytes = fs::read(&path).unwrap();
        let last = bytes.len() - 2;
        bytes[last] ^= 0xff;
        fs::write(&path, bytes).unwrap();

        let backend = FileBackend::open(&path).unwrap();
        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn quota_rejects_oversized_write() {
        let dir = TempDir::new().unwrap();
        let backend = FileBackend::open(&dir.path().join("s.bin"))
            .unwrap()
            .with_quota(8);
        backend.set("a", "1234").unwrap();
        let err = backend.set("b", "1234567").unwrap_err();
        assert!(err.is_quota_exceeded());
        assert_eq!(backend.get("b").unwrap(), None);
    }

    #[test]
    fn creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/deeper/store.bin");
        let backend = FileBackend::open(&path).unwrap();
        backend.set("k", "v").unwrap();
        assert!(path.exists());
    }
}
