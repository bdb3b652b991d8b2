//! Storage-tier error types.
//!
//! Backend calls never surface these through `KvStore`, which turns each one
//! into a silent miss, no-op, or dropped write. Only opening a backend
//! reports them.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage tier unavailable: {0}")]
    Unavailable(String),

    #[error("quota exceeded writing {key} ({needed} bytes, {available} available)")]
    QuotaExceeded {
        key: String,
        needed: usize,
        available: usize,
    },

    #[error("store file corrupted: {0}")]
    Corrupted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl StorageError {
    pub fn is_quota_exceeded(&self) -> bool {
        matches!(self, Self::QuotaExceeded { .. })
    }
}

pub type StorageResult<T> = Result<T, StorageError>;
