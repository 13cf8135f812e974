use thiserror::Error;

/// Failures of the persistence layer.
///
/// The store never hands these to its callers; they are logged and the
/// operation degrades to memory-only or becomes a no-op.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage backend is unavailable")]
    Unavailable,
    #[error("storage i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("persisted data is corrupted: {0}")]
    Corrupted(#[from] serde_json::Error),
    #[error("schema version mismatch: found {found:?}, expected {expected:?}")]
    VersionMismatch {
        found: Option<String>,
        expected: String,
    },
    #[error("storage lock poisoned")]
    Poisoned,
}

pub type StorageResult<T> = Result<T, StorageError>;
