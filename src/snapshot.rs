//! Persisted form of the reveal collection.
//!
//! The collection lives under `StoreConfig::data_key` as a JSON array of
//! `{ "id": <project id>, "revealedAt": <epoch millis> }` objects, in
//! insertion order. A schema tag under `StoreConfig::version_key` guards the
//! format; there is no migration, a different tag wipes the data.

use crate::{
    config::StoreConfig,
    error::{StorageError, StorageResult},
    storage::Storage,
    store::RevealedEntry,
};

/// Fails with [`StorageError::VersionMismatch`] unless the stored tag
/// equals the configured schema version.
pub fn check_version(storage: &dyn Storage, config: &StoreConfig) -> StorageResult<()> {
    let found = storage.get(&config.version_key)?;
    if found.as_deref() == Some(config.schema_version.as_str()) {
        Ok(())
    } else {
        Err(StorageError::VersionMismatch {
            found,
            expected: config.schema_version.clone(),
        })
    }
}

/// Drop the persisted collection and stamp the current schema version.
pub fn reset(storage: &dyn Storage, config: &StoreConfig) -> StorageResult<()> {
    storage.remove(&config.data_key)?;
    storage.set(&config.version_key, &config.schema_version)
}

pub fn read_entries(storage: &dyn Storage, config: &StoreConfig) -> StorageResult<Vec<RevealedEntry>> {
    match storage.get(&config.data_key)? {
        Some(data) => decode_entries(&data),
        None => Ok(Vec::new()),
    }
}

/// Write `entries`, keeping only the newest `max_items`.
pub fn write_entries(
    storage: &dyn Storage,
    config: &StoreConfig,
    entries: &[RevealedEntry],
) -> StorageResult<()> {
    let start = entries.len().saturating_sub(config.max_items);
    storage.set(&config.data_key, &encode_entries(&entries[start..])?)
}

pub fn decode_entries(data: &str) -> StorageResult<Vec<RevealedEntry>> {
    Ok(serde_json::from_str(data)?)
}

pub fn encode_entries(entries: &[RevealedEntry]) -> StorageResult<String> {
    Ok(serde_json::to_string(entries)?)
}

/// Bytes taken by the persisted collection and its version tag.
pub fn persisted_size(storage: &dyn Storage, config: &StoreConfig) -> StorageResult<usize> {
    let data = storage.get(&config.data_key)?.map_or(0, |s| s.len());
    let version = storage.get(&config.version_key)?.map_or(0, |s| s.len());
    Ok(data + version)
}
