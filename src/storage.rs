//! Page-scoped key-value storage used to mirror the evaluation cache across reloads.
//!
//! Mirroring is best-effort: the cache ignores every [`StorageError`] and keeps working from
//! memory.
use std::{collections::HashMap, sync::RwLock};

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("storage is unavailable")]
    Unavailable,
    #[error("storage quota exceeded")]
    QuotaExceeded,
}

/// A session-scoped key-value store.
///
/// Called while the evaluation cache state is locked, so implementations must not call back
/// into the cache.
pub trait SessionStorage: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: String) -> Result<(), StorageError>;
    /// Remove every entry.
    fn clear(&self) -> Result<(), StorageError>;
}

/// Storage that keeps nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopStorage;

impl SessionStorage for NoopStorage {
    fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    fn set(&self, _key: &str, _value: String) -> Result<(), StorageError> {
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// `MemoryStorage` is a `Sync` in-memory store that outlives individual clients, e.g. to share
/// cached evaluations between clients created one after another in the same process.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RwLock<HashMap<String, String>>,
    /// Maximum total size of stored values, in bytes.
    quota: Option<usize>,
}

impl MemoryStorage {
    pub fn new() -> MemoryStorage {
        MemoryStorage::default()
    }

    /// Create a store that rejects writes once the stored values exceed `quota` bytes.
    pub fn with_quota(quota: usize) -> MemoryStorage {
        MemoryStorage {
            entries: RwLock::default(),
            quota: Some(quota),
        }
    }
}

impl SessionStorage for MemoryStorage {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        // Err() is possible only if the lock is poisoned (writer panicked while holding the lock).
        let entries = self.entries.read().map_err(|_| StorageError::Unavailable)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: String) -> Result<(), StorageError> {
        let mut entries = self.entries.write().map_err(|_| StorageError::Unavailable)?;

        if let Some(quota) = self.quota {
            let used: usize = entries
                .iter()
                .filter(|(k, _)| k.as_str() != key)
                .map(|(_, v)| v.len())
                .sum();
            if used + value.len() > quota {
                return Err(StorageError::QuotaExceeded);
            }
        }

        entries.insert(key.to_owned(), value);
        Ok(())
    }

    fn clear(&self) -> Result<(), StorageError> {
        self.entries
            .write()
            .map_err(|_| StorageError::Unavailable)?
            .clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    #[test]
    fn can_set_entries_from_another_thread() {
        let storage = Arc::new(MemoryStorage::new());

        {
            let storage = storage.clone();
            let _ = std::thread::spawn(move || {
                storage.set("key", "value".to_owned()).unwrap();
            })
            .join();
        }

        assert_eq!(storage.get("key").unwrap().as_deref(), Some("value"));
        storage.clear().unwrap();
        assert_eq!(storage.get("key").unwrap(), None);
    }

    #[test]
    fn quota_rejects_oversized_writes() {
        let storage = MemoryStorage::with_quota(8);

        storage.set("a", "1234".to_owned()).unwrap();
        storage.set("a", "12345678".to_owned()).unwrap();
        assert_eq!(
            storage.set("b", "1".to_owned()),
            Err(StorageError::QuotaExceeded)
        );
        assert_eq!(storage.get("b").unwrap(), None);
    }
}
