//! Persistent key-value storage abstraction.
//!
//! The host (a browser extension background context) supplies durable
//! `get`/`set`/`remove` with no native transactions; the engine treats
//! read-mutate-write of whole blobs as its transaction boundary. Values are
//! serialized to `serde_json::Value` before the store is touched, so a
//! serialization failure can never leave a partial write behind.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::{ExclusionsError, Result, StorageErrorKind};

/// At-least-once-durable key-value store.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Value>>;
    fn set(&self, key: &str, value: Value) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-memory store, used in tests and as a default for hosts that persist
/// elsewhere.
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl KvStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Value) -> Result<()> {
        self.data.write().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.data.write().remove(key);
        Ok(())
    }
}

/// Read and deserialize a stored value. Missing keys are `Ok(None)`.
pub fn read_value<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    let value = store
        .get(key)
        .map_err(|e| as_storage_error(StorageErrorKind::Read, key, e))?;
    match value {
        Some(value) => Ok(Some(serde_json::from_value(value)?)),
        None => Ok(None),
    }
}

/// Serialize and store a value. Serialization happens before the write.
pub fn write_value<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let value = serde_json::to_value(value)?;
    store
        .set(key, value)
        .map_err(|e| as_storage_error(StorageErrorKind::Write, key, e))
}

/// Host stores fail with their own error types (io, quota). Classify
/// anything that is not already a storage error under the operation's kind.
fn as_storage_error(kind: StorageErrorKind, key: &str, err: ExclusionsError) -> ExclusionsError {
    match err {
        e @ ExclusionsError::StorageError { .. } => e,
        other => ExclusionsError::storage(kind, format!("{}: {}", key, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Blob {
        name: String,
        count: u32,
    }

    #[test]
    fn test_write_then_read_round_trip() {
        let store = MemoryStore::new();
        let blob = Blob {
            name: "x".into(),
            count: 3,
        };
        write_value(&store, "k", &blob).unwrap();
        let back: Option<Blob> = read_value(&store, "k").unwrap();
        assert_eq!(back, Some(blob));
    }

    #[test]
    fn test_read_missing_key_is_none() {
        let store = MemoryStore::new();
        let back: Option<Blob> = read_value(&store, "missing").unwrap();
        assert!(back.is_none());
    }

    #[test]
    fn test_remove() {
        let store = MemoryStore::new();
        write_value(&store, "k", &1u32).unwrap();
        store.remove("k").unwrap();
        assert!(store.get("k").unwrap().is_none());
    }

    #[test]
    fn test_host_failure_classified_as_storage_error() {
        struct BrokenStore;

        impl KvStore for BrokenStore {
            fn get(&self, _key: &str) -> Result<Option<Value>> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into())
            }
            fn set(&self, _key: &str, _value: Value) -> Result<()> {
                Err(std::io::Error::new(std::io::ErrorKind::Other, "disk gone").into())
            }
            fn remove(&self, _key: &str) -> Result<()> {
                Ok(())
            }
        }

        let read: Result<Option<u32>> = read_value(&BrokenStore, "k");
        assert!(matches!(
            read,
            Err(ExclusionsError::StorageError {
                kind: StorageErrorKind::Read,
                ..
            })
        ));
        let write = write_value(&BrokenStore, "k", &1u32);
        assert!(matches!(
            write,
            Err(ExclusionsError::StorageError {
                kind: StorageErrorKind::Write,
                ..
            })
        ));
    }

    #[test]
    fn test_shape_mismatch_is_serialization_error() {
        let store = MemoryStore::new();
        write_value(&store, "k", &"just a string").unwrap();
        let back: crate::error::Result<Option<Blob>> = read_value(&store, "k");
        assert!(matches!(
            back,
            Err(crate::error::ExclusionsError::Serialization(_))
        ));
    }
}
