use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced by key-value store implementations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Underlying storage failure.
    #[error("storage failure: {reason}")]
    Storage { reason: String },
}

/// A primitive value as held by a backing store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum StoredValue {
    Bool(bool),
    Int(i32),
    Float(f32),
    Text(String),
}

/// Durable storage of primitive values under opaque string keys.
///
/// Keys and text values arrive already hashed/encrypted; implementations must
/// treat them as opaque. Writes are visible to reads immediately, while
/// durability is only required after [`KeyValueStore::flush`].
pub trait KeyValueStore: Send + Sync {
    fn has_key(&self, key: &str) -> Result<bool, StoreError>;

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError>;
    fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError>;
    fn set_float(&self, key: &str, value: f32) -> Result<(), StoreError>;
    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Returns `default` when the key is absent or holds another type.
    fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError>;
    fn get_int(&self, key: &str, default: i32) -> Result<i32, StoreError>;
    fn get_float(&self, key: &str, default: f32) -> Result<f32, StoreError>;
    fn get_string(&self, key: &str, default: &str) -> Result<String, StoreError>;

    /// Remove a key and its value (idempotent).
    fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Remove every key held by this store.
    fn delete_all(&self) -> Result<(), StoreError>;

    /// Make all pending writes durable.
    fn flush(&self) -> Result<(), StoreError>;
}

/// In-memory store for tests and ephemeral sessions. Nothing survives the
/// process; `flush` only counts calls so callers can assert on persistence.
#[derive(Debug, Default, Clone)]
pub struct InMemoryStore {
    inner: Arc<Mutex<HashMap<String, StoredValue>>>,
    flushes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw value stored under an (already obfuscated) key.
    pub fn raw(&self, key: &str) -> Option<StoredValue> {
        self.lock().ok().and_then(|map| map.get(key).cloned())
    }

    /// Raw keys currently held, in no particular order.
    pub fn raw_keys(&self) -> Vec<String> {
        self.lock()
            .map(|map| map.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.lock().map(|map| map.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// How many times `flush` has been called.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<String, StoredValue>>, StoreError> {
        self.inner.lock().map_err(|err| StoreError::Storage {
            reason: format!("lock poisoned: {err}"),
        })
    }

    fn insert(&self, key: &str, value: StoredValue) -> Result<(), StoreError> {
        self.lock()?.insert(key.to_string(), value);
        Ok(())
    }

    fn get(&self, key: &str) -> Result<Option<StoredValue>, StoreError> {
        Ok(self.lock()?.get(key).cloned())
    }
}

impl KeyValueStore for InMemoryStore {
    fn has_key(&self, key: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.contains_key(key))
    }

    fn set_bool(&self, key: &str, value: bool) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Bool(value))
    }

    fn set_int(&self, key: &str, value: i32) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Int(value))
    }

    fn set_float(&self, key: &str, value: f32) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Float(value))
    }

    fn set_string(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.insert(key, StoredValue::Text(value.to_string()))
    }

    fn get_bool(&self, key: &str, default: bool) -> Result<bool, StoreError> {
        match self.get(key)? {
            Some(StoredValue::Bool(value)) => Ok(value),
            _ => Ok(default),
        }
    }

    fn get_int(&self, key: &str, default: i32) -> Result<i32, StoreError> {
        match self.get(key)? {
            Some(StoredValue::Int(value)) => Ok(value),
            _ => Ok(default),
        }
    }

    fn get_float(&self, key: &str, default: f32) -> Result<f32, StoreError> {
        match self.get(key)? {
            Some(StoredValue::Float(value)) => Ok(value),
            _ => Ok(default),
        }
    }

    fn get_string(&self, key: &str, default: &str) -> Result<String, StoreError> {
        match self.get(key)? {
            Some(StoredValue::Text(value)) => Ok(value),
            _ => Ok(default.to_string()),
        }
    }

    fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.lock()?.remove(key);
        Ok(())
    }

    fn delete_all(&self) -> Result<(), StoreError> {
        self.lock()?.clear();
        Ok(())
    }

    fn flush(&self) -> Result<(), StoreError> {
        self.flushes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
