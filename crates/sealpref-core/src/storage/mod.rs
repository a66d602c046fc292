//! Backing store contract consumed by the encrypted layer.

mod kv_store;

pub use kv_store::{InMemoryStore, KeyValueStore, StoreError, StoredValue};
