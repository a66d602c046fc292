//! Typed facade over an [`EncryptedStore`]: primitive values and versioned
//! records addressed by an enumerated key domain.

use std::{fmt, marker::PhantomData, sync::Arc};

use sealpref_core::{
    key::KeyDomain,
    record::{self, Record, RecordError, RecordWriter, Tracked},
    storage::KeyValueStore,
};
use sealpref_storage::encrypted_store::{EncryptedStore, EncryptedStoreError};
use thiserror::Error;
use tracing::{debug, instrument, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordStoreError {
    #[error(transparent)]
    Storage(#[from] EncryptedStoreError),
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Supplies the namespace prepended to every logical key. Re-evaluated on
/// each operation, so it can follow runtime state such as the active slot.
pub type KeyPrefix = Arc<dyn Fn() -> String + Send + Sync>;

/// Stores primitives and [`Record`]s under keys of domain `K`.
///
/// Several record stores may share one [`EncryptedStore`]; distinct prefixes
/// keep their namespaces apart.
pub struct RecordStore<K: KeyDomain, S: KeyValueStore> {
    store: Arc<EncryptedStore<S>>,
    prefix: KeyPrefix,
    domain: PhantomData<fn() -> K>,
}

impl<K: KeyDomain, S: KeyValueStore> RecordStore<K, S> {
    pub fn new(
        store: impl Into<Arc<EncryptedStore<S>>>,
        prefix: impl Fn() -> String + Send + Sync + 'static,
    ) -> Self {
        Self {
            store: store.into(),
            prefix: Arc::new(prefix),
            domain: PhantomData,
        }
    }

    /// Record store with a fixed namespace.
    pub fn with_prefix(store: impl Into<Arc<EncryptedStore<S>>>, prefix: impl Into<String>) -> Self {
        let prefix = prefix.into();
        Self::new(store, move || prefix.clone())
    }

    pub fn store(&self) -> &EncryptedStore<S> {
        &self.store
    }

    /// Logical (pre-hash) key for `key` under the current prefix.
    pub fn logical_key(&self, key: K) -> String {
        format!("{}{}", (self.prefix)(), key.token())
    }

    fn record_key<R: Record>(&self) -> Result<String, RecordStoreError> {
        let token = record::key_token::<R, K>()?;
        Ok(format!("{}{token}", (self.prefix)()))
    }

    pub fn has_key(&self, key: K) -> Result<bool, RecordStoreError> {
        Ok(self.store.has_key(&self.logical_key(key))?)
    }

    pub fn set_bool(&self, key: K, value: bool) -> Result<(), RecordStoreError> {
        Ok(self.store.set_bool(&self.logical_key(key), value)?)
    }

    pub fn set_int(&self, key: K, value: i32) -> Result<(), RecordStoreError> {
        Ok(self.store.set_int(&self.logical_key(key), value)?)
    }

    pub fn set_float(&self, key: K, value: f32) -> Result<(), RecordStoreError> {
        Ok(self.store.set_float(&self.logical_key(key), value)?)
    }

    pub fn set_string(&self, key: K, value: &str) -> Result<(), RecordStoreError> {
        Ok(self.store.set_string(&self.logical_key(key), value)?)
    }

    pub fn set_bytes(&self, key: K, value: &[u8]) -> Result<(), RecordStoreError> {
        Ok(self.store.set_bytes(&self.logical_key(key), value)?)
    }

    pub fn get_bool(&self, key: K, default: bool) -> Result<bool, RecordStoreError> {
        Ok(self.store.get_bool(&self.logical_key(key), default)?)
    }

    pub fn get_int(&self, key: K, default: i32) -> Result<i32, RecordStoreError> {
        Ok(self.store.get_int(&self.logical_key(key), default)?)
    }

    pub fn get_float(&self, key: K, default: f32) -> Result<f32, RecordStoreError> {
        Ok(self.store.get_float(&self.logical_key(key), default)?)
    }

    pub fn get_string(&self, key: K, default: &str) -> Result<String, RecordStoreError> {
        Ok(self.store.get_string(&self.logical_key(key), default)?)
    }

    pub fn get_bytes(&self, key: K) -> Result<Option<Vec<u8>>, RecordStoreError> {
        Ok(self.store.get_bytes(&self.logical_key(key))?)
    }

    pub fn delete(&self, key: K) -> Result<(), RecordStoreError> {
        Ok(self.store.delete(&self.logical_key(key))?)
    }

    /// Encode `record` and store it under the key its type declares for `K`.
    #[instrument(skip_all, fields(record = record::record_name::<R>()))]
    pub fn set_record<R: Record>(&self, record: &mut Tracked<R>) -> Result<(), RecordStoreError> {
        let key = self.record_key::<R>()?;
        let text = record::encode(record)?;
        self.store.set_string(&key, &text)?;
        Ok(())
    }

    /// Load the record of type `R`, creating and initializing it when nothing
    /// is stored. Decode, decrypt and key-declaration errors are returned.
    #[instrument(skip_all, fields(record = record::record_name::<R>()))]
    pub fn get_record<R: Record>(&self) -> Result<Tracked<R>, RecordStoreError> {
        let key = self.record_key::<R>()?;
        match self.store.read_string(&key)? {
            Some(text) if !text.is_empty() => Ok(record::decode(&text)?),
            _ => {
                debug!("no stored record, creating");
                Ok(record::create())
            }
        }
    }

    /// Like [`RecordStore::get_record`], but any failure is logged and
    /// replaced by a freshly initialized record. The flag reports success.
    pub fn get_record_or_init<R: Record>(&self) -> (Tracked<R>, bool) {
        match self.get_record::<R>() {
            Ok(record) => (record, true),
            Err(err) => {
                warn!(
                    record = record::record_name::<R>(),
                    error = %err,
                    "failed to load record, starting fresh"
                );
                (record::create(), false)
            }
        }
    }

    /// Delete the value of every key in `K` under the current prefix.
    #[instrument(skip_all)]
    pub fn delete_keys(&self) -> Result<(), RecordStoreError> {
        for key in K::all() {
            self.delete(key)?;
        }
        Ok(())
    }

    pub fn flush(&self) -> Result<(), RecordStoreError> {
        Ok(self.store.flush()?)
    }
}

impl<K: KeyDomain, S: KeyValueStore> RecordWriter for RecordStore<K, S> {
    type Error = RecordStoreError;

    fn set_record<R: Record>(&self, record: &mut Tracked<R>) -> Result<(), Self::Error> {
        RecordStore::set_record(self, record)
    }

    fn flush(&self) -> Result<(), Self::Error> {
        RecordStore::flush(self)
    }
}

impl<K: KeyDomain, S: KeyValueStore> Clone for RecordStore<K, S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            prefix: Arc::clone(&self.prefix),
            domain: PhantomData,
        }
    }
}

impl<K: KeyDomain, S: KeyValueStore> fmt::Debug for RecordStore<K, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordStore")
            .field("domain", &K::DOMAIN)
            .field("prefix", &(self.prefix)())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use sealpref_core::{
        key::KeyDeclaration,
        record::Origin,
        storage::{InMemoryStore, KeyValueStore},
    };
    use sealpref_storage::{
        cipher::{Cipher, CipherConfig, CipherError},
        file_store::FileStore,
    };
    use serde::{Deserialize, Serialize};
    use strum::{AsRefStr, EnumIter};

    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, EnumIter, AsRefStr)]
    enum SaveKey {
        Bool,
        String,
        Int,
        Float,
        Bytes,
        Data,
    }

    impl KeyDomain for SaveKey {
        const DOMAIN: &'static str = "save_test::SaveKey";
    }

    #[derive(Debug, Clone, Copy, EnumIter, AsRefStr)]
    enum OtherKey {
        Data,
    }

    impl KeyDomain for OtherKey {
        const DOMAIN: &'static str = "save_test::OtherKey";
    }

    macro_rules! test_data {
        ($name:ident, $version:literal) => {
            #[derive(Debug, Default, Serialize, Deserialize)]
            #[serde(default)]
            struct $name {
                test_string: String,
                #[serde(skip)]
                init_check: bool,
                #[serde(skip)]
                old_version: u32,
                #[serde(skip)]
                migrations: u32,
            }

            impl Record for $name {
                const VERSION: u32 = $version;

                fn key_declarations() -> Vec<KeyDeclaration> {
                    vec![KeyDeclaration::of(SaveKey::Data)]
                }

                fn on_init(&mut self) {
                    self.init_check = true;
                }

                fn on_change_version(&mut self, old_version: u32) {
                    self.old_version = old_version;
                    self.migrations += 1;
                }
            }
        };
    }

    test_data!(TestDataV1, 1);
    test_data!(TestDataV2, 2);

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct Undeclared {
        value: i32,
    }

    impl Record for Undeclared {}

    #[derive(Debug, Default, Serialize, Deserialize)]
    struct ForeignData {
        value: i32,
    }

    impl Record for ForeignData {
        fn key_declarations() -> Vec<KeyDeclaration> {
            vec![KeyDeclaration::of(OtherKey::Data)]
        }
    }

    fn encrypted(backend: InMemoryStore) -> EncryptedStore<InMemoryStore> {
        let config = CipherConfig::new(&[0x42; 32], &[0x24; 16]).expect("config");
        EncryptedStore::new(backend, Cipher::new(config))
    }

    fn context(prefix: &str) -> RecordStore<SaveKey, InMemoryStore> {
        RecordStore::with_prefix(encrypted(InMemoryStore::new()), prefix)
    }

    #[test]
    fn primitive_values_round_trip_and_reset() {
        let save = context("Test1");

        assert!(!save.get_bool(SaveKey::Bool, false).expect("get"));
        save.set_bool(SaveKey::Bool, true).expect("set");
        assert!(save.get_bool(SaveKey::Bool, false).expect("get"));

        assert_eq!(save.get_string(SaveKey::String, "DefString").expect("get"), "DefString");
        save.set_string(SaveKey::String, "TestTest").expect("set");
        assert_eq!(save.get_string(SaveKey::String, "").expect("get"), "TestTest");

        assert_eq!(save.get_int(SaveKey::Int, 5).expect("get"), 5);
        save.set_int(SaveKey::Int, 22).expect("set");
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 22);

        assert_eq!(save.get_float(SaveKey::Float, 5.3).expect("get"), 5.3);
        save.set_float(SaveKey::Float, 22.3).expect("set");
        assert_eq!(save.get_float(SaveKey::Float, 0.0).expect("get"), 22.3);

        assert_eq!(save.get_bytes(SaveKey::Bytes).expect("get"), None);
        save.set_bytes(SaveKey::Bytes, b"TTTTTest").expect("set");
        assert_eq!(
            save.get_bytes(SaveKey::Bytes).expect("get").as_deref(),
            Some(&b"TTTTTest"[..])
        );

        save.flush().expect("flush");

        save.delete(SaveKey::Bool).expect("delete");
        assert!(!save.get_bool(SaveKey::Bool, false).expect("get"));
        save.set_bool(SaveKey::Bool, true).expect("set");
        assert!(save.get_bool(SaveKey::Bool, false).expect("get"));

        save.delete_keys().expect("delete_keys");
        assert!(!save.get_bool(SaveKey::Bool, false).expect("get"));
        assert!(save.get_string(SaveKey::String, "").expect("get").is_empty());
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 0);
        assert_eq!(save.get_float(SaveKey::Float, 0.0).expect("get"), 0.0);
        assert_eq!(save.get_bytes(SaveKey::Bytes).expect("get"), None);
    }

    #[test]
    fn record_lifecycle_with_version_bump() {
        let save = context("Test2");

        for _ in 0..2 {
            let (fresh, ok) = save.get_record_or_init::<TestDataV1>();
            assert!(ok);
            assert!(fresh.test_string.is_empty());
            assert!(fresh.init_check);
            assert_eq!(fresh.old_version, 0);
            assert_eq!(fresh.origin(), Origin::Created);
        }
        let (mut data, _) = save.get_record_or_init::<TestDataV1>();
        data.test_string = "Test".into();
        data.mark_dirty(&save, false).expect("mark dirty");
        assert_eq!(save.store().backend().flush_count(), 0);

        let (mut data, ok) = save.get_record_or_init::<TestDataV1>();
        assert!(ok);
        assert_eq!(data.test_string, "Test");
        assert!(!data.init_check);
        assert_eq!(data.old_version, 0);
        assert_eq!(data.origin(), Origin::Loaded);
        data.mark_dirty(&save, true).expect("mark dirty");
        assert_eq!(save.store().backend().flush_count(), 1);

        let (mut data, ok) = save.get_record_or_init::<TestDataV2>();
        assert!(ok);
        assert_eq!(data.test_string, "Test");
        assert!(!data.init_check);
        assert_eq!(data.old_version, 1);
        assert_eq!(data.migrations, 1);
        assert_eq!(data.stored_version(), 2);

        data.test_string = "TestTest".into();
        data.mark_dirty(&save, true).expect("mark dirty");

        let (data, ok) = save.get_record_or_init::<TestDataV2>();
        assert!(ok);
        assert_eq!(data.test_string, "TestTest");
        assert!(!data.init_check);
        assert_eq!(data.old_version, 0);
        assert_eq!(data.migrations, 0);
    }

    #[test]
    fn stale_payload_migrates_on_every_load_until_rewritten() {
        let save = context("stale");
        let mut data = save.get_record::<TestDataV1>().expect("create");
        save.set_record(&mut data).expect("set");

        for _ in 0..2 {
            let loaded = save.get_record::<TestDataV2>().expect("load");
            assert_eq!(loaded.migrations, 1);
            assert_eq!(loaded.old_version, 1);
        }
    }

    #[test]
    fn prefixes_keep_namespaces_apart() {
        let shared = Arc::new(encrypted(InMemoryStore::new()));
        let four: RecordStore<SaveKey, _> = RecordStore::with_prefix(Arc::clone(&shared), "Test4");
        let five: RecordStore<SaveKey, _> = RecordStore::with_prefix(Arc::clone(&shared), "Test5");

        four.set_bool(SaveKey::Bool, true).expect("set");
        four.flush().expect("flush");
        assert!(!five.get_bool(SaveKey::Bool, false).expect("get"));

        five.set_int(SaveKey::Int, 9).expect("set");
        five.delete_keys().expect("delete_keys");
        assert!(four.get_bool(SaveKey::Bool, false).expect("get"));
        assert_ne!(four.logical_key(SaveKey::Bool), five.logical_key(SaveKey::Bool));
    }

    #[test]
    fn prefix_is_evaluated_on_every_call() {
        let slot = Arc::new(Mutex::new(String::from("slot1/")));
        let current = Arc::clone(&slot);
        let save: RecordStore<SaveKey, _> = RecordStore::new(encrypted(InMemoryStore::new()), move || {
            current.lock().expect("lock").clone()
        });

        save.set_int(SaveKey::Int, 1).expect("set");
        *slot.lock().expect("lock") = String::from("slot2/");
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 0);
        save.set_int(SaveKey::Int, 2).expect("set");

        *slot.lock().expect("lock") = String::from("slot1/");
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 1);
    }

    #[test]
    fn delete_keys_is_idempotent() {
        let save = context("idempotent");
        save.set_bool(SaveKey::Bool, true).expect("set");
        save.set_string(SaveKey::String, "value").expect("set");
        let mut data = save.get_record::<TestDataV1>().expect("create");
        save.set_record(&mut data).expect("set record");

        save.delete_keys().expect("first");
        let backend_len = save.store().backend().len();
        save.delete_keys().expect("second");

        assert_eq!(backend_len, 0);
        assert_eq!(save.store().backend().len(), 0);
        assert!(!save.has_key(SaveKey::Data).expect("has_key"));
    }

    #[test]
    fn corrupted_record_payload_falls_back_to_fresh() {
        let save = context("corrupt");
        save.set_string(SaveKey::Data, "not json").expect("set");

        let err = save.get_record::<TestDataV1>().expect_err("decode failure");
        assert!(matches!(
            err,
            RecordStoreError::Record(RecordError::DecodeFailure { .. })
        ));

        let (data, ok) = save.get_record_or_init::<TestDataV1>();
        assert!(!ok);
        assert!(data.init_check);
        assert!(data.test_string.is_empty());
        assert_eq!(data.origin(), Origin::Created);
    }

    #[test]
    fn undecryptable_record_payload_falls_back_to_fresh() {
        let save = context("garbage");
        let hashed = save.store().hashed_key(&save.logical_key(SaveKey::Data));
        save.store()
            .backend()
            .set_string(&hashed, "bm90IGNpcGhlcnRleHQ=")
            .expect("write garbage");

        let err = save.get_record::<TestDataV1>().expect_err("cipher failure");
        assert!(matches!(
            err,
            RecordStoreError::Storage(EncryptedStoreError::Cipher(
                CipherError::MalformedCiphertext { .. }
            ))
        ));

        let (data, ok) = save.get_record_or_init::<TestDataV1>();
        assert!(!ok);
        assert!(data.init_check);
    }

    #[test]
    fn key_declaration_errors_surface_on_first_use() {
        let save = context("decl");

        let err = save.get_record::<Undeclared>().expect_err("missing");
        assert!(matches!(
            err,
            RecordStoreError::Record(RecordError::MissingKeyDeclaration { .. })
        ));

        let mut foreign = sealpref_core::record::create::<ForeignData>();
        let err = save.set_record(&mut foreign).expect_err("mismatch");
        assert!(matches!(
            err,
            RecordStoreError::Record(RecordError::KeyDomainMismatch { .. })
        ));

        let (fallback, ok) = save.get_record_or_init::<Undeclared>();
        assert!(!ok);
        assert_eq!(fallback.value, 0);
    }

    #[test]
    fn writes_after_the_last_flush_are_lost_on_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let cipher = || Cipher::new(CipherConfig::new(&[0x33; 32], &[0x44; 16]).expect("config"));

        {
            let save: RecordStore<SaveKey, _> = RecordStore::with_prefix(
                EncryptedStore::new(FileStore::open(&path).expect("open"), cipher()),
                "late",
            );
            save.set_int(SaveKey::Int, 7).expect("set");
            save.flush().expect("flush");
            save.set_float(SaveKey::Float, 1.5).expect("set");
            assert_eq!(save.get_float(SaveKey::Float, 0.0).expect("get"), 1.5);
        }

        let save: RecordStore<SaveKey, _> = RecordStore::with_prefix(
            EncryptedStore::new(FileStore::open(&path).expect("reopen"), cipher()),
            "late",
        );
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 7);
        assert_eq!(save.get_float(SaveKey::Float, 0.0).expect("get"), 0.0);
    }

    #[test]
    fn records_persist_through_a_file_backend() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("prefs.json");
        let config = || CipherConfig::new(&[0x11; 16], &[0x22; 16]).expect("config");

        {
            let backend = FileStore::open(&path).expect("open");
            let save: RecordStore<SaveKey, _> =
                RecordStore::with_prefix(EncryptedStore::new(backend, Cipher::new(config())), "file");
            let mut data = save.get_record::<TestDataV1>().expect("create");
            data.test_string = "persisted".into();
            save.set_float(SaveKey::Float, 1.5).expect("set");
            data.mark_dirty(&save, true).expect("persist");
            // Not flushed: must not survive the reopen below.
            save.set_int(SaveKey::Int, 3).expect("set");
        }

        let backend = FileStore::open(&path).expect("reopen");
        let save: RecordStore<SaveKey, _> =
            RecordStore::with_prefix(EncryptedStore::new(backend, Cipher::new(config())), "file");
        let data = save.get_record::<TestDataV1>().expect("load");
        assert_eq!(data.test_string, "persisted");
        assert!(!data.init_check);
        assert_eq!(save.get_float(SaveKey::Float, 0.0).expect("get"), 1.5);
        assert_eq!(save.get_int(SaveKey::Int, 0).expect("get"), 0);

        let raw = std::fs::read_to_string(&path).expect("read file");
        assert!(!raw.contains("persisted"));
        assert!(!raw.contains("SaveKey"));
    }
}
