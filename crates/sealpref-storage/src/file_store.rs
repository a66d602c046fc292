use std::{
    collections::BTreeMap,
    fs::{self, File},
    io::{Read, Write},
    path::{Path, PathBuf},
    sync::{Mutex, MutexGuard},
};

use sealpref_core::storage::{KeyValueStore, StoreError, StoredValue};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::{debug, instrument};

/// Current on-disk layout of the store file.
const FILE_FORMAT: u32 = 1;

/// JSON-file backed store implementing the shared `KeyValueStore` contract.
///
/// Values live in memory and are visible to reads immediately; `flush` writes
/// the whole map atomically (temp file + rename). Keys and text arrive
/// already hashed/encrypted from `EncryptedStore`, so the file holds no
/// plaintext of its own.
pub struct FileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, StoredValue>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct StoredFile {
    format: u32,
    entries: BTreeMap<String, StoredValue>,
}

impl FileStore {
    /// Open the store at `path`, loading existing entries if the file exists.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let entries = match read_file(&path)? {
            Some(file) => file.entries,
            None => BTreeMap::new(),
        };
        debug!(entries = entries.len(), "opened file store");
        Ok(Self {
            path,
            entries: Mutex::new(entries),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock(&self) -> Result<MutexGuard<'_, BTreeMap<String, StoredValue>>, StoreError> {
        self.entries.lock().map_err(|err| StoreError::Storage {
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

impl KeyValueStore for FileStore {
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

    #[instrument(skip_all, fields(path = %self.path.display()))]
    fn flush(&self) -> Result<(), StoreError> {
        let file = StoredFile {
            format: FILE_FORMAT,
            entries: self.lock()?.clone(),
        };
        write_file(&self.path, &file)?;
        debug!(entries = file.entries.len(), "flushed file store");
        Ok(())
    }
}

fn write_file(path: &Path, file: &StoredFile) -> Result<(), StoreError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(storage_err)?;

    let mut tmp = NamedTempFile::new_in(parent).map_err(storage_err)?;
    let json = serde_json::to_vec_pretty(file).map_err(storage_err)?;
    tmp.write_all(&json).map_err(storage_err)?;
    tmp.flush().map_err(storage_err)?;
    tmp.as_file().sync_all().map_err(storage_err)?;
    tmp.persist(path).map_err(|e| storage_err(e.error))?;
    Ok(())
}

fn read_file(path: &Path) -> Result<Option<StoredFile>, StoreError> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(storage_err(err)),
    };

    let mut buf = Vec::new();
    file.read_to_end(&mut buf).map_err(storage_err)?;
    if buf.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }

    let stored: StoredFile = serde_json::from_slice(&buf).map_err(storage_err)?;
    if stored.format != FILE_FORMAT {
        return Err(StoreError::Storage {
            reason: format!("unsupported store format: {}", stored.format),
        });
    }
    Ok(Some(stored))
}

fn storage_err<E: ToString>(err: E) -> StoreError {
    StoreError::Storage {
        reason: err.to_string(),
    }
}
