use base64::{engine::general_purpose::STANDARD, Engine as _};
use sealpref_core::storage::{KeyValueStore, StoreError};
use thiserror::Error;
use tracing::{debug, instrument};

use crate::cipher::{Cipher, CipherError};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EncryptedStoreError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Cipher(#[from] CipherError),
}

/// Adapts a [`KeyValueStore`] so every logical key is hashed and every
/// string/bytes payload is encrypted before it reaches the backend.
///
/// Booleans, integers and floats are stored as-is: they are fixed-width and
/// carry little information on their own.
pub struct EncryptedStore<S: KeyValueStore> {
    backend: S,
    cipher: Cipher,
}

impl<S: KeyValueStore> EncryptedStore<S> {
    pub fn new(backend: S, cipher: Cipher) -> Self {
        Self { backend, cipher }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub fn cipher(&self) -> &Cipher {
        &self.cipher
    }

    /// Obfuscated key under which `key` is stored in the backend.
    pub fn hashed_key(&self, key: &str) -> String {
        self.cipher.hash(key)
    }

    pub fn has_key(&self, key: &str) -> Result<bool, EncryptedStoreError> {
        Ok(self.backend.has_key(&self.hashed_key(key))?)
    }

    pub fn set_bool(&self, key: &str, value: bool) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.set_bool(&self.hashed_key(key), value)?)
    }

    pub fn set_int(&self, key: &str, value: i32) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.set_int(&self.hashed_key(key), value)?)
    }

    pub fn set_float(&self, key: &str, value: f32) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.set_float(&self.hashed_key(key), value)?)
    }

    #[instrument(skip_all)]
    pub fn set_string(&self, key: &str, value: &str) -> Result<(), EncryptedStoreError> {
        let ciphertext = self.cipher.encrypt_text(value)?;
        Ok(self.backend.set_string(&self.hashed_key(key), &ciphertext)?)
    }

    #[instrument(skip_all, fields(len = value.len()))]
    pub fn set_bytes(&self, key: &str, value: &[u8]) -> Result<(), EncryptedStoreError> {
        let ciphertext = STANDARD.encode(self.cipher.encrypt(value)?);
        Ok(self.backend.set_string(&self.hashed_key(key), &ciphertext)?)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> Result<bool, EncryptedStoreError> {
        Ok(self.backend.get_bool(&self.hashed_key(key), default)?)
    }

    pub fn get_int(&self, key: &str, default: i32) -> Result<i32, EncryptedStoreError> {
        Ok(self.backend.get_int(&self.hashed_key(key), default)?)
    }

    pub fn get_float(&self, key: &str, default: f32) -> Result<f32, EncryptedStoreError> {
        Ok(self.backend.get_float(&self.hashed_key(key), default)?)
    }

    /// Decrypted string, or `default` when nothing is stored under `key`.
    pub fn get_string(&self, key: &str, default: &str) -> Result<String, EncryptedStoreError> {
        Ok(self
            .read_string(key)?
            .unwrap_or_else(|| default.to_string()))
    }

    /// Decrypted string, or `None` when nothing is stored under `key`.
    #[instrument(skip_all)]
    pub fn read_string(&self, key: &str) -> Result<Option<String>, EncryptedStoreError> {
        match self.read_raw(key)? {
            Some(ciphertext) => Ok(Some(self.cipher.decrypt_text(&ciphertext)?)),
            None => Ok(None),
        }
    }

    /// Decrypted bytes, or `None` when nothing is stored under `key`.
    #[instrument(skip_all)]
    pub fn get_bytes(&self, key: &str) -> Result<Option<Vec<u8>>, EncryptedStoreError> {
        let Some(encoded) = self.read_raw(key)? else {
            return Ok(None);
        };
        let ciphertext = STANDARD
            .decode(encoded)
            .map_err(|e| CipherError::MalformedCiphertext {
                reason: format!("not base64: {e}"),
            })?;
        Ok(Some(self.cipher.decrypt(&ciphertext)?))
    }

    pub fn delete(&self, key: &str) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.delete(&self.hashed_key(key))?)
    }

    /// Remove every entry of the backend, including ones written by others.
    #[instrument(skip_all)]
    pub fn delete_all(&self) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.delete_all()?)
    }

    #[instrument(skip_all)]
    pub fn flush(&self) -> Result<(), EncryptedStoreError> {
        Ok(self.backend.flush()?)
    }

    fn read_raw(&self, key: &str) -> Result<Option<String>, EncryptedStoreError> {
        let hashed = self.hashed_key(key);
        if !self.backend.has_key(&hashed)? {
            debug!(key = %hashed, "no stored value");
            return Ok(None);
        }
        Ok(Some(self.backend.get_string(&hashed, "")?))
    }
}
