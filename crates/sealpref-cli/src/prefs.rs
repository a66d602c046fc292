use base64::{engine::general_purpose::STANDARD, Engine as _};
use color_eyre::{eyre::WrapErr, Result};
use sealpref_core::storage::KeyValueStore;
use sealpref_storage::encrypted_store::EncryptedStore;
use tracing::{info, instrument};

use crate::cli::ValueKind;

/// Key-level commands over an encrypted store, scoped to one namespace.
pub struct Prefs<'a, S: KeyValueStore> {
    store: &'a EncryptedStore<S>,
    namespace: &'a str,
}

impl<'a, S: KeyValueStore> Prefs<'a, S> {
    pub fn new(store: &'a EncryptedStore<S>, namespace: &'a str) -> Self {
        Self { store, namespace }
    }

    fn logical_key(&self, key: &str) -> String {
        format!("{}{key}", self.namespace)
    }

    /// Rendered value under `key`, or `None` when nothing is stored.
    pub fn get(&self, key: &str, kind: ValueKind) -> Result<Option<String>> {
        let key = self.logical_key(key);
        if !self.store.has_key(&key)? {
            return Ok(None);
        }
        let rendered = match kind {
            ValueKind::String => self.store.read_string(&key)?,
            ValueKind::Bool => Some(self.store.get_bool(&key, false)?.to_string()),
            ValueKind::Int => Some(self.store.get_int(&key, 0)?.to_string()),
            ValueKind::Float => Some(self.store.get_float(&key, 0.0)?.to_string()),
            ValueKind::Bytes => self.store.get_bytes(&key)?.map(|bytes| STANDARD.encode(bytes)),
        };
        Ok(rendered)
    }

    #[instrument(skip_all, fields(kind = ?kind))]
    pub fn set(&self, key: &str, value: &str, kind: ValueKind) -> Result<()> {
        let key = self.logical_key(key);
        match kind {
            ValueKind::String => self.store.set_string(&key, value)?,
            ValueKind::Bool => {
                let value = value.parse::<bool>().wrap_err("expected true or false")?;
                self.store.set_bool(&key, value)?
            }
            ValueKind::Int => {
                let value = value.parse::<i32>().wrap_err("expected a 32-bit integer")?;
                self.store.set_int(&key, value)?
            }
            ValueKind::Float => {
                let value = value.parse::<f32>().wrap_err("expected a number")?;
                self.store.set_float(&key, value)?
            }
            ValueKind::Bytes => {
                let value = STANDARD.decode(value).wrap_err("expected base64")?;
                self.store.set_bytes(&key, &value)?
            }
        }
        self.store.flush()?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<()> {
        self.store.delete(&self.logical_key(key))?;
        self.store.flush()?;
        Ok(())
    }

    /// Obfuscated backend key for `key`.
    pub fn hash(&self, key: &str) -> String {
        self.store.hashed_key(&self.logical_key(key))
    }

    /// Remove every entry of the backend, across all namespaces.
    pub fn reset(&self, confirmed: bool) -> Result<()> {
        if !confirmed {
            color_eyre::eyre::bail!("refusing to reset the store without --yes");
        }
        self.store.delete_all()?;
        self.store.flush()?;
        info!("store reset");
        Ok(())
    }

    /// Write, read back and delete a probe value.
    pub fn health(&self) -> Result<()> {
        let probe_key = self.logical_key("health/probe");
        let payload = b"ok";
        self.store.set_bytes(&probe_key, payload)?;
        let round_trip = self.store.get_bytes(&probe_key)?;
        self.store.delete(&probe_key)?;
        self.store.flush()?;

        if round_trip.as_deref() != Some(&payload[..]) {
            color_eyre::eyre::bail!("storage round-trip failed");
        }
        Ok(())
    }
}
