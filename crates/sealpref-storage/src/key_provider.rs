use std::sync::{Arc, Mutex};

use base64::{engine::general_purpose, Engine as _};
use rand::{rngs::OsRng, RngCore};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::cipher::{CipherConfig, CipherError, IV_LEN};

/// Length of generated keys (AES-256).
pub const KEY_LEN: usize = 32;

/// Cipher key and IV generated at runtime and kept outside the binary.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct KeyMaterial {
    /// Identifier for logging/rotation (never log key bytes).
    #[zeroize(skip)]
    pub id: String,
    pub key: [u8; KEY_LEN],
    pub iv: [u8; IV_LEN],
}

impl KeyMaterial {
    /// AES-256 / CBC / PKCS7 configuration over this material.
    pub fn cipher_config(&self) -> Result<CipherConfig, CipherError> {
        CipherConfig::new(&self.key, &self.iv)
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("keyring error: {0}")]
    Keyring(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("generation error: {0}")]
    Generation(String),
}

/// Provides cipher key material (OS keychain in production; memory in tests).
pub trait KeyProvider: Send + Sync {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError>;
}

/// OS keyring-backed provider. Uses the `keyring` crate to store the material.
pub struct KeyringProvider {
    service: String,
    account: String,
}

impl KeyringProvider {
    pub fn new(service: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            account: account.into(),
        }
    }
}

impl KeyProvider for KeyringProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let entry = keyring::Entry::new(&self.service, &self.account)
            .map_err(|e| KeyError::Keyring(e.to_string()))?;

        if let Some(material) = stored_material(entry.get_password())? {
            return Ok(material);
        }

        let material = generate_material();
        entry
            .set_password(&encode_material(&material))
            .map_err(|e| KeyError::Keyring(e.to_string()))?;
        Ok(material)
    }
}

/// Material already in the keychain. Only a missing entry yields `None`;
/// any other keyring failure is an error so existing material is never
/// overwritten.
fn stored_material(
    stored: Result<String, keyring::Error>,
) -> Result<Option<KeyMaterial>, KeyError> {
    match stored {
        Ok(secret) => decode_material(&Zeroizing::new(secret)).map(Some),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(KeyError::Keyring(err.to_string())),
    }
}

/// In-memory key provider for tests and ephemeral sessions.
#[derive(Debug, Default, Clone)]
pub struct InMemoryKeyProvider {
    inner: Arc<Mutex<Option<KeyMaterial>>>,
}

impl KeyProvider for InMemoryKeyProvider {
    fn get_or_create(&self) -> Result<KeyMaterial, KeyError> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|err| KeyError::Generation(format!("lock poisoned: {err}")))?;

        if let Some(existing) = guard.clone() {
            return Ok(existing);
        }

        let material = generate_material();
        *guard = Some(material.clone());
        Ok(material)
    }
}

fn generate_material() -> KeyMaterial {
    let mut key = [0u8; KEY_LEN];
    let mut iv = [0u8; IV_LEN];
    OsRng.fill_bytes(&mut key);
    OsRng.fill_bytes(&mut iv);
    KeyMaterial {
        id: "default".to_string(),
        key,
        iv,
    }
}

/// Keyring secret: base64 of `key || iv`.
fn encode_material(material: &KeyMaterial) -> Zeroizing<String> {
    let mut raw = Zeroizing::new(Vec::with_capacity(KEY_LEN + IV_LEN));
    raw.extend_from_slice(&material.key);
    raw.extend_from_slice(&material.iv);
    Zeroizing::new(general_purpose::STANDARD.encode(&*raw))
}

fn decode_material(secret: &str) -> Result<KeyMaterial, KeyError> {
    let bytes = Zeroizing::new(
        general_purpose::STANDARD
            .decode(secret)
            .map_err(|e| KeyError::Decode(e.to_string()))?,
    );

    if bytes.len() != KEY_LEN + IV_LEN {
        return Err(KeyError::Decode(format!(
            "expected {} bytes, got {}",
            KEY_LEN + IV_LEN,
            bytes.len()
        )));
    }

    let mut material = KeyMaterial {
        id: "default".to_string(),
        key: [0u8; KEY_LEN],
        iv: [0u8; IV_LEN],
    };
    material.key.copy_from_slice(&bytes[..KEY_LEN]);
    material.iv.copy_from_slice(&bytes[KEY_LEN..]);
    Ok(material)
}
