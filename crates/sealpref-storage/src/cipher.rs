//! Symmetric payload encryption and deterministic key hashing.
//!
//! Both are derived from one immutable [`CipherConfig`]. CBC mode is
//! deterministic under the configured IV, so any producer holding the same
//! key/IV/padding can read and write compatible payloads. GCM mode draws a
//! fresh nonce per message and prepends it to the ciphertext.

use std::{fmt, sync::Arc};

use aes::{Aes128, Aes192, Aes256};
use aes_gcm::{
    aead::{consts::U12, Aead, AeadCore, KeyInit, OsRng},
    AesGcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cbc::cipher::{
    block_padding::{AnsiX923, Iso7816, Padding as BlockPadding, Pkcs7},
    consts::U16,
    BlockDecryptMut, BlockEncryptMut, KeyIvInit,
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// Accepted key lengths in bytes (AES-128, AES-192, AES-256).
pub const KEY_LENGTHS: [usize; 3] = [16, 24, 32];
/// IV length in bytes (one AES block).
pub const IV_LEN: usize = 16;
/// Nonce length prepended to GCM ciphertexts.
pub const GCM_NONCE_LEN: usize = 12;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CipherError {
    /// Key or IV has the wrong length or encoding.
    #[error("invalid key material: {reason}")]
    InvalidKeyMaterial { reason: String },
    /// Input was not produced by a matching encrypt call.
    #[error("malformed ciphertext: {reason}")]
    MalformedCiphertext { reason: String },
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },
}

/// Block cipher mode of operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CipherMode {
    #[default]
    Cbc,
    Gcm,
}

impl CipherMode {
    pub fn name(self) -> &'static str {
        match self {
            CipherMode::Cbc => "CBC",
            CipherMode::Gcm => "GCM",
        }
    }
}

/// Block padding scheme; only meaningful for CBC.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Padding {
    #[default]
    Pkcs7,
    Iso7816,
    AnsiX923,
}

impl Padding {
    pub fn name(self) -> &'static str {
        match self {
            Padding::Pkcs7 => "PKCS7",
            Padding::Iso7816 => "ISO7816",
            Padding::AnsiX923 => "ANSIX923",
        }
    }
}

/// Immutable key/IV/mode/padding set. Key bytes are wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct CipherConfig {
    key: Vec<u8>,
    iv: [u8; IV_LEN],
    #[zeroize(skip)]
    mode: CipherMode,
    #[zeroize(skip)]
    padding: Padding,
}

impl CipherConfig {
    /// Validate raw key and IV bytes. Defaults to CBC with PKCS7 padding.
    pub fn new(key: &[u8], iv: &[u8]) -> Result<Self, CipherError> {
        if !KEY_LENGTHS.contains(&key.len()) {
            return Err(CipherError::InvalidKeyMaterial {
                reason: format!("key must be 16, 24 or 32 bytes, got {}", key.len()),
            });
        }
        let iv: [u8; IV_LEN] = iv.try_into().map_err(|_| CipherError::InvalidKeyMaterial {
            reason: format!("iv must be {IV_LEN} bytes, got {}", iv.len()),
        })?;

        Ok(Self {
            key: key.to_vec(),
            iv,
            mode: CipherMode::default(),
            padding: Padding::default(),
        })
    }

    /// Build from base64-encoded IV and key.
    pub fn from_base64(iv: &str, key: &str) -> Result<Self, CipherError> {
        let iv = Zeroizing::new(STANDARD.decode(iv).map_err(|e| {
            CipherError::InvalidKeyMaterial {
                reason: format!("iv is not base64: {e}"),
            }
        })?);
        let key = Zeroizing::new(STANDARD.decode(key).map_err(|e| {
            CipherError::InvalidKeyMaterial {
                reason: format!("key is not base64: {e}"),
            }
        })?);
        Self::new(&key, &iv)
    }

    pub fn with_mode(mut self, mode: CipherMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn mode(&self) -> CipherMode {
        self.mode
    }

    pub fn padding(&self) -> Padding {
        self.padding
    }

    /// Seed of the default hash salt: `b64(iv) + b64(key) + mode + padding`.
    fn descriptor(&self) -> Zeroizing<String> {
        Zeroizing::new(format!(
            "{}{}{}{}",
            STANDARD.encode(self.iv),
            STANDARD.encode(&self.key),
            self.mode.name(),
            self.padding.name()
        ))
    }
}

impl fmt::Debug for CipherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherConfig")
            .field("key_len", &self.key.len())
            .field("mode", &self.mode)
            .field("padding", &self.padding)
            .finish_non_exhaustive()
    }
}

/// Deterministic string hash used to obfuscate storage keys.
pub type HashProvider = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Default provider: salted SHA-256 rendered as lowercase hex.
///
/// The salt is the digest of the configuration descriptor, computed once, so
/// outputs are stable per configuration but unpredictable without the key/IV.
pub fn default_hash_provider(config: &CipherConfig) -> HashProvider {
    let salt = salted_sha256("", &config.descriptor());
    Arc::new(move |text: &str| salted_sha256(&salt, text))
}

fn salted_sha256(salt: &str, text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Encrypts payloads and hashes keys under one fixed configuration.
#[derive(Clone)]
pub struct Cipher {
    config: CipherConfig,
    hash: HashProvider,
}

impl Cipher {
    pub fn new(config: CipherConfig) -> Self {
        let hash = default_hash_provider(&config);
        Self { config, hash }
    }

    /// Use an externally supplied hash instead of the salted default.
    pub fn with_hash_provider(config: CipherConfig, hash: HashProvider) -> Self {
        Self { config, hash }
    }

    /// Shorthand for [`CipherConfig::from_base64`] with CBC/PKCS7.
    pub fn from_base64(iv: &str, key: &str) -> Result<Self, CipherError> {
        Ok(Self::new(CipherConfig::from_base64(iv, key)?))
    }

    pub fn config(&self) -> &CipherConfig {
        &self.config
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (key, iv) = (&self.config.key[..], &self.config.iv[..]);
        match (self.config.mode, self.config.padding) {
            (CipherMode::Gcm, _) => gcm_encrypt(key, plaintext),
            (CipherMode::Cbc, Padding::Pkcs7) => cbc_encrypt::<Pkcs7>(key, iv, plaintext),
            (CipherMode::Cbc, Padding::Iso7816) => cbc_encrypt::<Iso7816>(key, iv, plaintext),
            (CipherMode::Cbc, Padding::AnsiX923) => cbc_encrypt::<AnsiX923>(key, iv, plaintext),
        }
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
        let (key, iv) = (&self.config.key[..], &self.config.iv[..]);
        match (self.config.mode, self.config.padding) {
            (CipherMode::Gcm, _) => gcm_decrypt(key, ciphertext),
            (CipherMode::Cbc, Padding::Pkcs7) => cbc_decrypt::<Pkcs7>(key, iv, ciphertext),
            (CipherMode::Cbc, Padding::Iso7816) => cbc_decrypt::<Iso7816>(key, iv, ciphertext),
            (CipherMode::Cbc, Padding::AnsiX923) => cbc_decrypt::<AnsiX923>(key, iv, ciphertext),
        }
    }

    /// Encrypt UTF-8 text and return the ciphertext as base64.
    pub fn encrypt_text(&self, text: &str) -> Result<String, CipherError> {
        Ok(STANDARD.encode(self.encrypt(text.as_bytes())?))
    }

    /// Inverse of [`Cipher::encrypt_text`].
    pub fn decrypt_text(&self, text: &str) -> Result<String, CipherError> {
        let ciphertext = STANDARD.decode(text).map_err(|e| malformed(format!("not base64: {e}")))?;
        let plaintext = self.decrypt(&ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| malformed("plaintext is not UTF-8"))
    }

    pub fn hash(&self, text: &str) -> String {
        (self.hash)(text)
    }
}

impl fmt::Debug for Cipher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cipher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn cbc_encrypt<P: BlockPadding<U16>>(
    key: &[u8],
    iv: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let ciphertext = match key.len() {
        16 => cbc::Encryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<P>(plaintext),
        24 => cbc::Encryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<P>(plaintext),
        32 => cbc::Encryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .encrypt_padded_vec_mut::<P>(plaintext),
        other => return Err(invalid_length(other)),
    };
    Ok(ciphertext)
}

fn cbc_decrypt<P: BlockPadding<U16>>(
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, CipherError> {
    let plaintext = match key.len() {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<P>(ciphertext),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<P>(ciphertext),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .map_err(invalid_length)?
            .decrypt_padded_vec_mut::<P>(ciphertext),
        other => return Err(invalid_length(other)),
    };
    plaintext.map_err(|_| malformed("padding validation failed"))
}

fn gcm_encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError> {
    match key.len() {
        16 => seal::<AesGcm<Aes128, U12>>(key, plaintext),
        24 => seal::<AesGcm<Aes192, U12>>(key, plaintext),
        32 => seal::<AesGcm<Aes256, U12>>(key, plaintext),
        other => Err(invalid_length(other)),
    }
}

fn gcm_decrypt(key: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>, CipherError> {
    match key.len() {
        16 => open::<AesGcm<Aes128, U12>>(key, ciphertext),
        24 => open::<AesGcm<Aes192, U12>>(key, ciphertext),
        32 => open::<AesGcm<Aes256, U12>>(key, ciphertext),
        other => Err(invalid_length(other)),
    }
}

fn seal<A>(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CipherError>
where
    A: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    let cipher = A::new_from_slice(key).map_err(invalid_length)?;
    let nonce = A::generate_nonce(&mut OsRng);
    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CipherError::Encryption {
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(GCM_NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

fn open<A>(key: &[u8], data: &[u8]) -> Result<Vec<u8>, CipherError>
where
    A: Aead + AeadCore<NonceSize = U12> + KeyInit,
{
    if data.len() < GCM_NONCE_LEN {
        return Err(malformed("shorter than the nonce"));
    }
    let cipher = A::new_from_slice(key).map_err(invalid_length)?;
    let (nonce, ciphertext) = data.split_at(GCM_NONCE_LEN);
    cipher
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map_err(|_| malformed("authentication failed"))
}

fn invalid_length(err: impl fmt::Display) -> CipherError {
    CipherError::InvalidKeyMaterial {
        reason: format!("invalid length: {err}"),
    }
}

fn malformed(reason: impl Into<String>) -> CipherError {
    CipherError::MalformedCiphertext {
        reason: reason.into(),
    }
}
