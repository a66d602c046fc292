use std::path::{Path, PathBuf};

use crate::config::Config;
use color_eyre::Result;
use dirs::data_dir;
use sealpref_storage::{
    cipher::Cipher,
    encrypted_store::EncryptedStore,
    file_store::FileStore,
    key_provider::{KeyProvider, KeyringProvider},
};
use tracing::debug;

/// Name of the store file inside the data directory.
pub const STORE_FILE: &str = "prefs.json";

/// Resolve the default data directory for sealpref.
pub fn default_data_dir() -> Result<PathBuf> {
    let base = data_dir().ok_or_else(|| color_eyre::eyre::eyre!("no data dir available"))?;
    Ok(base.join("sealpref"))
}

/// Build the file-backed encrypted store, keyed from the OS keychain.
pub fn store_from_config(config: &Config) -> Result<EncryptedStore<FileStore>> {
    let root = match &config.data_dir {
        Some(root) => root.clone(),
        None => default_data_dir()?,
    };
    let provider = KeyringProvider::new(config.keyring_service(), config.keyring_account());
    open_store(&root, &provider)
}

/// Open `root/prefs.json` with a cipher built from `provider`'s material.
pub fn open_store(root: &Path, provider: &dyn KeyProvider) -> Result<EncryptedStore<FileStore>> {
    let path = root.join(STORE_FILE);
    debug!(path = %path.display(), "opening encrypted store");
    let material = provider.get_or_create()?;
    debug!(key_id = %material.id, "loaded key material");
    let cipher = Cipher::new(material.cipher_config()?);
    Ok(EncryptedStore::new(FileStore::open(path)?, cipher))
}

/// Store rooted at a temp dir with an in-memory key, for tests.
#[cfg(test)]
pub fn test_store(root: &Path) -> EncryptedStore<FileStore> {
    let provider = sealpref_storage::key_provider::InMemoryKeyProvider::default();
    open_store(root, &provider).expect("test store")
}
