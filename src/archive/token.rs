use anyhow::{Context, Result};
use fernet::Fernet;
use std::fs;
use std::path::Path;

use crate::error::ArchiveError;

/// Symmetric cipher for the API token, keyed by a Fernet key file.
pub struct TokenCipher {
    fernet: Fernet,
}

impl TokenCipher {
    pub fn from_key(key: &str) -> Result<Self> {
        let fernet = Fernet::new(key.trim())
            .ok_or_else(|| ArchiveError::Token("key is not a valid fernet key".to_string()))?;
        Ok(Self { fernet })
    }

    pub fn from_key_file(path: &Path) -> Result<Self> {
        let key = fs::read_to_string(path)
            .with_context(|| format!("failed to read key file {}", path.display()))?;
        Self::from_key(&key)
    }

    pub fn generate_key() -> String {
        Fernet::generate_key()
    }

    /// Accepts text or raw bytes alike.
    pub fn encrypt(&self, value: impl AsRef<[u8]>) -> String {
        self.fernet.encrypt(value.as_ref())
    }

    pub fn decrypt(&self, value: impl AsRef<[u8]>) -> Result<String> {
        let token = std::str::from_utf8(value.as_ref())
            .map_err(|_| ArchiveError::Token("ciphertext is not valid text".to_string()))?;
        let plain = self
            .fernet
            .decrypt(token.trim())
            .map_err(|_| ArchiveError::Token("ciphertext does not match key".to_string()))?;
        String::from_utf8(plain)
            .map_err(|_| ArchiveError::Token("plaintext is not valid UTF-8".to_string()).into())
    }
}

/// Writes a fresh key, refusing to clobber an existing one.
pub fn write_new_key(path: &Path) -> Result<()> {
    if path.exists() {
        anyhow::bail!("key file {} already exists", path.display());
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(path, format!("{}\n", TokenCipher::generate_key()))
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
