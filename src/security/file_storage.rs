//! File-based master key storage
//!
//! The key is generated on first start and kept base64-encoded in the data
//! directory. On unix the file is created with owner-only permissions.

use super::encryption::{EncryptionManager, KEY_SIZE};
use crate::error::{AppError, Result};
use base64::Engine;
use std::fs;
use std::path::{Path, PathBuf};

const KEY_FILE: &str = "master.key";

pub struct KeyFile {
    path: PathBuf,
}

impl KeyFile {
    pub fn new(data_dir: &Path) -> Self {
        Self {
            path: data_dir.join(KEY_FILE),
        }
    }

    /// Read the master key, creating it on first use
    pub fn load_or_create(&self) -> Result<Vec<u8>> {
        if self.path.exists() {
            return self.load();
        }

        let key = EncryptionManager::generate_key();
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| AppError::Config(format!("Failed to create data dir: {}", e)))?;
        }

        let encoded = base64::engine::general_purpose::STANDARD.encode(&key);
        fs::write(&self.path, encoded)
            .map_err(|e| AppError::Config(format!("Failed to write master key: {}", e)))?;
        restrict_permissions(&self.path)?;

        tracing::info!("Generated new master key at {}", self.path.display());
        Ok(key)
    }

    fn load(&self) -> Result<Vec<u8>> {
        let data = fs::read_to_string(&self.path)
            .map_err(|e| AppError::Config(format!("Failed to read master key: {}", e)))?;
        decode_key(&data)
    }
}

/// Decode a base64 key and check its length
fn decode_key(encoded: &str) -> Result<Vec<u8>> {
    let key = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|e| AppError::Config(format!("Master key is not valid base64: {}", e)))?;

    if key.len() != KEY_SIZE {
        return Err(AppError::Config(format!(
            "Master key must be {} bytes, got {}",
            KEY_SIZE,
            key.len()
        )));
    }
    Ok(key)
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_is_created_once() {
        let dir = tempdir().unwrap();
        let store = KeyFile::new(dir.path());

        let first = store.load_or_create().unwrap();
        let second = store.load_or_create().unwrap();
        assert_eq!(first.len(), KEY_SIZE);
        assert_eq!(first, second);
        assert!(store.path.exists());
    }

    #[test]
    fn test_decode_key_rejects_wrong_length() {
        assert!(decode_key("c2hvcnQ=").is_err());
        assert!(decode_key("not base64!").is_err());
    }
}
