//! Security module for sealing confidential results at rest
//!
//! Uses a file-based master key unless one is supplied through configuration.

mod encryption;
mod file_storage;

use crate::error::Result;
use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;

pub use encryption::SealedBlob;
use encryption::EncryptionManager;
use file_storage::KeyFile;

pub struct SecurityManager {
    encryption: EncryptionManager,
}

impl SecurityManager {
    /// Security manager keyed from the master key file in `data_dir`
    pub fn new(data_dir: &Path) -> Result<Self> {
        let key = KeyFile::new(data_dir).load_or_create()?;
        Self::from_key(&key)
    }

    pub fn from_key(key: &[u8]) -> Result<Self> {
        Ok(Self {
            encryption: EncryptionManager::new(key)?,
        })
    }

    /// Security manager with a throwaway key, for in-memory deployments and tests
    pub fn ephemeral() -> Result<Self> {
        Self::from_key(&EncryptionManager::generate_key())
    }

    pub fn seal<T: Serialize>(&self, value: &T) -> Result<SealedBlob> {
        self.encryption.seal_json(value)
    }

    pub fn open<T: DeserializeOwned>(&self, blob: &SealedBlob) -> Result<T> {
        self.encryption.open_json(blob)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_key_file_survives_restart() {
        let dir = tempdir().unwrap();
        let blob = SecurityManager::new(dir.path())
            .unwrap()
            .seal(&vec!["idea-1".to_string()])
            .unwrap();

        let reopened = SecurityManager::new(dir.path()).unwrap();
        let ids: Vec<String> = reopened.open(&blob).unwrap();
        assert_eq!(ids, vec!["idea-1".to_string()]);
    }

    #[test]
    fn test_ephemeral_keys_differ() {
        let blob = SecurityManager::ephemeral().unwrap().seal(&42u32).unwrap();
        let other = SecurityManager::ephemeral().unwrap();
        assert!(other.open::<u32>(&blob).is_err());
    }
}
