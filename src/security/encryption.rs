//! AES-256-GCM sealing of stored payloads

use crate::error::{AppError, Result};
use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use base64::Engine;
use rand::RngCore;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

const NONCE_SIZE: usize = 12;
pub const KEY_SIZE: usize = 32;

/// Ciphertext and nonce, both base64
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlob {
    pub ciphertext: String,
    pub nonce: String,
}

/// Encryption manager using AES-256-GCM
pub struct EncryptionManager {
    cipher: Aes256Gcm,
}

impl EncryptionManager {
    pub fn new(key: &[u8]) -> Result<Self> {
        if key.len() != KEY_SIZE {
            return Err(AppError::Encryption(format!(
                "Invalid key size: expected {}, got {}",
                KEY_SIZE,
                key.len()
            )));
        }

        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| AppError::Encryption(e.to_string()))?;

        Ok(Self { cipher })
    }

    pub fn generate_key() -> Vec<u8> {
        let mut key = vec![0u8; KEY_SIZE];
        OsRng.fill_bytes(&mut key);
        key
    }

    pub fn seal(&self, plaintext: &[u8]) -> Result<SealedBlob> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce_bytes), plaintext)
            .map_err(|e| AppError::Encryption(e.to_string()))?;

        let engine = base64::engine::general_purpose::STANDARD;
        Ok(SealedBlob {
            ciphertext: engine.encode(&ciphertext),
            nonce: engine.encode(nonce_bytes),
        })
    }

    pub fn open(&self, blob: &SealedBlob) -> Result<Vec<u8>> {
        let engine = base64::engine::general_purpose::STANDARD;
        let ciphertext = engine
            .decode(&blob.ciphertext)
            .map_err(|e| AppError::Encryption(format!("Invalid ciphertext base64: {}", e)))?;
        let nonce_bytes = engine
            .decode(&blob.nonce)
            .map_err(|e| AppError::Encryption(format!("Invalid nonce base64: {}", e)))?;

        if nonce_bytes.len() != NONCE_SIZE {
            return Err(AppError::Encryption(format!(
                "Invalid nonce size: expected {}, got {}",
                NONCE_SIZE,
                nonce_bytes.len()
            )));
        }

        self.cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| AppError::Encryption(format!("Decryption failed: {}", e)))
    }

    /// Serialize `value` to JSON and seal it
    pub fn seal_json<T: Serialize>(&self, value: &T) -> Result<SealedBlob> {
        let bytes = serde_json::to_vec(value)?;
        self.seal(&bytes)
    }

    pub fn open_json<T: DeserializeOwned>(&self, blob: &SealedBlob) -> Result<T> {
        let bytes = self.open(blob)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn manager() -> EncryptionManager {
        EncryptionManager::new(&EncryptionManager::generate_key()).unwrap()
    }

    #[test]
    fn test_rejects_short_key() {
        assert!(matches!(
            EncryptionManager::new(&[0u8; 16]),
            Err(AppError::Encryption(_))
        ));
    }

    #[test]
    fn test_same_payload_gets_fresh_nonce() {
        let manager = manager();
        let a = manager.seal(b"ideas").unwrap();
        let b = manager.seal(b"ideas").unwrap();
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
        assert_eq!(manager.open(&a).unwrap(), b"ideas");
    }

    #[test]
    fn test_json_payload() {
        let manager = manager();
        let mut payload = HashMap::new();
        payload.insert("symbol".to_string(), "JNJ".to_string());

        let blob = manager.seal_json(&payload).unwrap();
        assert!(!blob.ciphertext.contains("JNJ"));
        let opened: HashMap<String, String> = manager.open_json(&blob).unwrap();
        assert_eq!(opened, payload);
    }

    #[test]
    fn test_other_key_cannot_open() {
        let blob = manager().seal(b"secret").unwrap();
        assert!(manager().open(&blob).is_err());
    }
}
