use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chrono::{DateTime, Utc};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::Result;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;

/// Upstream credential as stored in `admin_api_config.api_key_encrypted`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncryptedApiKey {
    pub encrypted_data: String,
    pub nonce: String,
    pub created_at: DateTime<Utc>,
}

/// AES-256-GCM sealing of the upstream API key.
pub struct ApiKeyCipher {
    encryption_key: [u8; KEY_SIZE],
}

impl ApiKeyCipher {
    pub fn new(encryption_key: [u8; KEY_SIZE]) -> Self {
        Self { encryption_key }
    }

    pub fn from_base64_key(key: &str) -> Result<Self> {
        let key_bytes = BASE64.decode(key.trim())
            .map_err(|e| AppError::ConfigError(format!("Invalid encryption key: {}", e)))?;

        if key_bytes.len() != KEY_SIZE {
            return Err(AppError::ConfigError(format!(
                "Encryption key must be {} bytes, got {}",
                KEY_SIZE,
                key_bytes.len()
            )));
        }

        let mut encryption_key = [0u8; KEY_SIZE];
        encryption_key.copy_from_slice(&key_bytes);

        Ok(Self { encryption_key })
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.encryption_key)
            .map_err(|e| AppError::InternalError(format!("Cipher setup failed: {}", e)))
    }

    pub fn encrypt(&self, api_key: &str) -> Result<EncryptedApiKey> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted = self.cipher()?
            .encrypt(nonce, api_key.as_bytes())
            .map_err(|e| AppError::InternalError(format!("Encryption failed: {}", e)))?;

        Ok(EncryptedApiKey {
            encrypted_data: BASE64.encode(encrypted),
            nonce: BASE64.encode(nonce_bytes),
            created_at: Utc::now(),
        })
    }

    pub fn decrypt(&self, encrypted: &EncryptedApiKey) -> Result<String> {
        let nonce_bytes = BASE64.decode(&encrypted.nonce)
            .map_err(|e| AppError::InternalError(format!("Invalid nonce: {}", e)))?;
        if nonce_bytes.len() != NONCE_SIZE {
            return Err(AppError::InternalError("Invalid nonce length".into()));
        }
        let nonce = Nonce::from_slice(&nonce_bytes);

        let encrypted_data = BASE64.decode(&encrypted.encrypted_data)
            .map_err(|e| AppError::InternalError(format!("Invalid encrypted data: {}", e)))?;

        let decrypted = self.cipher()?
            .decrypt(nonce, encrypted_data.as_ref())
            .map_err(|e| AppError::InternalError(format!("Decryption failed: {}", e)))?;

        String::from_utf8(decrypted)
            .map_err(|e| AppError::InternalError(format!("Invalid UTF-8: {}", e)))
    }

    /// Serialized form kept in the database column.
    pub fn seal(&self, api_key: &str) -> Result<String> {
        serde_json::to_string(&self.encrypt(api_key)?)
            .map_err(|e| AppError::InternalError(e.to_string()))
    }

    pub fn open(&self, sealed: &str) -> Result<String> {
        let encrypted: EncryptedApiKey = serde_json::from_str(sealed)
            .map_err(|e| AppError::InternalError(format!("Corrupt stored credential: {}", e)))?;
        self.decrypt(&encrypted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn generate_test_key() -> [u8; KEY_SIZE] {
        let mut key = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut key);
        key
    }

    #[test]
    fn test_api_key_encryption() {
        let cipher = ApiKeyCipher::new(generate_test_key());

        let api_key = "sk-or-v1-test-key";
        let encrypted = cipher.encrypt(api_key).unwrap();
        assert!(!encrypted.encrypted_data.contains(api_key));

        assert_eq!(cipher.decrypt(&encrypted).unwrap(), api_key);
    }

    #[test]
    fn test_wrong_key_cannot_decrypt() {
        let sealed = ApiKeyCipher::new(generate_test_key()).seal("sk-or-v1-test-key").unwrap();
        let other = ApiKeyCipher::new(generate_test_key());
        assert!(other.open(&sealed).is_err());
    }

    #[test]
    fn test_from_base64_key_checks_length() {
        assert!(ApiKeyCipher::from_base64_key(&BASE64.encode([7u8; KEY_SIZE])).is_ok());
        assert!(matches!(
            ApiKeyCipher::from_base64_key(&BASE64.encode([7u8; 16])),
            Err(AppError::ConfigError(_))
        ));
        assert!(ApiKeyCipher::from_base64_key("not base64!").is_err());
    }
}
