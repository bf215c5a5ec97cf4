//! Encryption of secrets at rest (webhook signing secrets).
//!
//! Two providers exist: a local AES-256-GCM provider whose key is derived
//! from the server secret and a per-installation random salt, and a KMS
//! provider (server crate) that delegates to the remote service. The local
//! provider is accepted only in development and test environments; the
//! composition root enforces that.

use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{AeadCore, Aes256Gcm, Key, Nonce};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use thiserror::Error;
use zeroize::Zeroizing;

/// PBKDF2 iteration count for the local key derivation.
const PBKDF2_ITERATIONS: u32 = 100_000;

/// AES-GCM nonce size in bytes.
const NONCE_SIZE: usize = 12;

/// Errors from secret encryption and decryption.
#[derive(Debug, Error)]
pub enum EncryptionError {
    /// The salt is missing or too short to derive a key from.
    #[error("invalid encryption salt: {0}")]
    InvalidSalt(String),

    /// Encryption failed.
    #[error("encryption failed")]
    Encrypt,

    /// The ciphertext is malformed or was produced under a different key.
    #[error("decryption failed: {0}")]
    Decrypt(String),

    /// The remote encryption service failed.
    #[error("remote encryption error: {0}")]
    Remote(String),
}

/// Ciphertext plus the metadata needed to decrypt it later.
///
/// Persisted as JSON on the webhook row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EncryptedSecret {
    /// Provider that produced the ciphertext (`"local"` or `"aws_kms"`).
    pub provider: String,

    /// Key identifier (`"local"` or the KMS key id).
    pub key_id: String,

    /// Nonce-prefixed ciphertext, base64.
    pub ciphertext: String,
}

/// Capability surface for secret encryption at rest.
#[async_trait]
pub trait EncryptionProvider: Send + Sync {
    /// Encrypts a plaintext secret.
    async fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, EncryptionError>;

    /// Decrypts a previously encrypted secret.
    async fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, EncryptionError>;
}

/// AES-256-GCM provider keyed by PBKDF2(server_secret, installation_salt).
///
/// The salt is required configuration, never a compile-time constant, so
/// two installations sharing a server secret still derive distinct keys.
pub struct LocalEncryption {
    cipher: Aes256Gcm,
}

impl LocalEncryption {
    /// Derives the data key and builds the provider.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::InvalidSalt`] if the salt is shorter than
    /// 16 bytes.
    pub fn new(server_secret: &str, salt: &[u8]) -> Result<Self, EncryptionError> {
        if salt.len() < 16 {
            return Err(EncryptionError::InvalidSalt(format!(
                "salt must be at least 16 bytes, got {}",
                salt.len()
            )));
        }

        let mut key_bytes = Zeroizing::new([0u8; 32]);
        pbkdf2::pbkdf2_hmac::<Sha256>(
            server_secret.as_bytes(),
            salt,
            PBKDF2_ITERATIONS,
            &mut *key_bytes,
        );

        let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*key_bytes));
        Ok(Self { cipher })
    }
}

#[async_trait]
impl EncryptionProvider for LocalEncryption {
    async fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, EncryptionError> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_bytes())
            .map_err(|_| EncryptionError::Encrypt)?;

        let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        blob.extend_from_slice(&nonce);
        blob.extend_from_slice(&ciphertext);

        Ok(EncryptedSecret {
            provider: "local".to_string(),
            key_id: "local".to_string(),
            ciphertext: BASE64.encode(blob),
        })
    }

    async fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, EncryptionError> {
        let blob = BASE64
            .decode(&secret.ciphertext)
            .map_err(|e| EncryptionError::Decrypt(e.to_string()))?;
        if blob.len() <= NONCE_SIZE {
            return Err(EncryptionError::Decrypt("ciphertext too short".to_string()));
        }

        let (nonce, ciphertext) = blob.split_at(NONCE_SIZE);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| EncryptionError::Decrypt("authentication failed".to_string()))?;

        String::from_utf8(plaintext).map_err(|e| EncryptionError::Decrypt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SALT: &[u8] = b"per-installation-random-salt-123";

    #[tokio::test]
    async fn test_encrypt_decrypt_roundtrip() {
        let provider = LocalEncryption::new("server-secret", SALT).unwrap();
        let encrypted = provider.encrypt("whsec_abc123").await.unwrap();

        assert_eq!(encrypted.provider, "local");
        assert_ne!(encrypted.ciphertext, "whsec_abc123");

        let decrypted = provider.decrypt(&encrypted).await.unwrap();
        assert_eq!(decrypted, "whsec_abc123");
    }

    #[tokio::test]
    async fn test_distinct_nonces_per_encryption() {
        let provider = LocalEncryption::new("server-secret", SALT).unwrap();
        let a = provider.encrypt("same").await.unwrap();
        let b = provider.encrypt("same").await.unwrap();
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[tokio::test]
    async fn test_wrong_salt_fails_decrypt() {
        let provider = LocalEncryption::new("server-secret", SALT).unwrap();
        let encrypted = provider.encrypt("secret").await.unwrap();

        let other = LocalEncryption::new("server-secret", b"a-different-32-byte-salt-value!!").unwrap();
        let result = other.decrypt(&encrypted).await;
        assert!(matches!(result, Err(EncryptionError::Decrypt(_))));
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_rejected() {
        let provider = LocalEncryption::new("server-secret", SALT).unwrap();
        let mut encrypted = provider.encrypt("secret").await.unwrap();

        let mut blob = BASE64.decode(&encrypted.ciphertext).unwrap();
        let last = blob.len() - 1;
        blob[last] ^= 0x01;
        encrypted.ciphertext = BASE64.encode(blob);

        assert!(provider.decrypt(&encrypted).await.is_err());
    }

    #[test]
    fn test_short_salt_rejected() {
        let result = LocalEncryption::new("server-secret", b"short");
        assert!(matches!(result, Err(EncryptionError::InvalidSalt(_))));
    }
}
