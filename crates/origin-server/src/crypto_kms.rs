//! AWS KMS-backed signer and encryption provider.
//!
//! The signer fetches its public key at construction, which both proves
//! reachability and sign permission (fail fast at startup) and feeds the
//! JWK the service advertises. Signing requests use
//! `RSASSA_PSS_SHA_256` — the remote operation matches the advertised
//! `PS256` exactly. The encryption provider wraps KMS Encrypt/Decrypt for
//! webhook secrets.

use async_trait::async_trait;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::types::{MessageType, SigningAlgorithmSpec};
use aws_sdk_kms::Client;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rsa::pkcs8::DecodePublicKey;
use rsa::RsaPublicKey;

use origin_core::crypto::{
    EncryptedSecret, EncryptionError, EncryptionProvider, Jwk, JwkSet, KeyStore, SignedDigest,
    SignerError,
};

/// KMS signer for certificate issuance.
pub struct KmsKeyStore {
    client: Client,
    key_id: String,
    jwk: Jwk,
}

impl KmsKeyStore {
    /// Connects to the key and caches its public part.
    ///
    /// # Errors
    ///
    /// Returns [`SignerError::Remote`] when the key is unreachable, the
    /// caller lacks permission, or the key is not an RSA signing key —
    /// startup must abort in all three cases.
    pub async fn load(client: Client, key_id: String) -> Result<Self, SignerError> {
        let response = client
            .get_public_key()
            .key_id(&key_id)
            .send()
            .await
            .map_err(|e| SignerError::Remote(format!("GetPublicKey failed: {e}")))?;

        let der = response
            .public_key()
            .ok_or_else(|| SignerError::Remote("KMS returned no public key".to_string()))?;
        let public = RsaPublicKey::from_public_key_der(der.as_ref())
            .map_err(|e| SignerError::Remote(format!("KMS key is not RSA: {e}")))?;

        let supports_pss = response
            .signing_algorithms()
            .iter()
            .any(|alg| matches!(alg, SigningAlgorithmSpec::RsassaPssSha256));
        if !supports_pss {
            return Err(SignerError::Remote(
                "KMS key does not support RSASSA_PSS_SHA_256".to_string(),
            ));
        }

        let jwk = Jwk::from_rsa_public(&public, &key_id);
        Ok(Self {
            client,
            key_id,
            jwk,
        })
    }
}

#[async_trait]
impl KeyStore for KmsKeyStore {
    async fn sign(&self, message: &[u8]) -> Result<SignedDigest, SignerError> {
        let response = self
            .client
            .sign()
            .key_id(&self.key_id)
            .message(Blob::new(message))
            .message_type(MessageType::Raw)
            .signing_algorithm(SigningAlgorithmSpec::RsassaPssSha256)
            .send()
            .await
            .map_err(|e| SignerError::Remote(format!("Sign failed: {e}")))?;

        let signature = response
            .signature()
            .ok_or_else(|| SignerError::Remote("KMS returned no signature".to_string()))?;

        Ok(SignedDigest {
            signature: signature.as_ref().to_vec(),
            key_id: self.key_id.clone(),
        })
    }

    fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: vec![self.jwk.clone()],
        }
    }

    fn active_key_id(&self) -> &str {
        &self.key_id
    }
}

/// KMS encryption provider for webhook secrets.
pub struct KmsEncryption {
    client: Client,
    key_id: String,
}

impl KmsEncryption {
    /// Validates the key exists before first use.
    ///
    /// # Errors
    ///
    /// Returns [`EncryptionError::Remote`] if the key cannot be described.
    pub async fn load(client: Client, key_id: String) -> Result<Self, EncryptionError> {
        client
            .describe_key()
            .key_id(&key_id)
            .send()
            .await
            .map_err(|e| EncryptionError::Remote(format!("DescribeKey failed: {e}")))?;
        Ok(Self { client, key_id })
    }
}

#[async_trait]
impl EncryptionProvider for KmsEncryption {
    async fn encrypt(&self, plaintext: &str) -> Result<EncryptedSecret, EncryptionError> {
        let response = self
            .client
            .encrypt()
            .key_id(&self.key_id)
            .plaintext(Blob::new(plaintext.as_bytes()))
            .send()
            .await
            .map_err(|e| EncryptionError::Remote(format!("Encrypt failed: {e}")))?;

        let ciphertext = response
            .ciphertext_blob()
            .ok_or_else(|| EncryptionError::Remote("KMS returned no ciphertext".to_string()))?;

        Ok(EncryptedSecret {
            provider: "aws_kms".to_string(),
            key_id: response
                .key_id()
                .unwrap_or(self.key_id.as_str())
                .to_string(),
            ciphertext: BASE64.encode(ciphertext.as_ref()),
        })
    }

    async fn decrypt(&self, secret: &EncryptedSecret) -> Result<String, EncryptionError> {
        let ciphertext = BASE64
            .decode(&secret.ciphertext)
            .map_err(|e| EncryptionError::Decrypt(e.to_string()))?;

        let response = self
            .client
            .decrypt()
            .ciphertext_blob(Blob::new(ciphertext))
            .send()
            .await
            .map_err(|e| EncryptionError::Remote(format!("Decrypt failed: {e}")))?;

        let plaintext = response
            .plaintext()
            .ok_or_else(|| EncryptionError::Remote("KMS returned no plaintext".to_string()))?;

        String::from_utf8(plaintext.as_ref().to_vec())
            .map_err(|e| EncryptionError::Decrypt(e.to_string()))
    }
}
