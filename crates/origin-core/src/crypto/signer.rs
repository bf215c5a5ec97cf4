//! PS256 signer abstraction.
//!
//! [`KeyStore`] is the capability surface the certificate service depends
//! on: sign bytes, advertise public keys as a JWK set, name the active key.
//! The local variant holds an RSA private key loaded from a PKCS#8 PEM file
//! with restrictive permissions; the KMS variant (server crate) holds only
//! a key id and delegates signing to the remote service. Both advertise
//! `"PS256"` and nothing else.
//!
//! Older keys can remain published for verification after rotation: the
//! newest active key signs, retired public keys stay in the JWK set.

use std::fs::{self, OpenOptions};
use std::io::Write as _;
use std::path::Path;

use async_trait::async_trait;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::pss::SigningKey;
use rsa::signature::{RandomizedSigner, SignatureEncoding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use thiserror::Error;

use super::hash::sha256_hex;
use super::jwks::{Jwk, JwkSet};

/// The only signature algorithm ORIGIN certificates carry.
pub const PS256_ALG: &str = "PS256";

/// RSA modulus size for generated development keys.
const DEV_KEY_BITS: usize = 2048;

/// Errors from key loading and signing.
#[derive(Debug, Error)]
pub enum SignerError {
    /// I/O error reading or writing key material.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The key file exists but is not a parseable PKCS#8 RSA private key.
    #[error("invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// The key file is readable by group or other.
    #[error("insecure permissions on key file: {path}")]
    InsecurePermissions {
        /// Path with overly permissive mode bits.
        path: String,
    },

    /// Key generation failed.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// The remote signing service rejected or failed the request.
    #[error("remote signer error: {0}")]
    Remote(String),
}

/// A signature plus the metadata the certificate row records.
#[derive(Debug, Clone)]
pub struct SignedDigest {
    /// Raw signature bytes (base64url-encoded by the caller for storage).
    pub signature: Vec<u8>,

    /// Identifier of the key that produced the signature.
    pub key_id: String,
}

/// Capability surface for certificate signing.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Signs `message` with the active key.
    async fn sign(&self, message: &[u8]) -> Result<SignedDigest, SignerError>;

    /// Public keys for verification, newest active key included.
    fn jwks(&self) -> JwkSet;

    /// Identifier of the key new signatures are produced with.
    fn active_key_id(&self) -> &str;

    /// Advertised signature algorithm. Identical across the JWK set, the
    /// certificate record, and the actual signing operation.
    fn alg(&self) -> &'static str {
        PS256_ALG
    }
}

struct LoadedKey {
    key_id: String,
    private: Option<RsaPrivateKey>,
    public: RsaPublicKey,
}

/// Local RSA key store backed by PKCS#8 PEM files.
///
/// Intended for development; the server's composition root refuses to build
/// one in any other environment.
pub struct LocalKeyStore {
    // keys[0] is the active signing key; the rest are retired public keys
    // still published for verification.
    keys: Vec<LoadedKey>,
}

impl LocalKeyStore {
    /// Loads the signing key from `path`, generating a fresh RSA-2048 key
    /// (written with 0600 permissions) if the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file has permissive mode bits, cannot be
    /// parsed, or key generation fails.
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self, SignerError> {
        let path = path.as_ref();
        let private = if path.exists() {
            verify_permissions(path)?;
            let pem = fs::read_to_string(path)?;
            RsaPrivateKey::from_pkcs8_pem(&pem)
                .map_err(|e| SignerError::InvalidKeyFormat(e.to_string()))?
        } else {
            let key = generate_key()?;
            write_key_file(path, &key)?;
            key
        };

        Self::from_private_key(private)
    }

    /// Builds a key store from an in-memory private key. Used by tests and
    /// by deployments that inject the PEM through configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the public key cannot be encoded for key-id
    /// derivation.
    pub fn from_private_key(private: RsaPrivateKey) -> Result<Self, SignerError> {
        let public = private.to_public_key();
        let key_id = derive_key_id(&public)?;
        Ok(Self {
            keys: vec![LoadedKey {
                key_id,
                private: Some(private),
                public,
            }],
        })
    }

    /// Generates an ephemeral key store. Test-only convenience.
    ///
    /// # Errors
    ///
    /// Returns an error if key generation fails.
    pub fn ephemeral() -> Result<Self, SignerError> {
        Self::from_private_key(generate_key()?)
    }

    /// Publishes a retired public key alongside the active one.
    ///
    /// Retired keys verify old certificates; they never sign.
    ///
    /// # Errors
    ///
    /// Returns an error if the key id cannot be derived.
    pub fn publish_retired(&mut self, public: RsaPublicKey) -> Result<(), SignerError> {
        let key_id = derive_key_id(&public)?;
        self.keys.push(LoadedKey {
            key_id,
            private: None,
            public,
        });
        Ok(())
    }

    /// The active public key, for verification in tests.
    #[must_use]
    pub fn active_public_key(&self) -> &RsaPublicKey {
        &self.keys[0].public
    }
}

#[async_trait]
impl KeyStore for LocalKeyStore {
    async fn sign(&self, message: &[u8]) -> Result<SignedDigest, SignerError> {
        let active = &self.keys[0];
        let private = active
            .private
            .as_ref()
            .ok_or_else(|| SignerError::Generation("active key has no private part".to_string()))?;

        // RSASSA-PSS with MGF1-SHA-256; `SigningKey::new` pins the salt
        // length to the digest length.
        let signing_key = SigningKey::<Sha256>::new(private.clone());
        let mut rng = rand::thread_rng();
        let signature = signing_key.sign_with_rng(&mut rng, message);

        Ok(SignedDigest {
            signature: signature.to_vec(),
            key_id: active.key_id.clone(),
        })
    }

    fn jwks(&self) -> JwkSet {
        JwkSet {
            keys: self
                .keys
                .iter()
                .map(|k| Jwk::from_rsa_public(&k.public, &k.key_id))
                .collect(),
        }
    }

    fn active_key_id(&self) -> &str {
        &self.keys[0].key_id
    }
}

/// Content-addressed key id: prefix of the SHA-256 of the DER-encoded
/// public key, so rotation always yields a fresh id.
fn derive_key_id(public: &RsaPublicKey) -> Result<String, SignerError> {
    let der = public
        .to_public_key_der()
        .map_err(|e| SignerError::InvalidKeyFormat(e.to_string()))?;
    Ok(format!("origin-{}", &sha256_hex(der.as_bytes())[..16]))
}

fn generate_key() -> Result<RsaPrivateKey, SignerError> {
    let mut rng = rand::thread_rng();
    RsaPrivateKey::new(&mut rng, DEV_KEY_BITS).map_err(|e| SignerError::Generation(e.to_string()))
}

#[cfg(unix)]
fn verify_permissions(path: &Path) -> Result<(), SignerError> {
    use std::os::unix::fs::PermissionsExt;

    let mode = fs::metadata(path)?.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(SignerError::InsecurePermissions {
            path: path.display().to_string(),
        });
    }
    Ok(())
}

#[cfg(not(unix))]
fn verify_permissions(_path: &Path) -> Result<(), SignerError> {
    Ok(())
}

fn write_key_file(path: &Path, key: &RsaPrivateKey) -> Result<(), SignerError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| SignerError::Generation(e.to_string()))?;

    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(pem.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use rsa::pss::VerifyingKey;
    use rsa::signature::Verifier;

    use super::*;

    fn verify_ps256(public: &RsaPublicKey, message: &[u8], signature: &[u8]) -> bool {
        let verifying_key = VerifyingKey::<Sha256>::new(public.clone());
        rsa::pss::Signature::try_from(signature)
            .map(|sig| verifying_key.verify(message, &sig).is_ok())
            .unwrap_or(false)
    }

    #[tokio::test]
    async fn test_sign_verify_roundtrip() {
        let store = LocalKeyStore::ephemeral().unwrap();
        let message = b"canonical certificate payload";

        let signed = store.sign(message).await.unwrap();
        assert_eq!(signed.key_id, store.active_key_id());
        assert!(verify_ps256(store.active_public_key(), message, &signed.signature));
    }

    #[tokio::test]
    async fn test_single_bit_change_invalidates() {
        let store = LocalKeyStore::ephemeral().unwrap();
        let message = b"payload".to_vec();
        let signed = store.sign(&message).await.unwrap();

        let mut tampered = message.clone();
        tampered[0] ^= 0x01;
        assert!(!verify_ps256(store.active_public_key(), &tampered, &signed.signature));

        let mut bad_sig = signed.signature.clone();
        bad_sig[0] ^= 0x01;
        assert!(!verify_ps256(store.active_public_key(), &message, &bad_sig));
    }

    #[test]
    fn test_jwks_advertises_ps256() {
        let store = LocalKeyStore::ephemeral().unwrap();
        let jwks = store.jwks();
        assert_eq!(jwks.keys.len(), 1);
        let jwk = &jwks.keys[0];
        assert_eq!(jwk.alg, PS256_ALG);
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.kid, store.active_key_id());
    }

    #[test]
    fn test_retired_keys_published_after_rotation() {
        let old = LocalKeyStore::ephemeral().unwrap();
        let old_public = old.active_public_key().clone();
        let old_kid = old.active_key_id().to_string();

        let mut rotated = LocalKeyStore::ephemeral().unwrap();
        rotated.publish_retired(old_public).unwrap();

        let jwks = rotated.jwks();
        assert_eq!(jwks.keys.len(), 2);
        assert_eq!(jwks.keys[0].kid, rotated.active_key_id());
        assert_eq!(jwks.keys[1].kid, old_kid);
        assert_ne!(rotated.active_key_id(), old_kid);
    }

    #[test]
    fn test_load_or_generate_creates_key_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("keys/signing.pem");

        let store = LocalKeyStore::load_or_generate(&path).unwrap();
        assert!(path.exists());

        // Loading again yields the same key id.
        let reloaded = LocalKeyStore::load_or_generate(&path).unwrap();
        assert_eq!(store.active_key_id(), reloaded.active_key_id());
    }

    #[cfg(unix)]
    #[test]
    fn test_generated_key_file_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("signing.pem");
        let _store = LocalKeyStore::load_or_generate(&path).unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_key_rejected() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("signing.pem");
        let _store = LocalKeyStore::load_or_generate(&path).unwrap();

        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let result = LocalKeyStore::load_or_generate(&path);
        assert!(matches!(
            result,
            Err(SignerError::InsecurePermissions { .. })
        ));
    }
}
