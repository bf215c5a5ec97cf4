//! Cryptographic primitives for the decision ledger and certificates.
//!
//! - **SHA-256 hashing**: event hashes and the per-tenant hash chain
//! - **PS256 signing**: the [`KeyStore`] abstraction over a local RSA key
//!   (a remote KMS variant lives in the server crate, where the AWS client
//!   is available)
//! - **JWKS export**: public keys advertised for offline verification
//! - **Secret encryption**: webhook secrets at rest
//!
//! # Hash chain
//!
//! Every ledger event stores the SHA-256 of its canonical JSON and the hash
//! of the previous event in the same tenant's sequence. The first event
//! links to [`hash::ZERO_HASH_HEX`]. Tampering with any stored event breaks
//! the chain at that position.
//!
//! # Algorithm consistency
//!
//! Certificates are signed with RSASSA-PSS over SHA-256 (salt length equal
//! to the hash length, MGF1-SHA-256) and always advertise `"PS256"` — in
//! the JWK `alg` field, in the certificate record, and in the signature
//! metadata returned by [`KeyStore::sign`]. There is no RS256 path.

pub mod encryption;
pub mod hash;
pub mod jwks;
pub mod signer;

pub use encryption::{EncryptedSecret, EncryptionError, EncryptionProvider, LocalEncryption};
pub use hash::{sha256_hex, ZERO_HASH_HEX};
pub use jwks::{Jwk, JwkSet};
pub use signer::{KeyStore, LocalKeyStore, SignedDigest, SignerError, PS256_ALG};
