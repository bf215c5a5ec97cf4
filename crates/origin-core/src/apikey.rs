//! API-key generation and the prefix + digest lookup scheme.
//!
//! Raw keys are never persisted. The stored pair is:
//!
//! - `prefix`: the first 8 characters of the raw key, indexed, used to
//!   locate candidate rows in O(1)
//! - `digest`: `HMAC-SHA256(server_secret, raw_key)` in hex, compared in
//!   constant time against the candidate

use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::crypto::hash::hex_encode;

type HmacSha256 = Hmac<Sha256>;

/// Length of the indexed key prefix.
pub const PREFIX_LEN: usize = 8;

/// Number of random bytes in a generated key (hex-encoded in the raw key).
const KEY_RANDOM_BYTES: usize = 24;

/// Generates a fresh raw API key: `ok_` followed by 48 hex characters.
#[must_use]
pub fn generate_raw_key() -> String {
    let mut bytes = [0u8; KEY_RANDOM_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("ok_{}", hex_encode(&bytes))
}

/// The indexed prefix of a raw key.
#[must_use]
pub fn key_prefix(raw_key: &str) -> &str {
    if raw_key.len() >= PREFIX_LEN {
        &raw_key[..PREFIX_LEN]
    } else {
        raw_key
    }
}

/// The stored digest of a raw key.
#[must_use]
pub fn key_digest(server_secret: &str, raw_key: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(server_secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(raw_key.as_bytes());
    hex_encode(&mac.finalize().into_bytes())
}

/// Constant-time comparison of a computed digest against a stored one.
#[must_use]
pub fn digest_matches(computed: &str, stored: &str) -> bool {
    computed.as_bytes().ct_eq(stored.as_bytes()).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let key = generate_raw_key();
        assert!(key.starts_with("ok_"));
        assert_eq!(key.len(), 3 + KEY_RANDOM_BYTES * 2);
        assert_ne!(key, generate_raw_key());
    }

    #[test]
    fn test_prefix_is_first_eight_chars() {
        let key = generate_raw_key();
        assert_eq!(key_prefix(&key), &key[..8]);
        assert_eq!(key_prefix("short"), "short");
    }

    #[test]
    fn test_digest_law() {
        let digest = key_digest("server-secret", "ok_abc123");
        assert_eq!(digest.len(), 64);
        // Stable for the same inputs, distinct otherwise.
        assert_eq!(digest, key_digest("server-secret", "ok_abc123"));
        assert_ne!(digest, key_digest("other-secret", "ok_abc123"));
        assert_ne!(digest, key_digest("server-secret", "ok_abc124"));
    }

    #[test]
    fn test_digest_matches() {
        let digest = key_digest("server-secret", "ok_abc123");
        assert!(digest_matches(&digest, &digest));
        assert!(!digest_matches(&digest, &key_digest("server-secret", "ok_x")));
    }
}
