//! SHA-256 helpers and hash-chain verification.

use sha2::{Digest, Sha256};

/// Hex form of the zero sentinel a tenant's first ledger event links to.
pub const ZERO_HASH_HEX: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Computes the lowercase hex SHA-256 of `data`.
#[must_use]
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    hex_encode(&digest)
}

/// Lowercase hex encoding without intermediate allocations per byte.
#[must_use]
pub fn hex_encode(bytes: &[u8]) -> String {
    use std::fmt::Write as _;

    bytes.iter().fold(
        String::with_capacity(bytes.len() * 2),
        |mut acc, b| {
            let _ = write!(acc, "{b:02x}");
            acc
        },
    )
}

/// One verification step of a hash chain.
///
/// Checks that `canonical_json` hashes to `event_hash` and that `prev_hash`
/// links to the preceding event (`expected_prev`, or the zero sentinel for
/// the first event).
#[must_use]
pub fn chain_link_valid(
    canonical_json: &str,
    event_hash: &str,
    prev_hash: &str,
    expected_prev: &str,
) -> bool {
    sha256_hex(canonical_json.as_bytes()) == event_hash && prev_hash == expected_prev
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_vector() {
        // SHA-256 of the empty string.
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_zero_hash_is_64_zeros() {
        assert_eq!(ZERO_HASH_HEX.len(), 64);
        assert!(ZERO_HASH_HEX.chars().all(|c| c == '0'));
    }

    #[test]
    fn test_chain_link_valid() {
        let canonical = r#"{"a":1}"#;
        let hash = sha256_hex(canonical.as_bytes());
        assert!(chain_link_valid(canonical, &hash, ZERO_HASH_HEX, ZERO_HASH_HEX));
        assert!(!chain_link_valid(canonical, &hash, "deadbeef", ZERO_HASH_HEX));
        assert!(!chain_link_valid(r#"{"a":2}"#, &hash, ZERO_HASH_HEX, ZERO_HASH_HEX));
    }
}
