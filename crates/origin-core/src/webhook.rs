//! Webhook payload signing and verification.
//!
//! The signed message is `timestamp_bytes + b"." + raw_body_bytes` and the
//! signature is HMAC-SHA256 over exactly those bytes. The sender transmits
//! the same raw bytes it signed; receivers verify against the bytes they
//! received, never a re-encoding. Re-serializing JSON between signing and
//! verification changes byte order and breaks the signature by design of
//! the scheme, which is why [`verify`] takes raw bytes.
//!
//! Replay protection: [`verify`] rejects timestamps further than
//! [`DEFAULT_MAX_SKEW_SECS`] from the verifier's clock.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use thiserror::Error;

use crate::crypto::hash::hex_encode;

type HmacSha256 = Hmac<Sha256>;

/// Default acceptable clock skew for received webhooks, in seconds.
pub const DEFAULT_MAX_SKEW_SECS: i64 = 300;

/// Header carrying the signature, value form `sha256=<hex>`.
pub const SIGNATURE_HEADER: &str = "X-Origin-Signature";

/// Header carrying the unix timestamp the signature covers.
pub const TIMESTAMP_HEADER: &str = "X-Origin-Timestamp";

/// Header carrying the event type.
pub const EVENT_HEADER: &str = "X-Origin-Event";

/// Header carrying the delivery's event id.
pub const EVENT_ID_HEADER: &str = "X-Origin-Event-Id";

/// Header carrying the correlation id.
pub const CORRELATION_ID_HEADER: &str = "X-Origin-Correlation-Id";

/// Webhook signature verification failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum WebhookVerifyError {
    /// The signature header value is not `sha256=<hex>`.
    #[error("invalid signature format")]
    InvalidFormat,

    /// The timestamp is not a decimal unix timestamp.
    #[error("invalid timestamp")]
    InvalidTimestamp,

    /// The timestamp is outside the allowed skew window.
    #[error("timestamp outside allowed skew of {max_skew_secs}s")]
    TimestampSkew {
        /// The window that was exceeded.
        max_skew_secs: i64,
    },

    /// HMAC comparison failed.
    #[error("signature mismatch")]
    Mismatch,
}

/// Computes the signature header value for a payload.
///
/// Returns the full header value including the `sha256=` prefix.
#[must_use]
pub fn sign(secret: &str, timestamp: i64, raw_body: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    format!("sha256={}", hex_encode(&mac.finalize().into_bytes()))
}

/// Verifies a received webhook.
///
/// `raw_body` must be the exact bytes received on the wire. `now` is the
/// verifier's clock as a unix timestamp; timestamps further than
/// `max_skew_secs` in either direction are rejected before the HMAC check.
///
/// # Errors
///
/// Returns [`WebhookVerifyError`] on malformed input, excessive skew, or
/// signature mismatch. The HMAC comparison is constant-time.
pub fn verify(
    secret: &str,
    signature_header: &str,
    timestamp_header: &str,
    raw_body: &[u8],
    now: i64,
    max_skew_secs: i64,
) -> Result<(), WebhookVerifyError> {
    let hex = signature_header
        .strip_prefix("sha256=")
        .ok_or(WebhookVerifyError::InvalidFormat)?;
    let expected = decode_hex(hex).ok_or(WebhookVerifyError::InvalidFormat)?;

    let timestamp: i64 = timestamp_header
        .parse()
        .map_err(|_| WebhookVerifyError::InvalidTimestamp)?;
    if (now - timestamp).abs() > max_skew_secs {
        return Err(WebhookVerifyError::TimestampSkew { max_skew_secs });
    }

    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(raw_body);
    mac.verify_slice(&expected)
        .map_err(|_| WebhookVerifyError::Mismatch)
}

fn decode_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&s[i..i + 2], 16).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "whsec_test";

    #[test]
    fn test_known_vector() {
        // HMAC-SHA256("secret", b"1700000000." + b"{\"a\":1,\"b\":2}")
        let body = br#"{"a":1,"b":2}"#;
        let header = sign("secret", 1_700_000_000, body);
        assert!(header.starts_with("sha256="));
        assert_eq!(header.len(), "sha256=".len() + 64);
        verify("secret", &header, "1700000000", body, 1_700_000_000, DEFAULT_MAX_SKEW_SECS)
            .unwrap();
    }

    #[test]
    fn test_reordered_json_fields_mismatch() {
        let signed_body = br#"{"a":1,"b":2}"#;
        let reordered = br#"{"b":2,"a":1}"#;
        let header = sign(SECRET, 1_700_000_000, signed_body);

        let result = verify(
            SECRET,
            &header,
            "1700000000",
            reordered,
            1_700_000_000,
            DEFAULT_MAX_SKEW_SECS,
        );
        assert_eq!(result, Err(WebhookVerifyError::Mismatch));
    }

    #[test]
    fn test_wrong_secret_mismatch() {
        let body = b"payload";
        let header = sign(SECRET, 1_700_000_000, body);
        let result = verify(
            "other-secret",
            &header,
            "1700000000",
            body,
            1_700_000_000,
            DEFAULT_MAX_SKEW_SECS,
        );
        assert_eq!(result, Err(WebhookVerifyError::Mismatch));
    }

    #[test]
    fn test_timestamp_skew_rejected() {
        let body = b"payload";
        let header = sign(SECRET, 1_700_000_000, body);

        let result = verify(
            SECRET,
            &header,
            "1700000000",
            body,
            1_700_000_000 + DEFAULT_MAX_SKEW_SECS + 1,
            DEFAULT_MAX_SKEW_SECS,
        );
        assert_eq!(
            result,
            Err(WebhookVerifyError::TimestampSkew {
                max_skew_secs: DEFAULT_MAX_SKEW_SECS
            })
        );

        // Just inside the window passes.
        verify(
            SECRET,
            &header,
            "1700000000",
            body,
            1_700_000_000 + DEFAULT_MAX_SKEW_SECS,
            DEFAULT_MAX_SKEW_SECS,
        )
        .unwrap();
    }

    #[test]
    fn test_tampered_timestamp_mismatch() {
        let body = b"payload";
        let header = sign(SECRET, 1_700_000_000, body);
        // Timestamp changed after signing: inside the skew window but the
        // signed message no longer matches.
        let result = verify(
            SECRET,
            &header,
            "1700000010",
            body,
            1_700_000_010,
            DEFAULT_MAX_SKEW_SECS,
        );
        assert_eq!(result, Err(WebhookVerifyError::Mismatch));
    }

    #[test]
    fn test_malformed_inputs() {
        let body = b"payload";
        assert_eq!(
            verify(SECRET, "md5=abc", "1700000000", body, 1_700_000_000, 300),
            Err(WebhookVerifyError::InvalidFormat)
        );
        assert_eq!(
            verify(SECRET, "sha256=zz", "1700000000", body, 1_700_000_000, 300),
            Err(WebhookVerifyError::InvalidFormat)
        );
        assert_eq!(
            verify(SECRET, "sha256=ab", "not-a-number", body, 1_700_000_000, 300),
            Err(WebhookVerifyError::InvalidTimestamp)
        );
    }
}
