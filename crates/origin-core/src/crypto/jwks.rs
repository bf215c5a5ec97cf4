//! JWK Set types advertised at `/v1/keys/jwks.json`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use super::signer::PS256_ALG;

/// A single RSA signing key in JWK form.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Jwk {
    /// Key type; always `"RSA"`.
    pub kty: String,

    /// Key use; always `"sig"`.
    #[serde(rename = "use")]
    pub use_: String,

    /// Signature algorithm; always `"PS256"`.
    pub alg: String,

    /// Key identifier referenced by certificate rows.
    pub kid: String,

    /// Modulus, base64url without padding.
    pub n: String,

    /// Public exponent, base64url without padding.
    pub e: String,
}

impl Jwk {
    /// Exports an RSA public key as a PS256 signing JWK.
    #[must_use]
    pub fn from_rsa_public(public: &RsaPublicKey, kid: &str) -> Self {
        Self {
            kty: "RSA".to_string(),
            use_: "sig".to_string(),
            alg: PS256_ALG.to_string(),
            kid: kid.to_string(),
            n: URL_SAFE_NO_PAD.encode(public.n().to_bytes_be()),
            e: URL_SAFE_NO_PAD.encode(public.e().to_bytes_be()),
        }
    }
}

/// The published key set. Multiple keys are permitted; the newest active
/// key is listed first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JwkSet {
    /// The advertised keys.
    pub keys: Vec<Jwk>,
}

impl JwkSet {
    /// Finds a key by id.
    #[must_use]
    pub fn find(&self, kid: &str) -> Option<&Jwk> {
        self.keys.iter().find(|k| k.kid == kid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwk_fields() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let jwk = Jwk::from_rsa_public(&key.to_public_key(), "kid-1");

        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.use_, "sig");
        assert_eq!(jwk.alg, "PS256");
        // 65537 = 0x010001 → "AQAB"
        assert_eq!(jwk.e, "AQAB");
        assert!(!jwk.n.is_empty());
        assert!(!jwk.n.contains('='));
    }

    #[test]
    fn test_use_field_serializes_as_use() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let jwk = Jwk::from_rsa_public(&key.to_public_key(), "kid-1");
        let json = serde_json::to_value(&jwk).unwrap();
        assert_eq!(json["use"], "sig");
        assert!(json.get("use_").is_none());
    }

    #[test]
    fn test_find_by_kid() {
        let key = rsa::RsaPrivateKey::new(&mut rand::thread_rng(), 2048).unwrap();
        let set = JwkSet {
            keys: vec![Jwk::from_rsa_public(&key.to_public_key(), "kid-1")],
        };
        assert!(set.find("kid-1").is_some());
        assert!(set.find("kid-2").is_none());
    }
}
