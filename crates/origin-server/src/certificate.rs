//! Decision certificate issuance.
//!
//! A certificate is a signed, self-contained statement of one decision,
//! bound to its ledger position. The inputs object (policy version,
//! features, signals, model versions) and outputs object (decision,
//! reasons) are hashed separately; the signature covers the canonical JSON
//! of the certificate body, which includes both hashes and the ledger
//! hash. Signature bytes are stored base64url without padding, together
//! with the `key_id` and `alg` the verifier needs.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};
use sqlx::PgConnection;
use thiserror::Error;
use uuid::Uuid;

use origin_core::canonical::{canonicalize, CanonicalError};
use origin_core::crypto::{sha256_hex, KeyStore, SignerError};
use origin_core::policy::{Features, PolicyOutcome, Signals};

use crate::storage::models::CertificateRow;

/// Certificate issuance failures.
#[derive(Debug, Error)]
pub enum CertificateError {
    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Canonical encoding failure.
    #[error("canonicalization error: {0}")]
    Canonical(#[from] CanonicalError),

    /// Signing failure.
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
}

/// Builds the certificate inputs object.
#[must_use]
pub fn build_inputs(policy_version: &str, features: &Features, signals: &Signals) -> Value {
    json!({
        "policy_version": policy_version,
        "features": features,
        "signals": {
            "risk": signals.risk,
            "assurance": signals.assurance,
            "anomaly": signals.anomaly,
            "synthetic_likelihood": signals.synthetic_likelihood,
        },
        "model_versions": {
            "risk": signals.risk_model_version,
            "anomaly": signals.anomaly_model_version,
        },
    })
}

/// Builds the certificate outputs object.
#[must_use]
pub fn build_outputs(outcome: &PolicyOutcome) -> Value {
    json!({
        "decision": outcome.decision,
        "reasons": outcome.reasons,
    })
}

/// Builds the canonical signed payload.
///
/// # Errors
///
/// Returns [`CanonicalError`] if encoding fails.
#[allow(clippy::too_many_arguments)]
pub fn build_signed_payload(
    certificate_id: &str,
    tenant_id: i64,
    upload_id: i64,
    policy_version: &str,
    inputs_hash: &str,
    outputs_hash: &str,
    ledger_hash: &str,
    issued_at: DateTime<Utc>,
    alg: &str,
    key_id: &str,
) -> Result<String, CanonicalError> {
    canonicalize(&json!({
        "certificate_id": certificate_id,
        "tenant_id": tenant_id,
        "upload_id": upload_id,
        "policy_version": policy_version,
        "inputs_hash": inputs_hash,
        "outputs_hash": outputs_hash,
        "ledger_hash": ledger_hash,
        "issued_at": issued_at.to_rfc3339_opts(SecondsFormat::Micros, true),
        "alg": alg,
        "key_id": key_id,
    }))
}

/// Issues and persists a certificate inside the caller's transaction.
///
/// # Errors
///
/// Returns [`CertificateError`] on database, encoding, or signing
/// failure; the surrounding ingest transaction then aborts.
#[allow(clippy::too_many_arguments)]
pub async fn issue(
    conn: &mut PgConnection,
    signer: &dyn KeyStore,
    tenant_id: i64,
    upload_id: i64,
    policy_version: &str,
    features: &Features,
    signals: &Signals,
    outcome: &PolicyOutcome,
    ledger_hash: &str,
    now: DateTime<Utc>,
) -> Result<CertificateRow, CertificateError> {
    let certificate_id = Uuid::new_v4().to_string();

    let inputs_hash = sha256_hex(canonicalize(&build_inputs(policy_version, features, signals))?.as_bytes());
    let outputs_hash = sha256_hex(canonicalize(&build_outputs(outcome))?.as_bytes());

    let alg = signer.alg();
    let key_id = signer.active_key_id().to_string();
    let signed_payload = build_signed_payload(
        &certificate_id,
        tenant_id,
        upload_id,
        policy_version,
        &inputs_hash,
        &outputs_hash,
        ledger_hash,
        now,
        alg,
        &key_id,
    )?;

    let signed = signer.sign(signed_payload.as_bytes()).await?;
    let signature = URL_SAFE_NO_PAD.encode(&signed.signature);

    let row = sqlx::query_as::<_, CertificateRow>(
        "INSERT INTO certificates \
         (certificate_id, tenant_id, upload_id, policy_version, inputs_hash, outputs_hash, \
          ledger_hash, key_id, alg, signature, signature_encoding, signed_payload, issued_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, 'base64url', $11, $12) \
         RETURNING id, certificate_id, tenant_id, upload_id, policy_version, inputs_hash, \
                   outputs_hash, ledger_hash, key_id, alg, signature, signature_encoding, \
                   signed_payload, issued_at",
    )
    .bind(&certificate_id)
    .bind(tenant_id)
    .bind(upload_id)
    .bind(policy_version)
    .bind(&inputs_hash)
    .bind(&outputs_hash)
    .bind(ledger_hash)
    .bind(&signed.key_id)
    .bind(alg)
    .bind(&signature)
    .bind(&signed_payload)
    .bind(now)
    .fetch_one(conn)
    .await?;

    Ok(row)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use origin_core::policy::Decision;

    use super::*;

    fn features() -> Features {
        Features {
            account_age_days: 10,
            upload_velocity_24h: 1,
            device_velocity_24h: 0,
            prior_quarantine_count: 0,
            prior_reject_count: 0,
            pvid_prior_quarantine_count: 0,
            pvid_prior_reject_count: 0,
            pvid_prior_sightings: 0,
        }
    }

    fn signals() -> Signals {
        Signals {
            risk: 0.12,
            assurance: 0.85,
            anomaly: 0.9,
            synthetic_likelihood: 0.05,
            risk_model_version: "risk-v1".to_string(),
            anomaly_model_version: "anomaly-v1".to_string(),
            computed_at: Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
        }
    }

    fn outcome() -> PolicyOutcome {
        PolicyOutcome {
            decision: Decision::Allow,
            reasons: vec!["ASSURANCE_THRESHOLD_ALLOW".to_string()],
            rationale: "assurance 0.85 meets allow threshold with low risk".to_string(),
        }
    }

    #[test]
    fn test_inputs_hash_changes_with_policy_version() {
        let a = canonicalize(&build_inputs("profile-v1", &features(), &signals())).unwrap();
        let b = canonicalize(&build_inputs("profile-v2", &features(), &signals())).unwrap();
        assert_ne!(sha256_hex(a.as_bytes()), sha256_hex(b.as_bytes()));
    }

    #[test]
    fn test_outputs_hash_stable_for_same_outcome() {
        let a = canonicalize(&build_outputs(&outcome())).unwrap();
        let b = canonicalize(&build_outputs(&outcome())).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, r#"{"decision":"ALLOW","reasons":["ASSURANCE_THRESHOLD_ALLOW"]}"#);
    }

    #[test]
    fn test_signed_payload_is_canonical_and_complete() {
        let issued_at = Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap();
        let payload = build_signed_payload(
            "cert-uuid",
            7,
            42,
            "profile-v1",
            "aa",
            "bb",
            "cc",
            issued_at,
            "PS256",
            "origin-abc",
        )
        .unwrap();

        assert!(origin_core::canonical::is_canonical(&payload));
        // Sorted keys: alg first, upload_id last.
        assert!(payload.starts_with(r#"{"alg":"PS256""#));
        assert!(payload.ends_with(r#""upload_id":42}"#));
        assert!(payload.contains(r#""ledger_hash":"cc""#));
        assert!(payload.contains(r#""issued_at":"2026-01-02T03:04:05.000000Z""#));
    }

    #[tokio::test]
    async fn test_signature_verifies_against_jwks_key() {
        use origin_core::crypto::LocalKeyStore;
        use rsa::pss::VerifyingKey;
        use rsa::signature::Verifier;
        use sha2::Sha256;

        let store = LocalKeyStore::ephemeral().unwrap();
        let payload = build_signed_payload(
            "cert-uuid",
            7,
            42,
            "profile-v1",
            "aa",
            "bb",
            "cc",
            Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap(),
            store.alg(),
            store.active_key_id(),
        )
        .unwrap();

        let signed = store.sign(payload.as_bytes()).await.unwrap();
        let encoded = URL_SAFE_NO_PAD.encode(&signed.signature);

        // Verify the stored encoding against the advertised key.
        let signature_bytes = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
        let verifying_key = VerifyingKey::<Sha256>::new(store.active_public_key().clone());
        let signature = rsa::pss::Signature::try_from(signature_bytes.as_slice()).unwrap();
        verifying_key.verify(payload.as_bytes(), &signature).unwrap();

        // The JWK advertising this key carries the same alg the row stores.
        let jwks = store.jwks();
        let jwk = jwks.find(&signed.key_id).unwrap();
        assert_eq!(jwk.alg, store.alg());
    }
}
