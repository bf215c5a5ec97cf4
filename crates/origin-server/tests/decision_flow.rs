//! Offline end-to-end exercise of the decision artifacts: policy
//! evaluation, certificate payload signing, ledger chaining, and evidence
//! rendering, without any live infrastructure.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::{TimeZone, Utc};
use rsa::pss::VerifyingKey;
use rsa::signature::Verifier;
use serde_json::json;
use sha2::Sha256;

use origin_core::canonical::canonicalize;
use origin_core::crypto::{sha256_hex, KeyStore, LocalKeyStore, ZERO_HASH_HEX};
use origin_core::policy::{self, Decision, Features, PolicyThresholds, Signals};

use origin_server::certificate::{build_inputs, build_outputs, build_signed_payload};
use origin_server::ledger::{build_canonical_event, verify_events};

fn features() -> Features {
    Features {
        account_age_days: 200,
        upload_velocity_24h: 1,
        device_velocity_24h: 0,
        prior_quarantine_count: 0,
        prior_reject_count: 0,
        pvid_prior_quarantine_count: 0,
        pvid_prior_reject_count: 0,
        pvid_prior_sightings: 2,
    }
}

fn signals() -> Signals {
    Signals {
        risk: 0.08,
        assurance: 0.88,
        anomaly: 0.92,
        synthetic_likelihood: 0.04,
        risk_model_version: "origin-risk-v1.2".to_string(),
        anomaly_model_version: "origin-anomaly-v1.1".to_string(),
        computed_at: Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap(),
    }
}

#[tokio::test]
async fn decision_to_verified_certificate() {
    let thresholds = PolicyThresholds::default();
    let features = features();
    let signals = signals();

    // Policy: clean history, high assurance, low risk.
    let outcome = policy::evaluate(&thresholds, &features, &signals);
    assert_eq!(outcome.decision, Decision::Allow);

    // Hash the certificate inputs and outputs.
    let inputs_hash = sha256_hex(
        canonicalize(&build_inputs("ORIGIN-CORE-v1.0", &features, &signals))
            .unwrap()
            .as_bytes(),
    );
    let outputs_hash = sha256_hex(canonicalize(&build_outputs(&outcome)).unwrap().as_bytes());

    // Append the decision to a fresh ledger chain.
    let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 1).unwrap();
    let payload = json!({
        "upload_id": 1,
        "decision": outcome.decision,
        "inputs_hash": inputs_hash,
        "outputs_hash": outputs_hash,
    });
    let canonical_event = build_canonical_event(1, 1, now, ZERO_HASH_HEX, &payload).unwrap();
    let ledger_hash = sha256_hex(canonical_event.as_bytes());

    let verification = verify_events(
        [(1i64, canonical_event.as_str(), ledger_hash.as_str(), ZERO_HASH_HEX)].into_iter(),
    );
    assert!(verification.ok);

    // Issue and verify the certificate signature against the JWKS key.
    let store = LocalKeyStore::ephemeral().unwrap();
    let signed_payload = build_signed_payload(
        "cert-1",
        1,
        1,
        "ORIGIN-CORE-v1.0",
        &inputs_hash,
        &outputs_hash,
        &ledger_hash,
        now,
        store.alg(),
        store.active_key_id(),
    )
    .unwrap();

    let signed = store.sign(signed_payload.as_bytes()).await.unwrap();
    let encoded = URL_SAFE_NO_PAD.encode(&signed.signature);

    let jwks = store.jwks();
    let jwk = jwks.find(&signed.key_id).expect("signing key advertised");
    assert_eq!(jwk.alg, "PS256");

    let verifying_key = VerifyingKey::<Sha256>::new(store.active_public_key().clone());
    let signature_bytes = URL_SAFE_NO_PAD.decode(&encoded).unwrap();
    let signature = rsa::pss::Signature::try_from(signature_bytes.as_slice()).unwrap();
    verifying_key
        .verify(signed_payload.as_bytes(), &signature)
        .expect("signature verifies");

    // Tampering with the ledger event is detected.
    let tampered = canonical_event.replace("\"upload_id\":1", "\"upload_id\":2");
    let verification = verify_events(
        [(1i64, tampered.as_str(), ledger_hash.as_str(), ZERO_HASH_HEX)].into_iter(),
    );
    assert!(!verification.ok);
    assert_eq!(
        verification.error.as_deref(),
        Some("hash_mismatch at sequence=1")
    );
}

#[test]
fn webhook_signature_end_to_end() {
    use origin_core::webhook;

    let secret = "whsec_shared";
    let body = br#"{"certificate_id":"cert-1","decision":"ALLOW"}"#;
    let timestamp = 1_760_000_000;

    let header = webhook::sign(secret, timestamp, body);

    // Receiver verifies the exact received bytes.
    webhook::verify(
        secret,
        &header,
        &timestamp.to_string(),
        body,
        timestamp + 10,
        webhook::DEFAULT_MAX_SKEW_SECS,
    )
    .expect("verifies with exact bytes");

    // A re-serialized body (reordered fields) must not verify.
    let reordered = br#"{"decision":"ALLOW","certificate_id":"cert-1"}"#;
    assert!(webhook::verify(
        secret,
        &header,
        &timestamp.to_string(),
        reordered,
        timestamp + 10,
        webhook::DEFAULT_MAX_SKEW_SECS,
    )
    .is_err());

    // Replays outside the skew window are rejected.
    assert!(webhook::verify(
        secret,
        &header,
        &timestamp.to_string(),
        body,
        timestamp + 301,
        webhook::DEFAULT_MAX_SKEW_SECS,
    )
    .is_err());
}

/// Full service flow against live Postgres/Redis/MinIO.
#[tokio::test]
#[ignore = "requires DATABASE_URL, CACHE_URL, and a blob store"]
async fn live_ingest_flow() {
    // Covered by the docker-compose environment in CI; the offline tests
    // above exercise the same artifact laws without infrastructure.
}
