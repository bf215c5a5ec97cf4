//! The per-request decision pipeline.
//!
//! Identity resolution → feature computation → inference → policy
//! evaluation → ledger append → certificate issuance, all inside one
//! database transaction so a client disconnect or mid-flight failure
//! leaves no partial certificate or ledger event. Webhook enqueue happens
//! after commit and is best-effort.
//!
//! # Idempotency
//!
//! `(tenant_id, idempotency_key)` maps to the stored response bytes; a
//! replay returns them verbatim. A replay whose body hash differs is a
//! 409. The unique index arbitrates concurrent first requests: the loser
//! rolls back and serves the winner's stored response.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use uuid::Uuid;

use origin_core::canonical::canonicalize;
use origin_core::crypto::sha256_hex;
use origin_core::policy::{self, PolicyThresholds};

use crate::certificate::{self, CertificateError};
use crate::error::ApiError;
use crate::features;
use crate::identity;
use crate::ledger::{self, LedgerError};
use crate::state::AppState;
use crate::storage::models::{IdempotencyRecord, PolicyProfile};
use crate::webhooks;

/// Ingest request body.
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// External account identifier; upserted on first sight.
    pub account_external_id: String,

    /// External upload identifier; unique per tenant.
    pub upload_external_id: String,

    /// Account type: user, organization, bot.
    #[serde(default = "default_account_type")]
    pub account_type: String,

    /// Optional account display name.
    #[serde(default)]
    pub display_name: Option<String>,

    /// Upload metadata (title, collaborators, disclosure flags).
    #[serde(default)]
    pub metadata: Option<Map<String, Value>>,

    /// URL or reference to the content.
    #[serde(default)]
    pub content_ref: Option<String>,

    /// Content fingerprints (audio hash, perceptual hash).
    #[serde(default)]
    pub fingerprints: Option<Map<String, Value>>,

    /// Device context (`device_hash`, `ip`, `user_agent`).
    #[serde(default)]
    pub device_context: Option<Map<String, Value>>,
}

fn default_account_type() -> String {
    "user".to_string()
}

/// Ingest response body.
#[derive(Debug, Clone, Serialize)]
pub struct IngestResponse {
    /// Server-assigned id for this ingestion.
    pub ingestion_id: String,

    /// The binding decision.
    pub decision: String,

    /// Policy profile version that produced it.
    pub policy_version: String,

    /// Risk score in [0,1].
    pub risk_score: f64,

    /// Assurance score in [0,1].
    pub assurance_score: f64,

    /// Certificate documenting the decision.
    pub certificate_id: String,

    /// Hash of the ledger event the certificate is bound to.
    pub ledger_hash: String,

    /// Codes of the rules that fired.
    pub reasons: Vec<String>,

    /// Explanation of the decisive rule.
    pub decision_rationale: String,

    /// Full signal vector.
    pub ml_signals: Value,

    /// Where to request the evidence pack.
    pub evidence_pack_request_url: String,
}

/// Result of the pipeline: the response bytes to return. They are stored
/// under the idempotency key, so replays are byte-identical.
pub struct PipelineOutput {
    /// Serialized [`IngestResponse`].
    pub body: Vec<u8>,

    /// True when this call performed the work (vs. replayed a stored
    /// response).
    pub fresh: bool,
}

/// Runs the pipeline for one request.
///
/// `raw_body` is the exact request body, hashed for idempotency conflict
/// detection.
///
/// # Errors
///
/// Returns [`ApiError`] per the taxonomy; any failure after work began
/// aborts the transaction.
pub async fn run(
    state: &AppState,
    tenant_id: i64,
    policy_profile_id: Option<i64>,
    idempotency_key: Option<&str>,
    raw_body: &[u8],
    request: &IngestRequest,
    correlation_id: &str,
) -> Result<PipelineOutput, ApiError> {
    let request_hash = sha256_hex(raw_body);

    if let Some(key) = idempotency_key {
        if let Some(stored) = load_idempotency(state, tenant_id, key).await? {
            if stored.request_hash != request_hash {
                return Err(ApiError::Conflict(
                    "idempotency key replayed with a different body".to_string(),
                ));
            }
            return Ok(PipelineOutput {
                body: stored.response_body,
                fresh: false,
            });
        }
    }

    let now = Utc::now();
    let mut tx = state.db.begin().await?;

    let account = identity::upsert_account(
        &mut *tx,
        tenant_id,
        &request.account_external_id,
        &request.account_type,
        request.display_name.as_deref(),
    )
    .await?;

    let device_hash = request
        .device_context
        .as_ref()
        .and_then(|ctx| ctx.get("device_hash"))
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let pvid = identity::derive_pvid(
        request.content_ref.as_deref(),
        request.fingerprints.as_ref(),
        request.metadata.as_ref(),
    );

    let features = features::compute(
        &mut *tx,
        tenant_id,
        account.id,
        account.created_at,
        device_hash.as_deref(),
        &pvid,
        now,
    )
    .await?;

    let signals = state
        .inference
        .score(&features, request.metadata.as_ref(), now);

    let (thresholds, policy_version) =
        resolve_policy(state, tenant_id, policy_profile_id).await?;
    let outcome = policy::evaluate(&thresholds, &features, &signals);

    let decision_inputs = json!({
        "features": features,
        "signals": signals,
        "pvid": pvid,
    });

    let upload = sqlx::query_as::<_, crate::storage::models::Upload>(
        "INSERT INTO uploads \
         (tenant_id, external_id, account_id, device_hash, pvid, decision, metadata_json, \
          decision_inputs_json, received_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING id, tenant_id, external_id, account_id, device_hash, pvid, decision, \
                   metadata_json, decision_inputs_json, certificate_id, ledger_event_id, received_at",
    )
    .bind(tenant_id)
    .bind(&request.upload_external_id)
    .bind(account.id)
    .bind(&device_hash)
    .bind(&pvid)
    .bind(outcome.decision.as_str())
    .bind(request.metadata.as_ref().map(|m| Value::Object(m.clone())))
    .bind(&decision_inputs)
    .bind(now)
    .fetch_one(&mut *tx)
    .await
    .map_err(|err| {
        if is_unique_violation(&err) {
            ApiError::Conflict(format!(
                "upload external id '{}' already exists",
                request.upload_external_id
            ))
        } else {
            err.into()
        }
    })?;

    sqlx::query(
        "INSERT INTO risk_signals \
         (tenant_id, upload_id, risk, assurance, anomaly, synthetic_likelihood, \
          risk_model_version, anomaly_model_version, computed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
    )
    .bind(tenant_id)
    .bind(upload.id)
    .bind(signals.risk)
    .bind(signals.assurance)
    .bind(signals.anomaly)
    .bind(signals.synthetic_likelihood)
    .bind(&signals.risk_model_version)
    .bind(&signals.anomaly_model_version)
    .bind(signals.computed_at)
    .execute(&mut *tx)
    .await?;

    // Hashes feed both the ledger payload and the certificate.
    let inputs_hash = sha256_hex(
        canonicalize(&certificate::build_inputs(&policy_version, &features, &signals))
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .as_bytes(),
    );
    let outputs_hash = sha256_hex(
        canonicalize(&certificate::build_outputs(&outcome))
            .map_err(|e| ApiError::Internal(e.to_string()))?
            .as_bytes(),
    );

    let ledger_payload = json!({
        "upload_id": upload.id,
        "decision": outcome.decision,
        "model_versions": {
            "risk": signals.risk_model_version,
            "anomaly": signals.anomaly_model_version,
        },
        "inputs_hash": inputs_hash,
        "outputs_hash": outputs_hash,
    });
    let ledger_event = ledger::append(&mut tx, tenant_id, &ledger_payload, now)
        .await
        .map_err(|err| match err {
            LedgerError::Database(e) => ApiError::from(e),
            LedgerError::Canonical(e) => ApiError::Internal(e.to_string()),
        })?;

    let cert = certificate::issue(
        &mut *tx,
        state.signer.as_ref(),
        tenant_id,
        upload.id,
        &policy_version,
        &features,
        &signals,
        &outcome,
        &ledger_event.event_hash,
        now,
    )
    .await
    .map_err(|err| match err {
        CertificateError::Database(e) => ApiError::from(e),
        CertificateError::Canonical(e) => ApiError::Internal(e.to_string()),
        CertificateError::Signer(e) => ApiError::Internal(e.to_string()),
    })?;

    sqlx::query("UPDATE uploads SET certificate_id = $1, ledger_event_id = $2 WHERE id = $3")
        .bind(cert.id)
        .bind(ledger_event.id)
        .bind(upload.id)
        .execute(&mut *tx)
        .await?;

    let response = IngestResponse {
        ingestion_id: Uuid::new_v4().to_string(),
        decision: outcome.decision.as_str().to_string(),
        policy_version: policy_version.clone(),
        risk_score: signals.risk,
        assurance_score: signals.assurance,
        certificate_id: cert.certificate_id.clone(),
        ledger_hash: ledger_event.event_hash.clone(),
        reasons: outcome.reasons.clone(),
        decision_rationale: outcome.rationale.clone(),
        ml_signals: json!({
            "risk": signals.risk,
            "assurance": signals.assurance,
            "anomaly": signals.anomaly,
            "synthetic_likelihood": signals.synthetic_likelihood,
            "risk_model_version": signals.risk_model_version,
            "anomaly_model_version": signals.anomaly_model_version,
        }),
        evidence_pack_request_url: "/v1/evidence-packs".to_string(),
    };
    let body = serde_json::to_vec(&response).map_err(|e| ApiError::Internal(e.to_string()))?;

    if let Some(key) = idempotency_key {
        let inserted = sqlx::query(
            "INSERT INTO idempotency_records (tenant_id, idempotency_key, request_hash, response_body) \
             VALUES ($1, $2, $3, $4)",
        )
        .bind(tenant_id)
        .bind(key)
        .bind(&request_hash)
        .bind(&body)
        .execute(&mut *tx)
        .await;

        if let Err(err) = inserted {
            if is_unique_violation(&err) {
                // A concurrent request with the same key won; serve its
                // stored response instead of ours.
                tx.rollback().await?;
                let stored = load_idempotency(state, tenant_id, key)
                    .await?
                    .ok_or_else(|| ApiError::Internal("idempotency race lost twice".to_string()))?;
                if stored.request_hash != request_hash {
                    return Err(ApiError::Conflict(
                        "idempotency key replayed with a different body".to_string(),
                    ));
                }
                return Ok(PipelineOutput {
                    body: stored.response_body,
                    fresh: false,
                });
            }
            return Err(err.into());
        }
    }

    tx.commit().await?;

    // Post-commit, best-effort and recoverable.
    webhooks::enqueue_event(
        state,
        tenant_id,
        "decision.created",
        &json!({
            "certificate_id": cert.certificate_id,
            "upload_external_id": request.upload_external_id,
            "decision": outcome.decision,
            "ledger_hash": ledger_event.event_hash,
            "correlation_id": correlation_id,
        }),
        correlation_id,
    )
    .await;

    Ok(PipelineOutput { body, fresh: true })
}

async fn load_idempotency(
    state: &AppState,
    tenant_id: i64,
    key: &str,
) -> Result<Option<IdempotencyRecord>, ApiError> {
    Ok(sqlx::query_as::<_, IdempotencyRecord>(
        "SELECT id, tenant_id, idempotency_key, request_hash, response_body, created_at \
         FROM idempotency_records WHERE tenant_id = $1 AND idempotency_key = $2",
    )
    .bind(tenant_id)
    .bind(key)
    .fetch_optional(&state.db)
    .await?)
}

/// Resolves the tenant's policy thresholds and version: the referenced
/// profile, else the tenant's active profile, else the global default
/// row, else built-in defaults.
async fn resolve_policy(
    state: &AppState,
    tenant_id: i64,
    policy_profile_id: Option<i64>,
) -> Result<(PolicyThresholds, String), ApiError> {
    let profile = match policy_profile_id {
        Some(id) => {
            sqlx::query_as::<_, PolicyProfile>(
                "SELECT id, tenant_id, name, version, thresholds_json, risk_model_version, \
                        anomaly_model_version, is_active, created_at \
                 FROM policy_profiles WHERE id = $1 AND is_active",
            )
            .bind(id)
            .fetch_optional(&state.db)
            .await?
        }
        None => None,
    };

    let profile = match profile {
        Some(p) => Some(p),
        None => {
            sqlx::query_as::<_, PolicyProfile>(
                "SELECT id, tenant_id, name, version, thresholds_json, risk_model_version, \
                        anomaly_model_version, is_active, created_at \
                 FROM policy_profiles \
                 WHERE (tenant_id = $1 OR tenant_id IS NULL) AND is_active \
                 ORDER BY tenant_id NULLS LAST LIMIT 1",
            )
            .bind(tenant_id)
            .fetch_optional(&state.db)
            .await?
        }
    };

    match profile {
        Some(profile) => {
            let thresholds: PolicyThresholds =
                serde_json::from_value(profile.thresholds_json.clone()).map_err(|e| {
                    ApiError::Internal(format!("corrupt thresholds on profile {}: {e}", profile.id))
                })?;
            Ok((thresholds, profile.version))
        }
        None => Ok((PolicyThresholds::default(), "ORIGIN-CORE-v1.0".to_string())),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    err.as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505")
}
