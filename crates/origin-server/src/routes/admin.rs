//! Administrative endpoints (scope `admin`).

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use chrono::Utc;
use secrecy::ExposeSecret as _;
use serde::Deserialize;
use serde_json::{json, Value};

use origin_core::apikey;
use origin_core::policy::PolicyThresholds;

use crate::auth::AuthContext;
use crate::error::{ApiError, CorrelatedError};
use crate::ledger;
use crate::state::AppState;

/// `POST /admin/tenants` body.
#[derive(Debug, Deserialize)]
pub struct CreateTenantRequest {
    /// Display name.
    pub name: String,

    /// Optional CIDR/exact-IP allowlist.
    #[serde(default)]
    pub ip_allowlist: Option<Vec<String>>,

    /// Token-bucket capacity per minute.
    #[serde(default)]
    pub rate_limit_per_minute: Option<i64>,

    /// Scopes for the initial API key.
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
}

fn default_scopes() -> Vec<String> {
    vec![
        "ingest:write".to_string(),
        "evidence:write".to_string(),
        "evidence:read".to_string(),
        "certificates:read".to_string(),
    ]
}

/// Creates a tenant with a default policy profile and an initial API key.
/// The raw key appears in this response only.
pub async fn create_tenant(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateTenantRequest>,
) -> Result<(StatusCode, Json<Value>), CorrelatedError> {
    if body.name.trim().is_empty() {
        return Err(ApiError::Validation("tenant name must not be empty".to_string())
            .with_correlation(auth.correlation_id.clone()));
    }

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    let tenant_id: i64 = sqlx::query_scalar(
        "INSERT INTO tenants (name, ip_allowlist, rate_limit_per_minute) \
         VALUES ($1, $2, $3) RETURNING id",
    )
    .bind(body.name.trim())
    .bind(body.ip_allowlist.as_ref().map(|list| json!(list)))
    .bind(
        body.rate_limit_per_minute
            .unwrap_or(state.config.rate_limit_per_minute),
    )
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    let profile_id: i64 = sqlx::query_scalar(
        "INSERT INTO policy_profiles \
         (tenant_id, name, version, thresholds_json, risk_model_version, anomaly_model_version) \
         VALUES ($1, 'default', 'ORIGIN-CORE-v1.0', $2, $3, $4) RETURNING id",
    )
    .bind(tenant_id)
    .bind(serde_json::to_value(PolicyThresholds::default()).unwrap_or_default())
    .bind(crate::inference::RISK_MODEL_VERSION)
    .bind(crate::inference::ANOMALY_MODEL_VERSION)
    .fetch_one(&mut *tx)
    .await
    .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    sqlx::query("UPDATE tenants SET policy_profile_id = $1 WHERE id = $2")
        .bind(profile_id)
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    let raw_key = insert_api_key(&state, &mut tx, tenant_id, &body.scopes)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    tracing::info!(tenant_id, name = %body.name, "tenant created");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "tenant_id": tenant_id,
            "name": body.name.trim(),
            "policy_profile_id": profile_id,
            "api_key": raw_key,
            "scopes": body.scopes,
        })),
    ))
}

/// `POST /admin/tenants/{id}/rotate-api-key` body.
#[derive(Debug, Default, Deserialize)]
pub struct RotateKeyRequest {
    /// Scopes for the replacement key; defaults to the revoked key's set.
    #[serde(default)]
    pub scopes: Option<Vec<String>>,
}

/// Revokes the tenant's keys and issues a fresh one.
pub async fn rotate_api_key(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<i64>,
    body: Option<Json<RotateKeyRequest>>,
) -> Result<Json<Value>, CorrelatedError> {
    let request = body.map(|Json(b)| b).unwrap_or_default();

    let mut tx = state
        .db
        .begin()
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    let previous_scopes: Option<Value> = sqlx::query_scalar(
        "SELECT scopes FROM api_keys WHERE tenant_id = $1 AND revoked_at IS NULL \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(&mut *tx)
    .await
    .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    sqlx::query("UPDATE api_keys SET revoked_at = $1 WHERE tenant_id = $2 AND revoked_at IS NULL")
        .bind(Utc::now())
        .bind(tenant_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    let scopes: Vec<String> = request.scopes.unwrap_or_else(|| {
        previous_scopes
            .and_then(|v| serde_json::from_value(v).ok())
            .unwrap_or_else(default_scopes)
    });

    let raw_key = insert_api_key(&state, &mut tx, tenant_id, &scopes)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    tx.commit()
        .await
        .map_err(|e| ApiError::from(e).with_correlation(auth.correlation_id.clone()))?;

    tracing::info!(tenant_id, "api key rotated");

    Ok(Json(json!({
        "tenant_id": tenant_id,
        "api_key": raw_key,
        "scopes": scopes,
    })))
}

/// `GET /admin/tenants/{id}/ledger/verify`: offline chain verification.
/// Integrity failures are reported in the body, never swallowed.
pub async fn verify_ledger(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(tenant_id): Path<i64>,
) -> Result<Json<Value>, CorrelatedError> {
    let verification = ledger::verify_chain(&state.db, tenant_id)
        .await
        .map_err(|e| {
            ApiError::Internal(e.to_string()).with_correlation(auth.correlation_id.clone())
        })?;

    Ok(Json(json!({
        "tenant_id": tenant_id,
        "ok": verification.ok,
        "error": verification.error,
        "events_checked": verification.events_checked,
    })))
}

async fn insert_api_key(
    state: &AppState,
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    tenant_id: i64,
    scopes: &[String],
) -> Result<String, ApiError> {
    let raw_key = apikey::generate_raw_key();
    let prefix = apikey::key_prefix(&raw_key);
    let digest = apikey::key_digest(state.config.server_secret.expose_secret(), &raw_key);

    sqlx::query(
        "INSERT INTO api_keys (tenant_id, prefix, digest, scopes) VALUES ($1, $2, $3, $4)",
    )
    .bind(tenant_id)
    .bind(prefix)
    .bind(&digest)
    .bind(json!(scopes))
    .execute(&mut **tx)
    .await?;

    Ok(raw_key)
}
