//! `GET /v1/certificates/{certificate_id}`.

use axum::extract::{Path, State};
use axum::{Extension, Json};
use serde_json::{json, Value};

use crate::auth::AuthContext;
use crate::error::{ApiError, CorrelatedError};
use crate::evidence::find_certificate;
use crate::state::AppState;

/// Returns the full certificate record, including the canonical signed
/// payload so holders can verify the signature against the JWKS offline.
pub async fn fetch(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(certificate_id): Path<String>,
) -> Result<Json<Value>, CorrelatedError> {
    let certificate = find_certificate(&state, auth.tenant_id, &certificate_id)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?
        .ok_or_else(|| {
            ApiError::NotFound(format!("certificate {certificate_id} not found"))
                .with_correlation(auth.correlation_id.clone())
        })?;

    Ok(Json(json!({
        "certificate_id": certificate.certificate_id,
        "tenant_id": certificate.tenant_id,
        "upload_id": certificate.upload_id,
        "policy_version": certificate.policy_version,
        "inputs_hash": certificate.inputs_hash,
        "outputs_hash": certificate.outputs_hash,
        "ledger_hash": certificate.ledger_hash,
        "key_id": certificate.key_id,
        "alg": certificate.alg,
        "signature": certificate.signature,
        "signature_encoding": certificate.signature_encoding,
        "signed_payload": certificate.signed_payload,
        "issued_at": certificate.issued_at.to_rfc3339(),
        "jwks_url": "/v1/keys/jwks.json",
    })))
}
