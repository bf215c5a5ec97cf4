//! `POST /v1/ingest`.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Extension;

use crate::auth::AuthContext;
use crate::error::{ApiError, CorrelatedError};
use crate::ingest::{self, IngestRequest};
use crate::state::AppState;

/// Runs the decision pipeline for one submission.
///
/// The raw body bytes are parsed here (rather than via a JSON extractor)
/// because the idempotency layer hashes and stores exactly what the
/// client sent.
pub async fn handle(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, CorrelatedError> {
    let timer = state.metrics.ingest_latency_seconds.start_timer();

    let request: IngestRequest = serde_json::from_slice(&body).map_err(|e| {
        ApiError::Validation(format!("invalid request body: {e}"))
            .with_correlation(auth.correlation_id.clone())
    })?;

    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty());

    let output = ingest::run(
        &state,
        auth.tenant_id,
        auth.policy_profile_id,
        idempotency_key,
        &body,
        &request,
        &auth.correlation_id,
    )
    .await
    .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    timer.observe_duration();
    state
        .metrics
        .requests_total
        .with_label_values(&["/v1/ingest", "200"])
        .inc();

    tracing::info!(
        tenant_id = auth.tenant_id,
        upload_external_id = %request.upload_external_id,
        fresh = output.fresh,
        "ingest decision returned"
    );

    // Stored bytes are returned verbatim so replays are byte-identical.
    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "application/json")],
        output.body,
    )
        .into_response())
}
