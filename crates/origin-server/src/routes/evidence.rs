//! Evidence pack endpoints.

use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Json};
use serde::Deserialize;

use crate::auth::AuthContext;
use crate::error::CorrelatedError;
use crate::evidence::{self, DownloadOutcome, EvidencePackResponse};
use crate::state::AppState;

/// `POST /v1/evidence-packs` body.
#[derive(Debug, Deserialize)]
pub struct EvidencePackRequest {
    /// Certificate to document.
    pub certificate_id: String,

    /// Format or comma-separated list: json, pdf, html.
    #[serde(default = "default_format")]
    pub format: String,
}

fn default_format() -> String {
    "json".to_string()
}

/// Requests (or reuses) an evidence pack. 202 while pending.
pub async fn request(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<EvidencePackRequest>,
) -> Result<Response, CorrelatedError> {
    let (status, response) = evidence::request_pack(
        &state,
        auth.tenant_id,
        &body.certificate_id,
        &body.format,
        &auth.correlation_id,
    )
    .await
    .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    Ok(respond(status, response))
}

/// Polls a pack's state. 202 + `Retry-After` while pending.
pub async fn poll(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(certificate_id): Path<String>,
) -> Result<Response, CorrelatedError> {
    let (status, response) = evidence::poll_pack(&state, auth.tenant_id, &certificate_id)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    Ok(respond(status, response))
}

/// Downloads one artifact: streamed locally, redirected on S3.
pub async fn download(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path((certificate_id, format)): Path<(String, String)>,
) -> Result<Response, CorrelatedError> {
    let outcome = evidence::download(&state, auth.tenant_id, &certificate_id, &format)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    Ok(match outcome {
        DownloadOutcome::Stream {
            bytes,
            content_type,
        } => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        DownloadOutcome::Redirect { url } => Redirect::temporary(&url).into_response(),
    })
}

fn respond(status: StatusCode, response: EvidencePackResponse) -> Response {
    let retry_after = response.retry_after_seconds;
    let mut http_response = (status, Json(response)).into_response();
    if status == StatusCode::ACCEPTED {
        if let Some(secs) = retry_after {
            if let Ok(value) = secs.to_string().parse() {
                http_response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, value);
            }
        }
    }
    http_response
}
