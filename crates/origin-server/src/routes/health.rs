//! Liveness, readiness, and metrics exposition.

use std::collections::BTreeMap;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::state::AppState;
use crate::storage;

/// `GET /health`: trivial liveness.
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

/// `GET /ready`: 200 only when every dependency passes, else 503 with a
/// per-check status map.
pub async fn ready(State(state): State<AppState>) -> Response {
    let mut checks: BTreeMap<&'static str, String> = BTreeMap::new();
    let mut healthy = true;

    match storage::ping(&state.db).await {
        Ok(()) => {
            checks.insert("database", "ok".to_string());
        }
        Err(err) => {
            healthy = false;
            checks.insert("database", format!("failed: {err}"));
        }
    }

    match storage::migrations_at_head(&state.db).await {
        Ok(true) => {
            checks.insert("migrations", "ok".to_string());
        }
        Ok(false) => {
            healthy = false;
            checks.insert("migrations", "failed: not at head revision".to_string());
        }
        Err(err) => {
            healthy = false;
            checks.insert("migrations", format!("failed: {err}"));
        }
    }

    match state.cache.ping().await {
        Ok(()) => {
            checks.insert("cache", "ok".to_string());
        }
        Err(err) => {
            healthy = false;
            checks.insert("cache", format!("failed: {err}"));
        }
    }

    match state.blob.bucket_exists().await {
        Ok(true) => {
            checks.insert("blob_store", "ok".to_string());
        }
        Ok(false) => {
            healthy = false;
            checks.insert(
                "blob_store",
                format!("failed: bucket {} missing", state.config.blob_bucket),
            );
        }
        Err(err) => {
            healthy = false;
            checks.insert("blob_store", format!("failed: {err}"));
        }
    }

    if state.config.environment.is_dev_like() {
        checks.insert("signer", "skipped (development)".to_string());
    } else if state.signer.jwks().keys.is_empty() {
        healthy = false;
        checks.insert("signer", "failed: no public key available".to_string());
    } else {
        checks.insert("signer", "ok".to_string());
    }

    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(json!({
            "status": if healthy { "ready" } else { "not_ready" },
            "checks": checks,
        })),
    )
        .into_response()
}

/// `GET /metrics`: Prometheus exposition format.
pub async fn metrics(State(state): State<AppState>) -> Response {
    (
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
        .into_response()
}
