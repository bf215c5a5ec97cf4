//! Webhook management endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::{Extension, Json};
use serde::Deserialize;
use serde_json::{json, Value};

use crate::auth::AuthContext;
use crate::error::{ApiError, CorrelatedError};
use crate::state::AppState;
use crate::webhooks;

/// `POST /v1/webhooks` body.
#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    /// Endpoint URL.
    pub url: String,

    /// Subscribed event types.
    pub events: Vec<String>,

    /// Shared signing secret; encrypted at rest, never returned.
    pub secret: String,
}

/// Registers a webhook endpoint.
pub async fn create(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<CreateWebhookRequest>,
) -> Result<(StatusCode, Json<Value>), CorrelatedError> {
    let row = webhooks::create(&state, auth.tenant_id, &body.url, &body.events, &body.secret)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    tracing::info!(tenant_id = auth.tenant_id, webhook_id = row.id, "webhook registered");

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "id": row.id,
            "url": row.url,
            "events": row.events,
            "active": row.active,
            "created_at": row.created_at.to_rfc3339(),
        })),
    ))
}

/// `POST /v1/webhooks/test` body.
#[derive(Debug, Deserialize)]
pub struct TestWebhookRequest {
    /// Webhook to exercise.
    pub webhook_id: i64,
}

/// Schedules a signed `webhook.test` delivery to the given endpoint.
pub async fn test(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(body): Json<TestWebhookRequest>,
) -> Result<(StatusCode, Json<Value>), CorrelatedError> {
    let webhook = webhooks::find_owned(&state, auth.tenant_id, body.webhook_id)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    let payload = json!({
        "event": "webhook.test",
        "webhook_id": webhook.id,
        "correlation_id": auth.correlation_id,
    });
    let payload_bytes =
        serde_json::to_vec(&payload).map_err(|e| ApiError::Internal(e.to_string()))?;

    webhooks::schedule_delivery(
        &state,
        webhook.id,
        "webhook.test",
        &payload_bytes,
        &auth.correlation_id,
    )
    .await
    .map_err(|e| {
        ApiError::from(e).with_correlation(auth.correlation_id.clone())
    })?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "scheduled", "webhook_id": webhook.id })),
    ))
}

/// `GET /v1/webhooks/{id}/deliveries`: attempt history, newest first.
pub async fn deliveries(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Path(webhook_id): Path<i64>,
) -> Result<Json<Value>, CorrelatedError> {
    let rows = webhooks::list_deliveries(&state, auth.tenant_id, webhook_id)
        .await
        .map_err(|e| e.with_correlation(auth.correlation_id.clone()))?;

    let deliveries: Vec<Value> = rows
        .iter()
        .map(|d| {
            json!({
                "id": d.id,
                "event_id": d.event_id,
                "event_type": d.event_type,
                "attempt": d.attempt,
                "status": d.status,
                "response_code": d.response_code,
                "correlation_id": d.correlation_id,
                "scheduled_at": d.scheduled_at.to_rfc3339(),
                "completed_at": d.completed_at.map(|t| t.to_rfc3339()),
            })
        })
        .collect();

    Ok(Json(json!({ "webhook_id": webhook_id, "deliveries": deliveries })))
}
