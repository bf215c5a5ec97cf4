//! Webhook registration and event fan-out.
//!
//! Secrets are encrypted at rest through the configured provider and only
//! decrypted inside the dispatcher. Events fan out as durable delivery
//! rows — the payload bytes stored on the row are the exact bytes that
//! will be signed and transmitted, so no re-serialization can occur
//! between signing and sending.

pub mod dispatcher;

use chrono::Utc;
use serde_json::Value;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::models::{WebhookDeliveryRow, WebhookRow};

/// Registers a webhook, encrypting its secret.
///
/// # Errors
///
/// Returns [`ApiError`] on validation, encryption, or database failure.
pub async fn create(
    state: &AppState,
    tenant_id: i64,
    url: &str,
    events: &[String],
    secret: &str,
) -> Result<WebhookRow, ApiError> {
    if !url.starts_with("https://") && !url.starts_with("http://") {
        return Err(ApiError::Validation("webhook url must be http(s)".to_string()));
    }
    if events.is_empty() {
        return Err(ApiError::Validation("at least one event type required".to_string()));
    }
    if secret.len() < 16 {
        return Err(ApiError::Validation(
            "webhook secret must be at least 16 characters".to_string(),
        ));
    }

    let encrypted = state
        .encryption
        .encrypt(secret)
        .await
        .map_err(|e| ApiError::Internal(format!("secret encryption failed: {e}")))?;
    let encrypted_json =
        serde_json::to_value(&encrypted).map_err(|e| ApiError::Internal(e.to_string()))?;

    let row = sqlx::query_as::<_, WebhookRow>(
        "INSERT INTO webhooks (tenant_id, url, events, encrypted_secret) \
         VALUES ($1, $2, $3, $4) \
         RETURNING id, tenant_id, url, events, encrypted_secret, active, created_at",
    )
    .bind(tenant_id)
    .bind(url)
    .bind(serde_json::to_value(events).map_err(|e| ApiError::Internal(e.to_string()))?)
    .bind(&encrypted_json)
    .fetch_one(&state.db)
    .await?;

    Ok(row)
}

/// Fans an event out to every subscribed active webhook of the tenant.
///
/// Best-effort: failures are logged, never surfaced to the caller — the
/// dispatcher recovers scheduled rows, and a tenant without webhooks is
/// the common case.
pub async fn enqueue_event(
    state: &AppState,
    tenant_id: i64,
    event_type: &str,
    payload: &Value,
    correlation_id: &str,
) {
    let Ok(payload_bytes) = serde_json::to_vec(payload) else {
        tracing::error!(event_type, "webhook payload serialization failed");
        return;
    };

    let webhooks = match sqlx::query_as::<_, WebhookRow>(
        "SELECT id, tenant_id, url, events, encrypted_secret, active, created_at \
         FROM webhooks WHERE tenant_id = $1 AND active",
    )
    .bind(tenant_id)
    .fetch_all(&state.db)
    .await
    {
        Ok(rows) => rows,
        Err(err) => {
            tracing::warn!(error = %err, "webhook lookup failed; event dropped");
            return;
        }
    };

    for webhook in webhooks {
        let subscribed = webhook
            .events
            .as_array()
            .is_some_and(|events| events.iter().any(|e| e.as_str() == Some(event_type)));
        if !subscribed {
            continue;
        }

        if let Err(err) = schedule_delivery(
            state,
            webhook.id,
            event_type,
            &payload_bytes,
            correlation_id,
        )
        .await
        {
            tracing::warn!(webhook_id = webhook.id, error = %err, "delivery enqueue failed");
        }
    }
}

/// Schedules the first delivery attempt for one webhook.
///
/// # Errors
///
/// Returns the underlying sqlx error on failure.
pub async fn schedule_delivery(
    state: &AppState,
    webhook_id: i64,
    event_type: &str,
    payload_bytes: &[u8],
    correlation_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO webhook_deliveries \
         (webhook_id, event_id, event_type, payload, attempt, status, correlation_id, scheduled_at) \
         VALUES ($1, $2, $3, $4, 1, 'scheduled', $5, $6)",
    )
    .bind(webhook_id)
    .bind(Uuid::new_v4().to_string())
    .bind(event_type)
    .bind(payload_bytes)
    .bind(correlation_id)
    .bind(Utc::now())
    .execute(&state.db)
    .await?;
    Ok(())
}

/// Loads a tenant's webhook by id, enforcing ownership.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] for unknown or foreign ids.
pub async fn find_owned(
    state: &AppState,
    tenant_id: i64,
    webhook_id: i64,
) -> Result<WebhookRow, ApiError> {
    sqlx::query_as::<_, WebhookRow>(
        "SELECT id, tenant_id, url, events, encrypted_secret, active, created_at \
         FROM webhooks WHERE id = $1 AND tenant_id = $2",
    )
    .bind(webhook_id)
    .bind(tenant_id)
    .fetch_optional(&state.db)
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("webhook {webhook_id} not found")))
}

/// Lists delivery attempts for a tenant's webhook, newest first.
///
/// # Errors
///
/// Returns [`ApiError`] on missing webhook or database failure.
pub async fn list_deliveries(
    state: &AppState,
    tenant_id: i64,
    webhook_id: i64,
) -> Result<Vec<WebhookDeliveryRow>, ApiError> {
    find_owned(state, tenant_id, webhook_id).await?;

    Ok(sqlx::query_as::<_, WebhookDeliveryRow>(
        "SELECT id, webhook_id, event_id, event_type, payload, attempt, status, response_code, \
                correlation_id, scheduled_at, completed_at \
         FROM webhook_deliveries WHERE webhook_id = $1 ORDER BY id DESC LIMIT 100",
    )
    .bind(webhook_id)
    .fetch_all(&state.db)
    .await?)
}
