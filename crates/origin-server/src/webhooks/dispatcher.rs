//! Durable webhook delivery.
//!
//! A background task claims due delivery rows (`FOR UPDATE SKIP LOCKED`,
//! so multiple instances can dispatch concurrently), signs the stored
//! payload bytes, and POSTs them with a per-attempt timeout. Failures
//! append the next attempt row with backoff from the configured schedule;
//! after the schedule is exhausted the delivery is dead-lettered and
//! retained. Deliveries for a webhook are independent and may complete
//! out of order.

use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use origin_core::crypto::EncryptedSecret;
use origin_core::webhook as signing;

use crate::state::AppState;
use crate::storage::models::{WebhookDeliveryRow, WebhookRow};

/// How many due rows one sweep claims.
const CLAIM_BATCH: i64 = 10;

/// Runs the dispatcher until cancelled.
pub async fn run(state: AppState, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(Duration::from_secs(1));
    tracing::info!("webhook dispatcher started");

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        match claim_due(&state).await {
            Ok(batch) => {
                for delivery in batch {
                    attempt(&state, delivery).await;
                }
            }
            Err(err) => {
                tracing::warn!(error = %err, "dispatcher sweep failed");
            }
        }
    }

    tracing::info!("webhook dispatcher stopped");
}

/// Claims due scheduled rows and moves them to `in_flight`.
async fn claim_due(state: &AppState) -> Result<Vec<WebhookDeliveryRow>, sqlx::Error> {
    sqlx::query_as::<_, WebhookDeliveryRow>(
        "UPDATE webhook_deliveries SET status = 'in_flight' \
         WHERE id IN ( \
             SELECT id FROM webhook_deliveries \
             WHERE status = 'scheduled' AND scheduled_at <= now() \
             ORDER BY scheduled_at \
             LIMIT $1 \
             FOR UPDATE SKIP LOCKED \
         ) \
         RETURNING id, webhook_id, event_id, event_type, payload, attempt, status, \
                   response_code, correlation_id, scheduled_at, completed_at",
    )
    .bind(CLAIM_BATCH)
    .fetch_all(&state.db)
    .await
}

async fn attempt(state: &AppState, delivery: WebhookDeliveryRow) {
    let webhook = match load_webhook(state, delivery.webhook_id).await {
        Ok(Some(webhook)) if webhook.active => webhook,
        Ok(_) => {
            // Deleted or deactivated endpoint: dead-letter immediately.
            finish(state, &delivery, "dead_lettered", None).await;
            return;
        }
        Err(err) => {
            tracing::warn!(delivery_id = delivery.id, error = %err, "webhook load failed");
            reschedule_same(state, &delivery).await;
            return;
        }
    };

    let secret = match decrypt_secret(state, &webhook).await {
        Ok(secret) => secret,
        Err(err) => {
            tracing::error!(webhook_id = webhook.id, error = %err, "secret decryption failed");
            finish(state, &delivery, "dead_lettered", None).await;
            return;
        }
    };

    let timestamp = Utc::now().timestamp();
    let signature = signing::sign(&secret, timestamp, &delivery.payload);

    // The transmitted body is exactly the signed bytes.
    let response = state
        .http
        .post(&webhook.url)
        .header("content-type", "application/json")
        .header(signing::SIGNATURE_HEADER, &signature)
        .header(signing::TIMESTAMP_HEADER, timestamp.to_string())
        .header(signing::EVENT_HEADER, &delivery.event_type)
        .header(signing::EVENT_ID_HEADER, &delivery.event_id)
        .header(
            signing::CORRELATION_ID_HEADER,
            delivery.correlation_id.as_deref().unwrap_or(""),
        )
        .body(delivery.payload.clone())
        .timeout(state.config.webhook_timeout)
        .send()
        .await;

    match response {
        Ok(response) if response.status().is_success() => {
            state
                .metrics
                .webhook_deliveries_total
                .with_label_values(&["success"])
                .inc();
            finish(state, &delivery, "success", Some(response.status().as_u16())).await;
        }
        Ok(response) => {
            state
                .metrics
                .webhook_deliveries_total
                .with_label_values(&["failed"])
                .inc();
            let code = response.status().as_u16();
            tracing::warn!(
                delivery_id = delivery.id,
                attempt = delivery.attempt,
                status = code,
                "webhook delivery rejected"
            );
            fail_and_backoff(state, &delivery, Some(code)).await;
        }
        Err(err) => {
            state
                .metrics
                .webhook_deliveries_total
                .with_label_values(&["failed"])
                .inc();
            tracing::warn!(
                delivery_id = delivery.id,
                attempt = delivery.attempt,
                error = %err,
                "webhook delivery failed"
            );
            fail_and_backoff(state, &delivery, None).await;
        }
    }
}

/// Marks the current attempt failed and appends the next one, or
/// dead-letters after the schedule is exhausted. The schedule allows one
/// retry per entry, so total attempts = schedule length + 1.
async fn fail_and_backoff(state: &AppState, delivery: &WebhookDeliveryRow, code: Option<u16>) {
    let schedule = &state.config.webhook_retry_schedule;
    let attempt_index = (delivery.attempt - 1).max(0) as usize;

    if attempt_index >= schedule.len() {
        finish(state, delivery, "dead_lettered", code).await;
        return;
    }

    finish(state, delivery, "failed", code).await;

    let delay = schedule[attempt_index];
    let next_at = Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
    let result = sqlx::query(
        "INSERT INTO webhook_deliveries \
         (webhook_id, event_id, event_type, payload, attempt, status, correlation_id, scheduled_at) \
         VALUES ($1, $2, $3, $4, $5, 'scheduled', $6, $7)",
    )
    .bind(delivery.webhook_id)
    .bind(&delivery.event_id)
    .bind(&delivery.event_type)
    .bind(&delivery.payload)
    .bind(delivery.attempt + 1)
    .bind(&delivery.correlation_id)
    .bind(next_at)
    .execute(&state.db)
    .await;

    if let Err(err) = result {
        tracing::error!(delivery_id = delivery.id, error = %err, "retry scheduling failed");
    }
}

async fn finish(
    state: &AppState,
    delivery: &WebhookDeliveryRow,
    status: &str,
    code: Option<u16>,
) {
    let result = sqlx::query(
        "UPDATE webhook_deliveries \
         SET status = $1, response_code = $2, completed_at = $3 WHERE id = $4",
    )
    .bind(status)
    .bind(code.map(i32::from))
    .bind(Utc::now())
    .bind(delivery.id)
    .execute(&state.db)
    .await;

    if let Err(err) = result {
        tracing::error!(delivery_id = delivery.id, error = %err, "delivery update failed");
    }
}

/// Puts an unprocessable claim back on the schedule unchanged.
async fn reschedule_same(state: &AppState, delivery: &WebhookDeliveryRow) {
    let result = sqlx::query(
        "UPDATE webhook_deliveries SET status = 'scheduled', scheduled_at = $1 WHERE id = $2",
    )
    .bind(Utc::now() + chrono::Duration::seconds(5))
    .bind(delivery.id)
    .execute(&state.db)
    .await;

    if let Err(err) = result {
        tracing::error!(delivery_id = delivery.id, error = %err, "reschedule failed");
    }
}

async fn load_webhook(
    state: &AppState,
    webhook_id: i64,
) -> Result<Option<WebhookRow>, sqlx::Error> {
    sqlx::query_as::<_, WebhookRow>(
        "SELECT id, tenant_id, url, events, encrypted_secret, active, created_at \
         FROM webhooks WHERE id = $1",
    )
    .bind(webhook_id)
    .fetch_optional(&state.db)
    .await
}

async fn decrypt_secret(state: &AppState, webhook: &WebhookRow) -> Result<String, String> {
    let encrypted: EncryptedSecret =
        serde_json::from_value(webhook.encrypted_secret.clone()).map_err(|e| e.to_string())?;
    state
        .encryption
        .decrypt(&encrypted)
        .await
        .map_err(|e| e.to_string())
}
