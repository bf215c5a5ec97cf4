//! Evidence generation worker.
//!
//! Workers consume the broker queue, render every requested format, store
//! artifacts at tenant-scoped keys, and flip the row to `ready` with the
//! recorded keys, hashes, and sizes. Deterministic rendering errors flip
//! the row to `failed`; transient infrastructure errors re-enqueue the
//! task (bounded) and never produce a terminal state.

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::Instrument as _;

use origin_core::crypto::sha256_hex;
use origin_core::task::TaskStatus;

use crate::blob::artifact_key;
use crate::broker::{EvidenceTask, TaskRecord};
use crate::state::AppState;
use crate::storage::models::{LedgerEventRow, Upload};

use super::generator;

/// Transient re-enqueue budget before a task is left for stuck-requeue.
const MAX_TRANSIENT_ATTEMPTS: u32 = 3;

enum WorkError {
    /// Rendering or missing-data failure; terminal.
    Deterministic { code: &'static str, message: String },
    /// Infrastructure failure; retry.
    Transient(String),
}

/// Runs one worker until cancelled.
pub async fn run(state: AppState, shutdown: CancellationToken) {
    tracing::info!("evidence worker started");

    loop {
        let task = tokio::select! {
            () = shutdown.cancelled() => break,
            task = state.broker.pop(5.0) => task,
        };

        match task {
            Ok(Some(task)) => process(&state, task).await,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(error = %err, "broker pop failed; backing off");
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            }
        }
    }

    tracing::info!("evidence worker stopped");
}

async fn process(state: &AppState, task: EvidenceTask) {
    let span = tracing::info_span!(
        "evidence_task",
        task_id = %task.task_id,
        correlation_id = %task.correlation_id,
        tenant_id = task.tenant_id,
    );
    process_inner(state, task).instrument(span).await;
}

async fn process_inner(state: &AppState, task: EvidenceTask) {
    set_status(state, &task.task_id, TaskStatus::Started, None).await;

    match execute(state, &task).await {
        Ok(()) => {
            set_status(state, &task.task_id, TaskStatus::Success, None).await;
            state
                .metrics
                .evidence_packs_total
                .with_label_values(&["ready"])
                .inc();
            tracing::info!("evidence pack generated");
        }
        Err(WorkError::Deterministic { code, message }) => {
            tracing::error!(code, message = %message, "evidence generation failed");
            if let Some(row) = super::find_pack(state, task.tenant_id, &task.certificate_id)
                .await
                .ok()
                .flatten()
            {
                let _ = super::mark_failed(state, row.id, code, &message).await;
            }
            set_status(state, &task.task_id, TaskStatus::Failure, Some(code)).await;
            state
                .metrics
                .evidence_packs_total
                .with_label_values(&["failed"])
                .inc();

            webhook_notify(state, &task, "evidence_pack.failed").await;
        }
        Err(WorkError::Transient(message)) => {
            tracing::warn!(attempt = task.attempt, message = %message, "transient failure");
            if task.attempt < MAX_TRANSIENT_ATTEMPTS {
                let retry = EvidenceTask {
                    attempt: task.attempt + 1,
                    ..task.clone()
                };
                set_status(state, &task.task_id, TaskStatus::Retry, None).await;
                if let Err(err) = state.broker.enqueue(&retry).await {
                    tracing::warn!(error = %err, "re-enqueue failed; leaving pack pending");
                }
            }
            // Out of budget: the row stays pending and the stuck-requeue
            // path recovers it later.
        }
    }
}

async fn execute(state: &AppState, task: &EvidenceTask) -> Result<(), WorkError> {
    let certificate = super::find_certificate(state, task.tenant_id, &task.certificate_id)
        .await
        .map_err(|e| WorkError::Transient(e.to_string()))?
        .ok_or_else(|| WorkError::Deterministic {
            code: "CERTIFICATE_NOT_FOUND",
            message: format!("certificate {} not found", task.certificate_id),
        })?;

    let pack = super::find_pack(state, task.tenant_id, &task.certificate_id)
        .await
        .map_err(|e| WorkError::Transient(e.to_string()))?
        .ok_or_else(|| WorkError::Deterministic {
            code: "PACK_ROW_MISSING",
            message: "evidence pack row missing".to_string(),
        })?;

    // Once ready, never regress; a duplicate task is a no-op.
    if pack.status == "ready" {
        return Ok(());
    }

    let upload = sqlx::query_as::<_, Upload>(
        "SELECT id, tenant_id, external_id, account_id, device_hash, pvid, decision, \
                metadata_json, decision_inputs_json, certificate_id, ledger_event_id, received_at \
         FROM uploads WHERE id = $1",
    )
    .bind(certificate.upload_id)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| WorkError::Transient(e.to_string()))?
    .ok_or_else(|| WorkError::Deterministic {
        code: "UPLOAD_NOT_FOUND",
        message: format!("upload {} not found", certificate.upload_id),
    })?;

    let ledger_event = sqlx::query_as::<_, LedgerEventRow>(
        "SELECT id, tenant_id, tenant_sequence, event_timestamp, canonical_event_json, \
                event_hash, prev_hash \
         FROM ledger_events WHERE tenant_id = $1 AND event_hash = $2",
    )
    .bind(task.tenant_id)
    .bind(&certificate.ledger_hash)
    .fetch_optional(&state.db)
    .await
    .map_err(|e| WorkError::Transient(e.to_string()))?
    .ok_or_else(|| WorkError::Deterministic {
        code: "LEDGER_EVENT_NOT_FOUND",
        message: format!("no ledger event with hash {}", certificate.ledger_hash),
    })?;

    let document = generator::build_document(&certificate, &upload, &ledger_event);

    let mut storage_keys = serde_json::Map::new();
    let mut artifact_hashes = serde_json::Map::new();
    let mut artifact_sizes = serde_json::Map::new();

    for format in &task.formats {
        let (bytes, content_type) =
            generator::render(&document, format).map_err(|e| WorkError::Deterministic {
                code: "RENDER_FAILED",
                message: e.to_string(),
            })?;

        let key = artifact_key(task.tenant_id, &task.certificate_id, format);
        let hash = sha256_hex(&bytes);
        let size = bytes.len();

        state
            .blob
            .put(&key, bytes, content_type)
            .await
            .map_err(|e| WorkError::Transient(format!("blob put failed: {e}")))?;

        storage_keys.insert(format.clone(), json!(key));
        artifact_hashes.insert(format.clone(), json!(hash));
        artifact_sizes.insert(format.clone(), json!(size));
    }

    super::mark_ready(
        state,
        pack.id,
        &serde_json::Value::Object(storage_keys),
        &serde_json::Value::Object(artifact_hashes),
        &serde_json::Value::Object(artifact_sizes),
    )
    .await
    .map_err(|e| WorkError::Transient(e.to_string()))?;

    webhook_notify(state, task, "evidence_pack.ready").await;

    Ok(())
}

async fn set_status(state: &AppState, task_id: &str, status: TaskStatus, code: Option<&str>) {
    let record = TaskRecord {
        status,
        error_code: code.map(ToString::to_string),
    };
    if let Err(err) = state.broker.write_status(task_id, &record).await {
        tracing::warn!(task_id, error = %err, "task status write failed");
    }
}

async fn webhook_notify(state: &AppState, task: &EvidenceTask, event_type: &str) {
    crate::webhooks::enqueue_event(
        state,
        task.tenant_id,
        event_type,
        &json!({
            "certificate_id": task.certificate_id,
            "formats": task.formats,
            "correlation_id": task.correlation_id,
        }),
        &task.correlation_id,
    )
    .await;
}
