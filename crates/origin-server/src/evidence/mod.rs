//! Evidence pack pipeline: enqueue, poll, download.
//!
//! Packs move `pending → {ready, failed}` and never backwards. Broker
//! connectivity failures leave the row `pending` with
//! `error_code="BROKER_UNAVAILABLE"` and surface as 503 + `Retry-After`;
//! only deterministic rendering failures reach `failed`, and a failed pack
//! re-attempts only through an explicit requeue under a suffixed task id.
//! The deprecated `task_state` response field always mirrors
//! `task_status`; the pipeline event is a separate signal of what the
//! handler observed.

pub mod generator;
pub mod worker;

use std::collections::BTreeMap;

use axum::http::StatusCode;
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use origin_core::task::{evidence_task_id, retry_task_id, PipelineEvent, TaskStatus};

use crate::blob::artifact_key;
use crate::broker::{BrokerError, EvidenceTask, TaskRecord};
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::models::{CertificateRow, EvidencePackRow};

/// Seconds clients should wait between polls.
const RETRY_AFTER_SECS: u64 = 30;

/// Evidence pack API response.
#[derive(Debug, Clone, Serialize)]
pub struct EvidencePackResponse {
    /// Row state: pending, ready, failed.
    pub status: String,

    /// Certificate the pack documents.
    pub certificate_id: String,

    /// Formats requested, sorted.
    pub formats: Vec<String>,

    /// Broker task id.
    pub task_id: Option<String>,

    /// Task-framework state, when known.
    pub task_status: Option<String>,

    /// Deprecated mirror of `task_status`; always identical.
    pub task_state: Option<String>,

    /// What the handler observed about the pipeline.
    pub pipeline_event: Option<String>,

    /// Presigned download URLs per format, once ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_urls: Option<BTreeMap<String, String>>,

    /// SHA-256 per format, once ready.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_hashes: Option<Value>,

    /// Where to poll.
    pub poll_url: String,

    /// Seconds to wait before the next poll, while pending.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_seconds: Option<u64>,

    /// Error code for failed or broker-degraded packs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,

    /// Human-readable failure detail.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl EvidencePackResponse {
    fn new(certificate_id: &str, status: &str, formats: Vec<String>) -> Self {
        Self {
            status: status.to_string(),
            certificate_id: certificate_id.to_string(),
            formats,
            task_id: None,
            task_status: None,
            task_state: None,
            pipeline_event: None,
            signed_urls: None,
            artifact_hashes: None,
            poll_url: format!("/v1/evidence-packs/{certificate_id}"),
            retry_after_seconds: None,
            error_code: None,
            error_message: None,
        }
    }

    /// Sets `task_status` and its deprecated mirror together; they can
    /// never diverge.
    fn with_task_status(mut self, status: Option<TaskStatus>) -> Self {
        let wire = status.map(|s| s.as_str().to_string());
        self.task_status.clone_from(&wire);
        self.task_state = wire;
        self
    }

    fn with_pipeline_event(mut self, event: PipelineEvent) -> Self {
        self.pipeline_event = Some(event.as_str().to_string());
        self
    }
}

/// Handles `POST /v1/evidence-packs`.
///
/// # Errors
///
/// Returns [`ApiError`] per the taxonomy; broker unavailability is 503
/// with the row left pending.
pub async fn request_pack(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
    formats_raw: &str,
    correlation_id: &str,
) -> Result<(StatusCode, EvidencePackResponse), ApiError> {
    let formats = parse_formats(formats_raw)?;
    let certificate = find_certificate(state, tenant_id, certificate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("certificate {certificate_id} not found")))?;

    let existing = find_pack(state, tenant_id, certificate_id).await?;

    // Already generated with every requested format: answer immediately.
    if let Some(row) = &existing {
        if row.status == "ready" && formats_covered(row, &formats) {
            let response = ready_response(state, row).await?;
            return Ok((StatusCode::OK, response));
        }
    }

    // Union with previously requested formats so a re-POST extends the
    // pack rather than shrinking it.
    let formats = match &existing {
        Some(row) => merge_formats(row, &formats),
        None => formats,
    };

    let base_task_id = evidence_task_id(tenant_id, certificate_id, &formats);
    let now = Utc::now();

    let (task_id, pipeline_event) = match &existing {
        // Terminal failure re-attempts only under a fresh suffixed id.
        Some(row) if row.status == "failed" => {
            (retry_task_id(&base_task_id, now.timestamp()), PipelineEvent::Enqueued)
        }
        // A pending row past the stuck age gets requeued under a new id.
        Some(row)
            if row.status == "pending"
                && now - row.updated_at
                    > chrono::Duration::from_std(state.config.evidence_stuck_after)
                        .unwrap_or_else(|_| chrono::Duration::zero()) =>
        {
            (retry_task_id(&base_task_id, now.timestamp()), PipelineEvent::StuckRequeued)
        }
        _ => (base_task_id, PipelineEvent::Enqueued),
    };

    // If the task is already running, refresh the row but do not enqueue
    // a duplicate.
    match state.broker.status(&task_id).await {
        Ok(Some(record))
            if matches!(record.status, TaskStatus::Started | TaskStatus::Retry) =>
        {
            let row =
                upsert_pack(state, tenant_id, certificate_id, &formats, &task_id, record.status)
                    .await?;
            let response = pending_response(&row, Some(record.status), pipeline_event);
            return Ok((StatusCode::ACCEPTED, response));
        }
        Ok(_) => {}
        Err(err) => {
            return Err(broker_down(state, tenant_id, certificate_id, &formats, err).await);
        }
    }

    let row = upsert_pack(
        state,
        tenant_id,
        certificate_id,
        &formats,
        &task_id,
        TaskStatus::Pending,
    )
    .await?;

    let task = EvidenceTask {
        task_id: task_id.clone(),
        tenant_id,
        certificate_id: certificate.certificate_id.clone(),
        formats: formats.clone(),
        correlation_id: correlation_id.to_string(),
        attempt: 1,
    };
    if let Err(err) = state.broker.enqueue(&task).await {
        return Err(broker_down(state, tenant_id, certificate_id, &formats, err).await);
    }

    tracing::info!(
        tenant_id,
        certificate_id,
        task_id = %task_id,
        formats = ?formats,
        "evidence pack enqueued"
    );

    let response = pending_response(&row, Some(TaskStatus::Pending), pipeline_event);
    Ok((StatusCode::ACCEPTED, response))
}

/// Handles `GET /v1/evidence-packs/{certificate_id}`.
///
/// # Errors
///
/// Returns 404 for unknown certificates or packs, 503 when the broker
/// cannot be consulted for a pending row.
pub async fn poll_pack(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
) -> Result<(StatusCode, EvidencePackResponse), ApiError> {
    find_certificate(state, tenant_id, certificate_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("certificate {certificate_id} not found")))?;

    let row = find_pack(state, tenant_id, certificate_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no evidence pack requested for {certificate_id}"))
        })?;

    match row.status.as_str() {
        "ready" => {
            let response = ready_response(state, &row).await?;
            Ok((StatusCode::OK, response))
        }
        "failed" => Ok((StatusCode::OK, failed_response(&row, None))),
        _ => poll_pending(state, row).await,
    }
}

async fn poll_pending(
    state: &AppState,
    row: EvidencePackRow,
) -> Result<(StatusCode, EvidencePackResponse), ApiError> {
    let task_id = row.task_id.clone().unwrap_or_default();

    let record = state
        .broker
        .status(&task_id)
        .await
        .map_err(|_| ApiError::broker_unavailable())?;

    match record {
        Some(TaskRecord {
            status: TaskStatus::Success,
            ..
        }) => {
            // The worker finished; serve the row it wrote.
            let refreshed = find_pack(state, row.tenant_id, &row.certificate_id)
                .await?
                .unwrap_or(row);
            if refreshed.status == "ready" {
                let mut response = ready_response(state, &refreshed).await?;
                response =
                    response.with_pipeline_event(PipelineEvent::UpdatedFromTaskResult);
                Ok((StatusCode::OK, response))
            } else {
                Ok((
                    StatusCode::ACCEPTED,
                    pending_response(&refreshed, Some(TaskStatus::Success), PipelineEvent::Polling),
                ))
            }
        }
        Some(TaskRecord {
            status: TaskStatus::Failure,
            error_code,
        }) => {
            let code = error_code.unwrap_or_else(|| "GENERATION_FAILED".to_string());
            mark_failed(state, row.id, &code, "task reported deterministic failure").await?;
            let refreshed = find_pack(state, row.tenant_id, &row.certificate_id)
                .await?
                .unwrap_or(row);
            Ok((
                StatusCode::OK,
                failed_response(&refreshed, Some(PipelineEvent::UpdatedFromTaskResult)),
            ))
        }
        other => {
            let now = Utc::now();
            let stuck_after =
                chrono::Duration::from_std(state.config.evidence_stuck_after).unwrap_or_else(|_| chrono::Duration::zero());
            let observed = other.map(|r| r.status);

            if now - row.updated_at > stuck_after
                && !matches!(observed, Some(TaskStatus::Retry))
            {
                let new_task_id = retry_task_id(
                    &evidence_task_id(row.tenant_id, &row.certificate_id, &formats_of(&row)),
                    now.timestamp(),
                );
                let task = EvidenceTask {
                    task_id: new_task_id.clone(),
                    tenant_id: row.tenant_id,
                    certificate_id: row.certificate_id.clone(),
                    formats: formats_of(&row),
                    correlation_id: String::new(),
                    attempt: 1,
                };
                state
                    .broker
                    .enqueue(&task)
                    .await
                    .map_err(|_| ApiError::broker_unavailable())?;

                sqlx::query(
                    "UPDATE evidence_packs SET task_id = $1, task_status = 'PENDING', \
                     pipeline_event = 'STUCK_REQUEUED', updated_at = $2 WHERE id = $3",
                )
                .bind(&new_task_id)
                .bind(now)
                .bind(row.id)
                .execute(&state.db)
                .await?;

                tracing::warn!(
                    pack_id = row.id,
                    task_id = %new_task_id,
                    "stuck evidence task requeued"
                );

                let mut refreshed = row;
                refreshed.task_id = Some(new_task_id);
                Ok((
                    StatusCode::ACCEPTED,
                    pending_response(
                        &refreshed,
                        Some(TaskStatus::Pending),
                        PipelineEvent::StuckRequeued,
                    ),
                ))
            } else {
                Ok((
                    StatusCode::ACCEPTED,
                    pending_response(&row, observed.or(Some(TaskStatus::Pending)), PipelineEvent::Polling),
                ))
            }
        }
    }
}

/// Handles `GET /v1/evidence-packs/{certificate_id}/download/{format}`.
///
/// # Errors
///
/// Returns 404 when the pack or format is not available.
pub async fn download(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
    format: &str,
) -> Result<DownloadOutcome, ApiError> {
    let row = find_pack(state, tenant_id, certificate_id)
        .await?
        .ok_or_else(|| {
            ApiError::NotFound(format!("no evidence pack requested for {certificate_id}"))
        })?;

    if row.status != "ready" {
        return Err(ApiError::NotFound(format!(
            "evidence pack for {certificate_id} is not ready"
        )));
    }

    let key = storage_key_of(&row, format).ok_or_else(|| {
        ApiError::NotFound(format!("format {format} not part of this evidence pack"))
    })?;

    if state.blob.is_local() {
        let bytes = state
            .blob
            .get(&key)
            .await
            .map_err(|e| ApiError::Internal(e.to_string()))?;
        let content_type = match format {
            "json" => "application/json",
            "html" => "text/html; charset=utf-8",
            "pdf" => "application/pdf",
            _ => "application/octet-stream",
        };
        Ok(DownloadOutcome::Stream {
            bytes,
            content_type,
        })
    } else {
        let url = state
            .blob
            .presign(&key, state.config.evidence_signed_url_ttl)
            .await
            .map_err(|e| ApiError::TransientInfra {
                code: "BLOB_UNAVAILABLE",
                message: e.to_string(),
                retry_after_secs: 10,
            })?;
        Ok(DownloadOutcome::Redirect { url })
    }
}

/// How the download endpoint serves an artifact.
pub enum DownloadOutcome {
    /// Stream the bytes directly (local backend).
    Stream {
        /// Artifact bytes.
        bytes: Vec<u8>,
        /// Content type for the response.
        content_type: &'static str,
    },
    /// Redirect to a presigned URL (S3 backend).
    Redirect {
        /// The presigned URL.
        url: String,
    },
}

// ---------------------------------------------------------------------------
// Row helpers shared with the worker
// ---------------------------------------------------------------------------

/// Parses and validates the comma-separated format list.
///
/// # Errors
///
/// Returns [`ApiError::Validation`] for empty or unknown formats.
pub fn parse_formats(raw: &str) -> Result<Vec<String>, ApiError> {
    let mut formats: Vec<String> = raw
        .split(',')
        .map(|f| f.trim().to_ascii_lowercase())
        .filter(|f| !f.is_empty())
        .collect();
    formats.sort();
    formats.dedup();

    if formats.is_empty() {
        return Err(ApiError::Validation("at least one format required".to_string()));
    }
    for format in &formats {
        if !generator::SUPPORTED_FORMATS.contains(&format.as_str()) {
            return Err(ApiError::Validation(format!(
                "unsupported format '{format}'; allowed: json, html, pdf"
            )));
        }
    }
    Ok(formats)
}

/// Finds a certificate by its public id within a tenant.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn find_certificate(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
) -> Result<Option<CertificateRow>, ApiError> {
    Ok(sqlx::query_as::<_, CertificateRow>(
        "SELECT id, certificate_id, tenant_id, upload_id, policy_version, inputs_hash, \
                outputs_hash, ledger_hash, key_id, alg, signature, signature_encoding, \
                signed_payload, issued_at \
         FROM certificates WHERE tenant_id = $1 AND certificate_id = $2",
    )
    .bind(tenant_id)
    .bind(certificate_id)
    .fetch_optional(&state.db)
    .await?)
}

/// Finds the pack row for a certificate.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn find_pack(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
) -> Result<Option<EvidencePackRow>, ApiError> {
    Ok(sqlx::query_as::<_, EvidencePackRow>(
        "SELECT id, tenant_id, certificate_id, status, formats_requested, storage_keys, \
                artifact_hashes, artifact_sizes, task_id, task_status, pipeline_event, \
                error_code, error_message, created_at, updated_at \
         FROM evidence_packs WHERE tenant_id = $1 AND certificate_id = $2",
    )
    .bind(tenant_id)
    .bind(certificate_id)
    .fetch_optional(&state.db)
    .await?)
}

async fn upsert_pack(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
    formats: &[String],
    task_id: &str,
    task_status: TaskStatus,
) -> Result<EvidencePackRow, ApiError> {
    Ok(sqlx::query_as::<_, EvidencePackRow>(
        "INSERT INTO evidence_packs \
         (tenant_id, certificate_id, status, formats_requested, task_id, task_status, pipeline_event) \
         VALUES ($1, $2, 'pending', $3, $4, $5, 'ENQUEUED') \
         ON CONFLICT (tenant_id, certificate_id) DO UPDATE SET \
             status = 'pending', formats_requested = EXCLUDED.formats_requested, \
             task_id = EXCLUDED.task_id, task_status = EXCLUDED.task_status, \
             pipeline_event = EXCLUDED.pipeline_event, error_code = NULL, \
             error_message = NULL, updated_at = now() \
         RETURNING id, tenant_id, certificate_id, status, formats_requested, storage_keys, \
                   artifact_hashes, artifact_sizes, task_id, task_status, pipeline_event, \
                   error_code, error_message, created_at, updated_at",
    )
    .bind(tenant_id)
    .bind(certificate_id)
    .bind(json!(formats))
    .bind(task_id)
    .bind(task_status.as_str())
    .fetch_one(&state.db)
    .await?)
}

/// Marks a pack ready with its artifact records. Used by the worker.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn mark_ready(
    state: &AppState,
    pack_id: i64,
    storage_keys: &Value,
    artifact_hashes: &Value,
    artifact_sizes: &Value,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE evidence_packs SET status = 'ready', storage_keys = $1, artifact_hashes = $2, \
         artifact_sizes = $3, task_status = 'SUCCESS', error_code = NULL, error_message = NULL, \
         updated_at = now() WHERE id = $4",
    )
    .bind(storage_keys)
    .bind(artifact_hashes)
    .bind(artifact_sizes)
    .bind(pack_id)
    .execute(&state.db)
    .await?;
    Ok(())
}

/// Marks a pack failed with a deterministic error. Used by the worker.
///
/// # Errors
///
/// Returns the underlying database error.
pub async fn mark_failed(
    state: &AppState,
    pack_id: i64,
    error_code: &str,
    error_message: &str,
) -> Result<(), ApiError> {
    sqlx::query(
        "UPDATE evidence_packs SET status = 'failed', task_status = 'FAILURE', error_code = $1, \
         error_message = $2, updated_at = now() WHERE id = $3",
    )
    .bind(error_code)
    .bind(error_message)
    .bind(pack_id)
    .execute(&state.db)
    .await?;
    Ok(())
}

async fn broker_down(
    state: &AppState,
    tenant_id: i64,
    certificate_id: &str,
    formats: &[String],
    err: BrokerError,
) -> ApiError {
    tracing::warn!(tenant_id, certificate_id, error = %err, "task broker unreachable");

    // The row stays pending so the request can simply be retried.
    let result = sqlx::query(
        "INSERT INTO evidence_packs \
         (tenant_id, certificate_id, status, formats_requested, error_code) \
         VALUES ($1, $2, 'pending', $3, 'BROKER_UNAVAILABLE') \
         ON CONFLICT (tenant_id, certificate_id) DO UPDATE SET \
             error_code = 'BROKER_UNAVAILABLE', updated_at = now()",
    )
    .bind(tenant_id)
    .bind(certificate_id)
    .bind(json!(formats))
    .execute(&state.db)
    .await;

    if let Err(db_err) = result {
        tracing::error!(error = %db_err, "failed to record broker outage on pack row");
    }

    ApiError::broker_unavailable()
}

async fn ready_response(
    state: &AppState,
    row: &EvidencePackRow,
) -> Result<EvidencePackResponse, ApiError> {
    let mut signed_urls = BTreeMap::new();
    if let Some(keys) = row.storage_keys.as_ref().and_then(Value::as_object) {
        for (format, key) in keys {
            if let Some(key) = key.as_str() {
                let url = state
                    .blob
                    .presign(key, state.config.evidence_signed_url_ttl)
                    .await
                    .map_err(|e| ApiError::TransientInfra {
                        code: "BLOB_UNAVAILABLE",
                        message: e.to_string(),
                        retry_after_secs: 10,
                    })?;
                signed_urls.insert(format.clone(), url);
            }
        }
    }

    Ok(EvidencePackResponse {
        signed_urls: Some(signed_urls),
        artifact_hashes: row.artifact_hashes.clone(),
        ..EvidencePackResponse::new(&row.certificate_id, "ready", formats_of(row))
            .with_task_status(row.task_status.as_deref().and_then(TaskStatus::parse))
    })
}

fn pending_response(
    row: &EvidencePackRow,
    task_status: Option<TaskStatus>,
    event: PipelineEvent,
) -> EvidencePackResponse {
    let mut response = EvidencePackResponse::new(&row.certificate_id, "pending", formats_of(row))
        .with_task_status(task_status)
        .with_pipeline_event(event);
    response.task_id.clone_from(&row.task_id);
    response.retry_after_seconds = Some(RETRY_AFTER_SECS);
    response.error_code.clone_from(&row.error_code);
    response
}

fn failed_response(row: &EvidencePackRow, event: Option<PipelineEvent>) -> EvidencePackResponse {
    let mut response = EvidencePackResponse::new(&row.certificate_id, "failed", formats_of(row))
        .with_task_status(Some(TaskStatus::Failure));
    response.task_id.clone_from(&row.task_id);
    response.error_code.clone_from(&row.error_code);
    response.error_message.clone_from(&row.error_message);
    if let Some(event) = event {
        response = response.with_pipeline_event(event);
    }
    response
}

fn formats_of(row: &EvidencePackRow) -> Vec<String> {
    row.formats_requested
        .as_array()
        .map_or_else(Vec::new, |formats| {
            formats
                .iter()
                .filter_map(|f| f.as_str().map(ToString::to_string))
                .collect()
        })
}

fn formats_covered(row: &EvidencePackRow, requested: &[String]) -> bool {
    let have = formats_of(row);
    requested.iter().all(|f| have.contains(f))
}

fn merge_formats(row: &EvidencePackRow, requested: &[String]) -> Vec<String> {
    let mut merged = formats_of(row);
    for format in requested {
        if !merged.contains(format) {
            merged.push(format.clone());
        }
    }
    merged.sort();
    merged
}

fn storage_key_of(row: &EvidencePackRow, format: &str) -> Option<String> {
    // Prefer the recorded key; fall back to the deterministic layout for
    // rows written before keys were recorded.
    row.storage_keys
        .as_ref()
        .and_then(|keys| keys.get(format))
        .and_then(Value::as_str)
        .map(ToString::to_string)
        .or_else(|| {
            formats_of(row)
                .contains(&format.to_string())
                .then(|| artifact_key(row.tenant_id, &row.certificate_id, format))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(status: &str, formats: &[&str]) -> EvidencePackRow {
        EvidencePackRow {
            id: 1,
            tenant_id: 1,
            certificate_id: "cert-1".to_string(),
            status: status.to_string(),
            formats_requested: json!(formats),
            storage_keys: None,
            artifact_hashes: None,
            artifact_sizes: None,
            task_id: Some("evidence_pack_abc".to_string()),
            task_status: Some("PENDING".to_string()),
            pipeline_event: Some("ENQUEUED".to_string()),
            error_code: None,
            error_message: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_parse_formats() {
        assert_eq!(parse_formats("json,pdf").unwrap(), vec!["json", "pdf"]);
        assert_eq!(parse_formats("pdf, json ").unwrap(), vec!["json", "pdf"]);
        assert_eq!(parse_formats("json,json").unwrap(), vec!["json"]);
        assert!(parse_formats("").is_err());
        assert!(parse_formats("docx").is_err());
    }

    #[test]
    fn test_task_state_always_mirrors_task_status() {
        let response = pending_response(
            &row("pending", &["json"]),
            Some(TaskStatus::Started),
            PipelineEvent::Polling,
        );
        assert_eq!(response.task_status, response.task_state);
        assert_eq!(response.task_status.as_deref(), Some("STARTED"));
        // Neither field ever carries the task id.
        assert_ne!(response.task_status, response.task_id);
    }

    #[test]
    fn test_formats_merge_and_cover() {
        let existing = row("ready", &["json"]);
        assert!(formats_covered(&existing, &["json".to_string()]));
        assert!(!formats_covered(&existing, &["json".to_string(), "pdf".to_string()]));
        assert_eq!(
            merge_formats(&existing, &["pdf".to_string()]),
            vec!["json", "pdf"]
        );
    }

    #[test]
    fn test_failed_response_shape() {
        let mut failed_row = row("failed", &["json"]);
        failed_row.error_code = Some("RENDER_FAILED".to_string());
        let response = failed_response(&failed_row, None);
        assert_eq!(response.status, "failed");
        assert_eq!(response.task_status.as_deref(), Some("FAILURE"));
        assert_eq!(response.task_state.as_deref(), Some("FAILURE"));
        assert_eq!(response.error_code.as_deref(), Some("RENDER_FAILED"));
    }

    #[test]
    fn test_storage_key_fallback() {
        let ready = row("ready", &["json", "pdf"]);
        assert_eq!(
            storage_key_of(&ready, "json").as_deref(),
            Some("1/cert-1/json")
        );
        assert_eq!(storage_key_of(&ready, "html"), None);
    }
}
