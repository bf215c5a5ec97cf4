//! Row models for the ORIGIN schema.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::FromRow;

/// A tenant of the platform.
#[derive(Debug, Clone, FromRow)]
pub struct Tenant {
    pub id: i64,
    pub name: String,
    pub status: String,
    /// JSON array of CIDR or exact-IP strings; `NULL` means unrestricted.
    pub ip_allowlist: Option<Value>,
    pub rate_limit_per_minute: i64,
    pub policy_profile_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// Versioned policy rule set.
#[derive(Debug, Clone, FromRow)]
pub struct PolicyProfile {
    pub id: i64,
    pub tenant_id: Option<i64>,
    pub name: String,
    pub version: String,
    pub thresholds_json: Value,
    pub risk_model_version: String,
    pub anomaly_model_version: String,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// Stored API-key credential. The raw key is never persisted.
#[derive(Debug, Clone, FromRow)]
pub struct ApiKeyRow {
    pub id: i64,
    pub tenant_id: i64,
    pub prefix: String,
    pub digest: Option<String>,
    pub legacy_bcrypt_hash: Option<String>,
    /// JSON array of scope strings.
    pub scopes: Value,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Stable account identity within a tenant.
#[derive(Debug, Clone, FromRow)]
pub struct Account {
    pub id: i64,
    pub tenant_id: i64,
    pub external_id: String,
    pub account_type: String,
    pub display_name: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One submitted upload. Immutable after creation except terminal-state
/// fields (decision, certificate and ledger linkage).
#[derive(Debug, Clone, FromRow)]
pub struct Upload {
    pub id: i64,
    pub tenant_id: i64,
    pub external_id: String,
    pub account_id: i64,
    pub device_hash: Option<String>,
    pub pvid: String,
    pub decision: Option<String>,
    pub metadata_json: Option<Value>,
    pub decision_inputs_json: Option<Value>,
    pub certificate_id: Option<i64>,
    pub ledger_event_id: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// Hash-chained audit event.
#[derive(Debug, Clone, FromRow)]
pub struct LedgerEventRow {
    pub id: i64,
    pub tenant_id: i64,
    pub tenant_sequence: i64,
    pub event_timestamp: DateTime<Utc>,
    /// Stored verbatim; the sole hash pre-image.
    pub canonical_event_json: String,
    pub event_hash: String,
    pub prev_hash: String,
}

/// Signed decision certificate.
#[derive(Debug, Clone, FromRow)]
pub struct CertificateRow {
    pub id: i64,
    pub certificate_id: String,
    pub tenant_id: i64,
    pub upload_id: i64,
    pub policy_version: String,
    pub inputs_hash: String,
    pub outputs_hash: String,
    pub ledger_hash: String,
    pub key_id: String,
    pub alg: String,
    pub signature: String,
    pub signature_encoding: String,
    /// Canonical payload the signature covers, stored for verification.
    pub signed_payload: String,
    pub issued_at: DateTime<Utc>,
}

/// Stored response for an idempotent request.
#[derive(Debug, Clone, FromRow)]
pub struct IdempotencyRecord {
    pub id: i64,
    pub tenant_id: i64,
    pub idempotency_key: String,
    pub request_hash: String,
    pub response_body: Vec<u8>,
    pub created_at: DateTime<Utc>,
}

/// Evidence pack row; mutated only by workers and the requeue paths.
#[derive(Debug, Clone, FromRow)]
pub struct EvidencePackRow {
    pub id: i64,
    pub tenant_id: i64,
    pub certificate_id: String,
    pub status: String,
    pub formats_requested: Value,
    pub storage_keys: Option<Value>,
    pub artifact_hashes: Option<Value>,
    pub artifact_sizes: Option<Value>,
    pub task_id: Option<String>,
    pub task_status: Option<String>,
    pub pipeline_event: Option<String>,
    pub error_code: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Registered webhook endpoint.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookRow {
    pub id: i64,
    pub tenant_id: i64,
    pub url: String,
    /// JSON array of subscribed event types.
    pub events: Value,
    /// [`origin_core::crypto::EncryptedSecret`] as JSON.
    pub encrypted_secret: Value,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

/// One delivery attempt.
#[derive(Debug, Clone, FromRow)]
pub struct WebhookDeliveryRow {
    pub id: i64,
    pub webhook_id: i64,
    pub event_id: String,
    pub event_type: String,
    pub payload: Vec<u8>,
    pub attempt: i32,
    pub status: String,
    pub response_code: Option<i32>,
    pub correlation_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}
