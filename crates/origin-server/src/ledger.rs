//! Hash-chained, per-tenant-sequenced audit ledger.
//!
//! Appends run inside the caller's transaction and serialize per tenant
//! through a row lock on `tenant_sequences`: lock the allocator row, read
//! the last event's hash, assign `prev_sequence + 1`, build the canonical
//! event JSON, hash it, insert. The canonical bytes are stored verbatim
//! and are the sole hash pre-image; recomputing SHA-256 over the stored
//! bytes must reproduce `event_hash` exactly, which is what
//! [`verify_chain`] does offline.

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use serde_json::{json, Value};
use sqlx::{PgConnection, PgPool};
use thiserror::Error;

use origin_core::canonical::{canonicalize, CanonicalError};
use origin_core::crypto::{sha256_hex, ZERO_HASH_HEX};

use crate::storage::models::LedgerEventRow;

/// Ledger failures.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database failure.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// The payload could not be canonically encoded.
    #[error("canonicalization error: {0}")]
    Canonical(#[from] CanonicalError),
}

/// Result of an offline chain verification.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ChainVerification {
    /// True when every check passed.
    pub ok: bool,

    /// First failure, if any.
    pub error: Option<String>,

    /// Number of events walked.
    pub events_checked: u64,
}

/// Appends an event to the tenant's chain inside `conn`'s transaction.
///
/// The observable sequence is gapless and strictly increasing; concurrent
/// appends for the same tenant queue behind the allocator row lock.
///
/// # Errors
///
/// Returns [`LedgerError`] on database or canonicalization failure. The
/// caller's transaction must then abort so no partial event is visible.
pub async fn append(
    conn: &mut PgConnection,
    tenant_id: i64,
    payload: &Value,
    now: DateTime<Utc>,
) -> Result<LedgerEventRow, LedgerError> {
    // The allocator row may not exist for a brand-new tenant.
    sqlx::query("INSERT INTO tenant_sequences (tenant_id, last_sequence) VALUES ($1, 0) ON CONFLICT (tenant_id) DO NOTHING")
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?;

    let last_sequence: i64 = sqlx::query_scalar(
        "SELECT last_sequence FROM tenant_sequences WHERE tenant_id = $1 FOR UPDATE",
    )
    .bind(tenant_id)
    .fetch_one(&mut *conn)
    .await?;
    let tenant_sequence = last_sequence + 1;

    let prev_hash: String = sqlx::query_scalar(
        "SELECT event_hash FROM ledger_events WHERE tenant_id = $1 ORDER BY tenant_sequence DESC LIMIT 1",
    )
    .bind(tenant_id)
    .fetch_optional(&mut *conn)
    .await?
    .unwrap_or_else(|| ZERO_HASH_HEX.to_string());

    // Microsecond precision, fixed form; the string in the canonical JSON
    // is authoritative, the column mirrors the same instant.
    let event_timestamp = now.trunc_subsecs(6);
    let canonical_event_json = build_canonical_event(
        tenant_id,
        tenant_sequence,
        event_timestamp,
        &prev_hash,
        payload,
    )?;
    let event_hash = sha256_hex(canonical_event_json.as_bytes());

    sqlx::query("UPDATE tenant_sequences SET last_sequence = $1 WHERE tenant_id = $2")
        .bind(tenant_sequence)
        .bind(tenant_id)
        .execute(&mut *conn)
        .await?;

    let event = sqlx::query_as::<_, LedgerEventRow>(
        "INSERT INTO ledger_events \
         (tenant_id, tenant_sequence, event_timestamp, canonical_event_json, event_hash, prev_hash) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING id, tenant_id, tenant_sequence, event_timestamp, canonical_event_json, event_hash, prev_hash",
    )
    .bind(tenant_id)
    .bind(tenant_sequence)
    .bind(event_timestamp)
    .bind(&canonical_event_json)
    .bind(&event_hash)
    .bind(&prev_hash)
    .fetch_one(&mut *conn)
    .await?;

    Ok(event)
}

/// Walks a tenant's chain and re-checks every invariant.
///
/// # Errors
///
/// Returns [`LedgerError::Database`] only for infrastructure failures;
/// integrity violations are reported in the returned value, never
/// swallowed.
pub async fn verify_chain(pool: &PgPool, tenant_id: i64) -> Result<ChainVerification, LedgerError> {
    let events = sqlx::query_as::<_, LedgerEventRow>(
        "SELECT id, tenant_id, tenant_sequence, event_timestamp, canonical_event_json, event_hash, prev_hash \
         FROM ledger_events WHERE tenant_id = $1 ORDER BY tenant_sequence ASC",
    )
    .bind(tenant_id)
    .fetch_all(pool)
    .await?;

    Ok(verify_events(events.iter().map(|e| {
        (
            e.tenant_sequence,
            e.canonical_event_json.as_str(),
            e.event_hash.as_str(),
            e.prev_hash.as_str(),
        )
    })))
}

/// Builds the canonical event encoding.
///
/// The object is exactly `{tenant_id, tenant_sequence, event_timestamp,
/// prev_hash, payload}` under canonical encoding (sorted keys, fixed
/// microsecond timestamp form).
///
/// # Errors
///
/// Returns [`CanonicalError`] if the payload violates encoding rules.
pub fn build_canonical_event(
    tenant_id: i64,
    tenant_sequence: i64,
    event_timestamp: DateTime<Utc>,
    prev_hash: &str,
    payload: &Value,
) -> Result<String, CanonicalError> {
    canonicalize(&json!({
        "tenant_id": tenant_id,
        "tenant_sequence": tenant_sequence,
        "event_timestamp": event_timestamp.to_rfc3339_opts(SecondsFormat::Micros, true),
        "prev_hash": prev_hash,
        "payload": payload,
    }))
}

/// Pure chain verification over `(sequence, canonical_json, event_hash,
/// prev_hash)` tuples in sequence order.
pub fn verify_events<'a, I>(events: I) -> ChainVerification
where
    I: Iterator<Item = (i64, &'a str, &'a str, &'a str)>,
{
    let mut expected_sequence: i64 = 1;
    let mut expected_prev = ZERO_HASH_HEX.to_string();
    let mut checked: u64 = 0;

    for (sequence, canonical_json, event_hash, prev_hash) in events {
        if sequence != expected_sequence {
            return ChainVerification {
                ok: false,
                error: Some(format!(
                    "sequence mismatch: expected {expected_sequence}, got {sequence}"
                )),
                events_checked: checked,
            };
        }

        if sha256_hex(canonical_json.as_bytes()) != event_hash {
            return ChainVerification {
                ok: false,
                error: Some(format!("hash_mismatch at sequence={sequence}")),
                events_checked: checked,
            };
        }

        if prev_hash != expected_prev {
            return ChainVerification {
                ok: false,
                error: Some(format!("prev_hash mismatch at sequence={sequence}")),
                events_checked: checked,
            };
        }

        expected_prev = event_hash.to_string();
        expected_sequence += 1;
        checked += 1;
    }

    ChainVerification {
        ok: true,
        error: None,
        events_checked: checked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_chain(len: i64) -> Vec<(i64, String, String, String)> {
        let mut out = Vec::new();
        let mut prev = ZERO_HASH_HEX.to_string();
        let ts = "2026-01-02T03:04:05.000000Z".parse::<DateTime<Utc>>().unwrap();
        for sequence in 1..=len {
            let canonical = build_canonical_event(
                1,
                sequence,
                ts,
                &prev,
                &json!({"upload_id": sequence, "decision": "ALLOW"}),
            )
            .unwrap();
            let hash = sha256_hex(canonical.as_bytes());
            out.push((sequence, canonical, hash.clone(), prev.clone()));
            prev = hash;
        }
        out
    }

    fn verify(chain: &[(i64, String, String, String)]) -> ChainVerification {
        verify_events(
            chain
                .iter()
                .map(|(s, c, h, p)| (*s, c.as_str(), h.as_str(), p.as_str())),
        )
    }

    #[test]
    fn test_canonical_event_shape() {
        let ts = "2026-01-02T03:04:05.123456Z".parse::<DateTime<Utc>>().unwrap();
        let canonical =
            build_canonical_event(7, 1, ts, ZERO_HASH_HEX, &json!({"k": "v"})).unwrap();
        assert_eq!(
            canonical,
            format!(
                "{{\"event_timestamp\":\"2026-01-02T03:04:05.123456Z\",\"payload\":{{\"k\":\"v\"}},\"prev_hash\":\"{ZERO_HASH_HEX}\",\"tenant_id\":7,\"tenant_sequence\":1}}"
            )
        );
    }

    #[test]
    fn test_valid_chain_verifies() {
        let chain = make_chain(5);
        let result = verify(&chain);
        assert!(result.ok, "{result:?}");
        assert_eq!(result.events_checked, 5);
    }

    #[test]
    fn test_empty_chain_is_valid() {
        let result = verify(&[]);
        assert!(result.ok);
        assert_eq!(result.events_checked, 0);
    }

    #[test]
    fn test_tampered_canonical_json_detected() {
        let mut chain = make_chain(3);
        chain[0].1 = chain[0].1.replace("ALLOW", "REJECT");
        let result = verify(&chain);
        assert!(!result.ok);
        assert_eq!(result.error.as_deref(), Some("hash_mismatch at sequence=1"));
    }

    #[test]
    fn test_sequence_gap_detected() {
        let mut chain = make_chain(3);
        chain.remove(1);
        let result = verify(&chain);
        assert!(!result.ok);
        assert_eq!(
            result.error.as_deref(),
            Some("sequence mismatch: expected 2, got 3")
        );
    }

    #[test]
    fn test_broken_link_detected() {
        let mut chain = make_chain(3);
        // Rebuild event 2 with a forged prev_hash; its own hash is
        // consistent, the link is not.
        let ts = "2026-01-02T03:04:05.000000Z".parse::<DateTime<Utc>>().unwrap();
        let forged_prev = "ab".repeat(32);
        let canonical =
            build_canonical_event(1, 2, ts, &forged_prev, &json!({"upload_id": 2})).unwrap();
        let hash = sha256_hex(canonical.as_bytes());
        chain[1] = (2, canonical, hash, forged_prev);

        let result = verify(&chain);
        assert!(!result.ok);
        assert_eq!(
            result.error.as_deref(),
            Some("prev_hash mismatch at sequence=2")
        );
    }

    #[test]
    fn test_first_event_must_link_to_zero_sentinel() {
        let mut chain = make_chain(1);
        let ts = "2026-01-02T03:04:05.000000Z".parse::<DateTime<Utc>>().unwrap();
        let bad_prev = "11".repeat(32);
        let canonical =
            build_canonical_event(1, 1, ts, &bad_prev, &json!({"upload_id": 1})).unwrap();
        let hash = sha256_hex(canonical.as_bytes());
        chain[0] = (1, canonical, hash, bad_prev);

        let result = verify(&chain);
        assert!(!result.ok);
        assert_eq!(
            result.error.as_deref(),
            Some("prev_hash mismatch at sequence=1")
        );
    }
}
