//! Identity resolution and provenance ids.
//!
//! Accounts are upserted by `(tenant_id, external_id)`. The provenance id
//! (PVID) is derived deterministically from submission attributes —
//! content reference, sorted fingerprints, and canonicalized metadata — so
//! re-submissions of the same content resolve to the same id regardless of
//! field order.

use serde_json::{Map, Value};
use sqlx::PgConnection;

use origin_core::crypto::sha256_hex;

use crate::storage::models::Account;

/// Derives the PVID for a submission.
///
/// Components, in order: `content_ref:{ref}` when present, one
/// `fingerprint:{key}:{value}` per non-empty fingerprint in key order, and
/// `metadata:{canonicalized}` when metadata is non-empty; joined with `|`
/// and hashed. The id is `PVID-` plus the first 16 hex characters of the
/// SHA-256, uppercased.
#[must_use]
pub fn derive_pvid(
    content_ref: Option<&str>,
    fingerprints: Option<&Map<String, Value>>,
    metadata: Option<&Map<String, Value>>,
) -> String {
    let mut components: Vec<String> = Vec::new();

    if let Some(content_ref) = content_ref {
        components.push(format!("content_ref:{content_ref}"));
    }

    if let Some(fingerprints) = fingerprints {
        let mut keys: Vec<&String> = fingerprints.keys().collect();
        keys.sort();
        for key in keys {
            let value = &fingerprints[key];
            if !value.is_null() {
                components.push(format!("fingerprint:{key}:{}", scalar_form(value)));
            }
        }
    }

    if let Some(metadata) = metadata {
        if !metadata.is_empty() {
            components.push(format!("metadata:{}", canonicalize_metadata(metadata)));
        }
    }

    let combined = components.join("|");
    let digest = sha256_hex(combined.as_bytes());
    format!("PVID-{}", digest[..16].to_uppercase())
}

/// Canonicalizes a metadata object for hashing: keys sorted, nested values
/// JSON-encoded with sorted keys, scalars lowercased and trimmed.
fn canonicalize_metadata(metadata: &Map<String, Value>) -> String {
    let mut keys: Vec<&String> = metadata.keys().collect();
    keys.sort();

    let mut canonical = Map::new();
    for key in keys {
        let value = &metadata[key];
        let normalized = match value {
            Value::Object(_) | Value::Array(_) => {
                origin_core::canonical::canonicalize(value).unwrap_or_default()
            }
            other => scalar_form(other).to_lowercase().trim().to_string(),
        };
        canonical.insert(key.clone(), Value::String(normalized));
    }

    origin_core::canonical::canonicalize(&Value::Object(canonical)).unwrap_or_default()
}

fn scalar_form(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Finds or creates the account for a submission.
///
/// # Errors
///
/// Returns the underlying sqlx error on failure.
pub async fn upsert_account(
    conn: &mut PgConnection,
    tenant_id: i64,
    external_id: &str,
    account_type: &str,
    display_name: Option<&str>,
) -> Result<Account, sqlx::Error> {
    // ON CONFLICT DO UPDATE with an idempotent assignment so RETURNING
    // yields the row in both the insert and the conflict case.
    sqlx::query_as::<_, Account>(
        "INSERT INTO accounts (tenant_id, external_id, account_type, display_name) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (tenant_id, external_id) DO UPDATE SET external_id = EXCLUDED.external_id \
         RETURNING id, tenant_id, external_id, account_type, display_name, created_at",
    )
    .bind(tenant_id)
    .bind(external_id)
    .bind(account_type)
    .bind(display_name)
    .fetch_one(conn)
    .await
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn obj(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_pvid_shape() {
        let pvid = derive_pvid(Some("https://cdn.example/u1"), None, None);
        assert!(pvid.starts_with("PVID-"));
        assert_eq!(pvid.len(), 5 + 16);
        assert!(pvid[5..].chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit()));
    }

    #[test]
    fn test_pvid_deterministic_across_field_order() {
        let a = derive_pvid(
            Some("ref-1"),
            Some(&obj(json!({"audio_hash": "aa", "perceptual_hash": "bb"}))),
            Some(&obj(json!({"title": "My Track", "genre": "jazz"}))),
        );
        let b = derive_pvid(
            Some("ref-1"),
            Some(&obj(json!({"perceptual_hash": "bb", "audio_hash": "aa"}))),
            Some(&obj(json!({"genre": "jazz", "title": "My Track"}))),
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_pvid_varies_by_content() {
        let base = derive_pvid(Some("ref-1"), None, None);
        assert_ne!(base, derive_pvid(Some("ref-2"), None, None));
        assert_ne!(
            base,
            derive_pvid(Some("ref-1"), Some(&obj(json!({"h": "x"}))), None)
        );
    }

    #[test]
    fn test_metadata_case_and_whitespace_insensitive() {
        let a = derive_pvid(None, None, Some(&obj(json!({"title": "  My Track "}))));
        let b = derive_pvid(None, None, Some(&obj(json!({"title": "my track"}))));
        assert_eq!(a, b);
    }

    #[test]
    fn test_null_fingerprints_skipped() {
        let a = derive_pvid(None, Some(&obj(json!({"audio_hash": "aa", "other": null}))), None);
        let b = derive_pvid(None, Some(&obj(json!({"audio_hash": "aa"}))), None);
        assert_eq!(a, b);
    }
}
