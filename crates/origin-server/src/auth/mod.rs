//! Authentication and the request-guard middleware stack.
//!
//! Order on protected routes is fixed: authentication resolves the API key
//! and tenant, scope enforcement compares the key's scopes to the route's
//! requirement, the rate limiter draws a token from the tenant's bucket,
//! and the IP allowlist checks the client address. Public routes
//! (`/health`, `/ready`, `/metrics`) are mounted outside the stack.
//!
//! # Key lookup
//!
//! Lookup is O(1) in the number of keys: the indexed 8-character prefix
//! narrows to candidates (normally one), then the HMAC-SHA256 digest of
//! the presented key is compared in constant time. `last_used_at` is
//! updated off the request path. A bcrypt fallback for keys predating the
//! digest scheme exists behind `LEGACY_APIKEY_FALLBACK`.

pub mod ip;
pub mod rate_limit;
pub mod scopes;

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use chrono::Utc;
use secrecy::ExposeSecret as _;
use serde_json::Value;

use origin_core::apikey;

use crate::correlation::CorrelationId;
use crate::error::ApiError;
use crate::state::AppState;
use crate::storage::models::{ApiKeyRow, Tenant};

pub use scopes::Scope;

/// The authenticated identity attached to request extensions.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// Authenticated tenant id.
    pub tenant_id: i64,

    /// Tenant display name, for logging.
    pub tenant_name: String,

    /// Scopes granted to the presented key.
    pub scopes: Vec<Scope>,

    /// Tenant's token-bucket capacity per minute.
    pub rate_limit_per_minute: i64,

    /// Tenant's IP allowlist, verbatim from the row.
    pub ip_allowlist: Option<Value>,

    /// Tenant's active policy profile reference.
    pub policy_profile_id: Option<i64>,

    /// Correlation id of this request.
    pub correlation_id: String,
}

/// Authentication middleware.
pub async fn middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let correlation_id = request
        .extensions()
        .get::<CorrelationId>()
        .map_or_else(String::new, |c| c.0.clone());

    let raw_key = request
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(ToString::to_string);

    let Some(raw_key) = raw_key else {
        return ApiError::Auth("missing API key; provide the x-api-key header".to_string())
            .with_correlation(correlation_id)
            .into_response();
    };

    let resolved = match resolve_key(&state, &raw_key).await {
        Ok(resolved) => resolved,
        Err(err) => return err.with_correlation(correlation_id).into_response(),
    };
    let Some((key_row, tenant)) = resolved else {
        return ApiError::Auth("invalid or revoked API key".to_string())
            .with_correlation(correlation_id)
            .into_response();
    };

    if tenant.status != "active" {
        return ApiError::Forbidden {
            code: "tenant_inactive",
            message: format!("tenant status is {}", tenant.status),
        }
        .with_correlation(correlation_id)
        .into_response();
    }

    // Off the request path; a lost update here is harmless telemetry.
    let pool = state.db.clone();
    let key_id = key_row.id;
    tokio::spawn(async move {
        let result = sqlx::query("UPDATE api_keys SET last_used_at = $1 WHERE id = $2")
            .bind(Utc::now())
            .bind(key_id)
            .execute(&pool)
            .await;
        if let Err(err) = result {
            tracing::debug!(error = %err, "last_used_at update failed");
        }
    });

    let scopes = parse_scopes(&key_row.scopes);
    request.extensions_mut().insert(AuthContext {
        tenant_id: tenant.id,
        tenant_name: tenant.name,
        scopes,
        rate_limit_per_minute: tenant.rate_limit_per_minute,
        ip_allowlist: tenant.ip_allowlist,
        policy_profile_id: tenant.policy_profile_id,
        correlation_id,
    });

    next.run(request).await
}

async fn resolve_key(
    state: &AppState,
    raw_key: &str,
) -> Result<Option<(ApiKeyRow, Tenant)>, ApiError> {
    if raw_key.len() < apikey::PREFIX_LEN {
        return Ok(None);
    }

    let prefix = apikey::key_prefix(raw_key);
    let digest = apikey::key_digest(state.config.server_secret.expose_secret(), raw_key);

    let candidates = sqlx::query_as::<_, ApiKeyRow>(
        "SELECT id, tenant_id, prefix, digest, legacy_bcrypt_hash, scopes, created_at, \
                last_used_at, revoked_at \
         FROM api_keys WHERE prefix = $1 AND revoked_at IS NULL",
    )
    .bind(prefix)
    .fetch_all(&state.db)
    .await?;

    for candidate in candidates {
        let matched = match &candidate.digest {
            Some(stored) => apikey::digest_matches(&digest, stored),
            None => false,
        };
        if matched {
            let tenant = load_tenant(state, candidate.tenant_id).await?;
            return Ok(tenant.map(|t| (candidate, t)));
        }
    }

    // Legacy path: full scan over bcrypt rows, gated by configuration.
    if state.config.legacy_apikey_fallback {
        let legacy = sqlx::query_as::<_, ApiKeyRow>(
            "SELECT id, tenant_id, prefix, digest, legacy_bcrypt_hash, scopes, created_at, \
                    last_used_at, revoked_at \
             FROM api_keys WHERE legacy_bcrypt_hash IS NOT NULL AND revoked_at IS NULL",
        )
        .fetch_all(&state.db)
        .await?;

        for candidate in legacy {
            let Some(hash) = &candidate.legacy_bcrypt_hash else {
                continue;
            };
            if bcrypt::verify(raw_key, hash).unwrap_or(false) {
                let tenant = load_tenant(state, candidate.tenant_id).await?;
                return Ok(tenant.map(|t| (candidate, t)));
            }
        }
    }

    Ok(None)
}

async fn load_tenant(state: &AppState, tenant_id: i64) -> Result<Option<Tenant>, ApiError> {
    Ok(sqlx::query_as::<_, Tenant>(
        "SELECT id, name, status, ip_allowlist, rate_limit_per_minute, policy_profile_id, created_at \
         FROM tenants WHERE id = $1",
    )
    .bind(tenant_id)
    .fetch_optional(&state.db)
    .await?)
}

fn parse_scopes(raw: &Value) -> Vec<Scope> {
    raw.as_array().map_or_else(Vec::new, |entries| {
        entries
            .iter()
            .filter_map(|v| v.as_str().and_then(Scope::parse))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn test_parse_scopes() {
        let raw = json!(["ingest:write", "evidence:read", "bogus"]);
        let scopes = parse_scopes(&raw);
        assert_eq!(scopes, vec![Scope::IngestWrite, Scope::EvidenceRead]);

        assert!(parse_scopes(&json!("not-an-array")).is_empty());
    }
}
