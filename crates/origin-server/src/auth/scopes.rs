//! API-key scopes and per-route enforcement.
//!
//! The scope table is declarative: [`required_scope`] maps a method and
//! path to the scope the route demands, and the middleware compares it
//! against the authenticated key's scope set. Public routes never reach
//! this middleware. A missing scope is 403 `scope_denied`.

use axum::extract::Request;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use serde::{Deserialize, Serialize};

use crate::error::ApiError;

use super::AuthContext;

/// The closed set of API-key scopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Scope {
    /// Submit uploads for decisions.
    #[serde(rename = "ingest:write")]
    IngestWrite,

    /// Request evidence pack generation.
    #[serde(rename = "evidence:write")]
    EvidenceWrite,

    /// Poll and download evidence packs.
    #[serde(rename = "evidence:read")]
    EvidenceRead,

    /// Register webhooks and send test events.
    #[serde(rename = "webhooks:write")]
    WebhooksWrite,

    /// Inspect webhook deliveries.
    #[serde(rename = "webhooks:read")]
    WebhooksRead,

    /// Read certificates and the JWKS.
    #[serde(rename = "certificates:read")]
    CertificatesRead,

    /// Administrative operations.
    #[serde(rename = "admin")]
    Admin,
}

impl Scope {
    /// Wire form of the scope.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IngestWrite => "ingest:write",
            Self::EvidenceWrite => "evidence:write",
            Self::EvidenceRead => "evidence:read",
            Self::WebhooksWrite => "webhooks:write",
            Self::WebhooksRead => "webhooks:read",
            Self::CertificatesRead => "certificates:read",
            Self::Admin => "admin",
        }
    }

    /// Parses the wire form.
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "ingest:write" => Some(Self::IngestWrite),
            "evidence:write" => Some(Self::EvidenceWrite),
            "evidence:read" => Some(Self::EvidenceRead),
            "webhooks:write" => Some(Self::WebhooksWrite),
            "webhooks:read" => Some(Self::WebhooksRead),
            "certificates:read" => Some(Self::CertificatesRead),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// The normative route → scope table.
///
/// `None` means the route needs authentication but no particular scope
/// (the model status endpoint).
#[must_use]
pub fn required_scope(method: &Method, path: &str) -> Option<Scope> {
    if path.starts_with("/admin/") || path == "/admin" {
        return Some(Scope::Admin);
    }

    match (method, path) {
        (&Method::POST, "/v1/ingest") => Some(Scope::IngestWrite),
        (&Method::POST, "/v1/evidence-packs") => Some(Scope::EvidenceWrite),
        (&Method::GET, p) if p.starts_with("/v1/evidence-packs/") => Some(Scope::EvidenceRead),
        (&Method::GET, p) if p.starts_with("/v1/certificates/") => Some(Scope::CertificatesRead),
        (&Method::GET, p) if p.starts_with("/v1/keys/") => Some(Scope::CertificatesRead),
        (&Method::POST, "/v1/webhooks" | "/v1/webhooks/test") => Some(Scope::WebhooksWrite),
        (&Method::GET, p) if p.starts_with("/v1/webhooks/") => Some(Scope::WebhooksRead),
        _ => None,
    }
}

/// Scope-enforcement middleware; runs after authentication.
pub async fn middleware(request: Request, next: Next) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>() else {
        // Authentication middleware did not run; refuse rather than guess.
        return ApiError::Auth("missing authentication context".to_string()).into_response();
    };

    if let Some(required) = required_scope(request.method(), request.uri().path()) {
        if !auth.scopes.contains(&required) {
            let correlation_id = auth.correlation_id.clone();
            return ApiError::Forbidden {
                code: "scope_denied",
                message: format!("missing required scope {}", required.as_str()),
            }
            .with_correlation(correlation_id)
            .into_response();
        }
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_table() {
        assert_eq!(
            required_scope(&Method::POST, "/v1/ingest"),
            Some(Scope::IngestWrite)
        );
        assert_eq!(
            required_scope(&Method::POST, "/v1/evidence-packs"),
            Some(Scope::EvidenceWrite)
        );
        assert_eq!(
            required_scope(&Method::GET, "/v1/evidence-packs/cert-1"),
            Some(Scope::EvidenceRead)
        );
        assert_eq!(
            required_scope(&Method::GET, "/v1/evidence-packs/cert-1/download/json"),
            Some(Scope::EvidenceRead)
        );
        assert_eq!(
            required_scope(&Method::GET, "/v1/certificates/cert-1"),
            Some(Scope::CertificatesRead)
        );
        assert_eq!(
            required_scope(&Method::GET, "/v1/keys/jwks.json"),
            Some(Scope::CertificatesRead)
        );
        assert_eq!(
            required_scope(&Method::POST, "/v1/webhooks"),
            Some(Scope::WebhooksWrite)
        );
        assert_eq!(
            required_scope(&Method::POST, "/v1/webhooks/test"),
            Some(Scope::WebhooksWrite)
        );
        assert_eq!(
            required_scope(&Method::GET, "/v1/webhooks/3/deliveries"),
            Some(Scope::WebhooksRead)
        );
        assert_eq!(
            required_scope(&Method::POST, "/admin/tenants"),
            Some(Scope::Admin)
        );
        assert_eq!(
            required_scope(&Method::GET, "/admin/tenants/1/ledger/verify"),
            Some(Scope::Admin)
        );
        assert_eq!(required_scope(&Method::GET, "/v1/models/status"), None);
    }

    #[test]
    fn test_scope_roundtrip() {
        for scope in [
            Scope::IngestWrite,
            Scope::EvidenceWrite,
            Scope::EvidenceRead,
            Scope::WebhooksWrite,
            Scope::WebhooksRead,
            Scope::CertificatesRead,
            Scope::Admin,
        ] {
            assert_eq!(Scope::parse(scope.as_str()), Some(scope));
        }
        assert_eq!(Scope::parse("uploads:delete"), None);
    }

    #[test]
    fn test_admin_scope_not_implied() {
        // An admin key does not implicitly satisfy other scopes; the table
        // answers per route, membership is checked against the key's set.
        assert_ne!(
            required_scope(&Method::POST, "/v1/ingest"),
            Some(Scope::Admin)
        );
    }
}
