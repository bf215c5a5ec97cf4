//! HTTP surface assembly.
//!
//! Public routes (`/health`, `/ready`, `/metrics`) bypass authentication
//! and scopes. Protected routes run the guard stack in declared order:
//! auth → scope → rate-limit → IP → handler. Layers wrap inside-out, so
//! the stack is attached in reverse.

pub mod admin;
pub mod certificates;
pub mod evidence;
pub mod health;
pub mod ingest;
pub mod keys;
pub mod models;
pub mod webhooks;

use axum::extract::DefaultBodyLimit;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

use crate::auth;
use crate::correlation;
use crate::state::AppState;

/// Maximum request body size (1 MiB).
const MAX_BODY_SIZE: usize = 1024 * 1024;

/// Builds the complete application router.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/health", get(health::health))
        .route("/ready", get(health::ready))
        .route("/metrics", get(health::metrics));

    let protected = Router::new()
        .route("/v1/ingest", post(ingest::handle))
        .route("/v1/evidence-packs", post(evidence::request))
        .route("/v1/evidence-packs/:certificate_id", get(evidence::poll))
        .route(
            "/v1/evidence-packs/:certificate_id/download/:format",
            get(evidence::download),
        )
        .route("/v1/certificates/:certificate_id", get(certificates::fetch))
        .route("/v1/keys/jwks.json", get(keys::jwks))
        .route("/v1/models/status", get(models::status))
        .route("/v1/webhooks", post(webhooks::create))
        .route("/v1/webhooks/test", post(webhooks::test))
        .route("/v1/webhooks/:webhook_id/deliveries", get(webhooks::deliveries))
        .route("/admin/tenants", post(admin::create_tenant))
        .route("/admin/tenants/:tenant_id/rotate-api-key", post(admin::rotate_api_key))
        .route("/admin/tenants/:tenant_id/ledger/verify", get(admin::verify_ledger))
        // Innermost first: the last layer added runs first.
        .layer(from_fn_with_state(state.clone(), auth::ip::middleware))
        .layer(from_fn_with_state(state.clone(), auth::rate_limit::middleware))
        .layer(from_fn(auth::scopes::middleware))
        .layer(from_fn_with_state(state.clone(), auth::middleware));

    public
        .merge(protected)
        .layer(from_fn(correlation::middleware))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(MAX_BODY_SIZE))
        .with_state(state)
}
