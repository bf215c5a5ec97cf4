//! Per-tenant token-bucket rate limiting.
//!
//! The bucket lives in the shared cache so every API instance draws from
//! the same budget. Capacity comes from the tenant row; the refill rate is
//! capacity per minute. Rejections carry `Retry-After`.

use axum::extract::{Request, State};
use axum::http::HeaderValue;
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use chrono::Utc;

use crate::error::ApiError;
use crate::state::AppState;

use super::AuthContext;

/// Rate-limit middleware; runs after scope enforcement.
pub async fn middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        return ApiError::Auth("missing authentication context".to_string()).into_response();
    };

    let capacity = auth.rate_limit_per_minute.max(1);
    let now_unix = Utc::now().timestamp_millis() as f64 / 1000.0;

    let decision = match state
        .cache
        .take_token(auth.tenant_id, capacity, state.config.rate_limit_ttl, now_unix)
        .await
    {
        Ok(decision) => decision,
        Err(err) => {
            tracing::warn!(tenant_id = auth.tenant_id, error = %err, "rate limiter unavailable");
            return ApiError::TransientInfra {
                code: "CACHE_UNAVAILABLE",
                message: "rate limiter unavailable".to_string(),
                retry_after_secs: 5,
            }
            .with_correlation(auth.correlation_id.clone())
            .into_response();
        }
    };

    if !decision.allowed {
        state.metrics.rate_limit_rejections_total.inc();
        return ApiError::RateLimited {
            retry_after_secs: 60,
        }
        .with_correlation(auth.correlation_id.clone())
        .into_response();
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&capacity.to_string()) {
        headers.insert("x-ratelimit-limit", value);
    }
    if let Ok(value) = HeaderValue::from_str(&format!("{:.0}", decision.remaining.floor())) {
        headers.insert("x-ratelimit-remaining", value);
    }
    response
}
