//! Correlation id propagation.
//!
//! Every request gets a correlation id: taken from `X-Correlation-Id`
//! when the client supplies one, generated otherwise. The id is stored in
//! request extensions, recorded on the request's tracing span, echoed in
//! the response, and threaded through broker task payloads and webhook
//! headers so asynchronous work remains attributable.

use axum::extract::Request;
use axum::http::{HeaderName, HeaderValue};
use axum::middleware::Next;
use axum::response::Response;
use tracing::Instrument as _;
use uuid::Uuid;

/// Header carrying the correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// A request's correlation id, stored in request extensions by the
/// middleware and carried into [`crate::auth::AuthContext`].
#[derive(Debug, Clone)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    /// The id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Middleware assigning and propagating the correlation id.
pub async fn middleware(mut request: Request, next: Next) -> Response {
    let correlation_id = request
        .headers()
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map_or_else(|| Uuid::new_v4().to_string(), ToString::to_string);

    request
        .extensions_mut()
        .insert(CorrelationId(correlation_id.clone()));

    let span = tracing::info_span!(
        "request",
        correlation_id = %correlation_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&correlation_id) {
        response
            .headers_mut()
            .insert(HeaderName::from_static(CORRELATION_HEADER), value);
    }
    response
}
