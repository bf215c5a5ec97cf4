//! Tenant IP allowlists.
//!
//! A tenant may restrict API access to a list of CIDR blocks or exact IP
//! addresses. The client address comes from the first `X-Forwarded-For`
//! entry when present, otherwise from the peer address. Entries that fail
//! to parse increment a metric and fail closed outside development (the
//! `IP_ALLOWLIST_FAIL_OPEN` flag overrides in either direction).

use std::net::{IpAddr, SocketAddr};

use axum::extract::{ConnectInfo, Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse as _, Response};
use ipnet::IpNet;
use serde_json::Value;

use crate::error::ApiError;
use crate::state::AppState;

use super::AuthContext;

/// Result of evaluating an allowlist against a client address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllowlistOutcome {
    /// No allowlist configured: unrestricted.
    Unrestricted,
    /// The address matched an entry.
    Matched,
    /// No entry matched.
    NotMatched,
    /// At least one entry (or the list itself) was unparseable.
    ParseFailure {
        /// Number of entries that failed to parse.
        errors: usize,
    },
}

/// Evaluates an allowlist JSON value against a client address.
///
/// The list must be a JSON array of strings, each a CIDR block
/// (`10.0.0.0/8`) or an exact address (`203.0.113.7`).
#[must_use]
pub fn evaluate_allowlist(allowlist: Option<&Value>, client: IpAddr) -> AllowlistOutcome {
    let Some(value) = allowlist else {
        return AllowlistOutcome::Unrestricted;
    };
    if value.is_null() {
        return AllowlistOutcome::Unrestricted;
    }

    let Some(entries) = value.as_array() else {
        return AllowlistOutcome::ParseFailure { errors: 1 };
    };
    if entries.is_empty() {
        return AllowlistOutcome::Unrestricted;
    }

    let mut errors = 0usize;
    let mut matched = false;

    for entry in entries {
        let Some(raw) = entry.as_str() else {
            errors += 1;
            continue;
        };

        if let Ok(net) = raw.parse::<IpNet>() {
            if net.contains(&client) {
                matched = true;
            }
        } else if let Ok(exact) = raw.parse::<IpAddr>() {
            if exact == client {
                matched = true;
            }
        } else {
            errors += 1;
        }
    }

    if matched {
        AllowlistOutcome::Matched
    } else if errors > 0 {
        AllowlistOutcome::ParseFailure { errors }
    } else {
        AllowlistOutcome::NotMatched
    }
}

/// Extracts the client address: first `X-Forwarded-For` hop, else peer.
#[must_use]
pub fn client_ip(request: &Request) -> Option<IpAddr> {
    if let Some(forwarded) = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            if let Ok(ip) = first.trim().parse() {
                return Some(ip);
            }
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

/// Allowlist-enforcement middleware; runs after authentication.
pub async fn middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let Some(auth) = request.extensions().get::<AuthContext>().cloned() else {
        return ApiError::Auth("missing authentication context".to_string()).into_response();
    };

    let Some(client) = client_ip(&request) else {
        return deny(&auth, "client address unavailable");
    };

    match evaluate_allowlist(auth.ip_allowlist.as_ref(), client) {
        AllowlistOutcome::Unrestricted | AllowlistOutcome::Matched => next.run(request).await,
        AllowlistOutcome::NotMatched => deny(&auth, "address not in tenant allowlist"),
        AllowlistOutcome::ParseFailure { errors } => {
            state
                .metrics
                .ip_allowlist_parse_errors_total
                .inc_by(errors as u64);

            if state.config.ip_allowlist_fails_open() {
                tracing::warn!(
                    tenant_id = auth.tenant_id,
                    errors,
                    "IP allowlist unparseable; failing open"
                );
                next.run(request).await
            } else {
                tracing::warn!(
                    tenant_id = auth.tenant_id,
                    errors,
                    "IP allowlist unparseable; failing closed"
                );
                deny(&auth, "tenant allowlist unparseable")
            }
        }
    }
}

fn deny(auth: &AuthContext, message: &str) -> Response {
    ApiError::Forbidden {
        code: "ip_denied",
        message: message.to_string(),
    }
    .with_correlation(auth.correlation_id.clone())
    .into_response()
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn ip(s: &str) -> IpAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_no_allowlist_is_unrestricted() {
        assert_eq!(
            evaluate_allowlist(None, ip("203.0.113.7")),
            AllowlistOutcome::Unrestricted
        );
        assert_eq!(
            evaluate_allowlist(Some(&Value::Null), ip("203.0.113.7")),
            AllowlistOutcome::Unrestricted
        );
        assert_eq!(
            evaluate_allowlist(Some(&json!([])), ip("203.0.113.7")),
            AllowlistOutcome::Unrestricted
        );
    }

    #[test]
    fn test_exact_match() {
        let list = json!(["203.0.113.7"]);
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("203.0.113.7")),
            AllowlistOutcome::Matched
        );
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("203.0.113.8")),
            AllowlistOutcome::NotMatched
        );
    }

    #[test]
    fn test_cidr_match() {
        let list = json!(["10.0.0.0/8", "192.168.1.0/24"]);
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("10.42.0.1")),
            AllowlistOutcome::Matched
        );
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("192.168.2.1")),
            AllowlistOutcome::NotMatched
        );
    }

    #[test]
    fn test_ipv6_entries() {
        let list = json!(["2001:db8::/32"]);
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("2001:db8::1")),
            AllowlistOutcome::Matched
        );
    }

    #[test]
    fn test_corrupt_entries_reported() {
        let list = json!(["not-a-cidr", "10.0.0.0/8"]);
        // A valid entry still matches even when a sibling is corrupt.
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("10.0.0.1")),
            AllowlistOutcome::Matched
        );
        // Without a match, the parse failure is surfaced for the fail-mode
        // decision.
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("203.0.113.7")),
            AllowlistOutcome::ParseFailure { errors: 1 }
        );
    }

    #[test]
    fn test_non_array_allowlist_is_parse_failure() {
        let list = json!({"cidr": "10.0.0.0/8"});
        assert_eq!(
            evaluate_allowlist(Some(&list), ip("10.0.0.1")),
            AllowlistOutcome::ParseFailure { errors: 1 }
        );
    }
}
