//! Per-client rate limiting for HTTP routes.
//!
//! Wraps the shared [`RateLimiter`](geobrains::security::RateLimiter) from the
//! application state. Every response on a limited route carries the
//! `X-RateLimit-*` headers; throttled requests get `429 Too Many Requests`
//! with `Retry-After` and never reach the handler.

use axum::{
    Json,
    extract::{Request, State},
    http::{HeaderMap, HeaderValue, StatusCode, header::RETRY_AFTER},
    middleware::Next,
    response::{IntoResponse, Response},
};
use geobrains::identity::UNKNOWN;
use geobrains::security::{RateLimitHeaders, RateLimitResult, RouteClass};
use serde_json::json;

use super::AppState;
use super::client_identity::ClientIdentity;
use crate::{logging, metrics};

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

/// Limit for credential-handling routes
pub async fn auth_rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    enforce(&state, RouteClass::Auth, request, next).await
}

/// Limit for everything else under the API
pub async fn general_rate_limit(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    enforce(&state, RouteClass::General, request, next).await
}

async fn enforce(state: &AppState, route_class: RouteClass, request: Request, next: Next) -> Response {
    let identity = request
        .extensions()
        .get::<ClientIdentity>()
        .map(|c| c.context().ip.clone())
        .unwrap_or_else(|| UNKNOWN.to_string());

    let decision = state.limiter.check(&identity, route_class);
    let mut response = match &decision {
        RateLimitResult::Allowed { .. } => next.run(request).await,
        RateLimitResult::Throttled { retry_after, .. } => {
            logging::log_security_event(
                "rate_limited",
                None,
                Some(&identity),
                &format!("{} route limit exceeded", route_class),
            );
            metrics::rate_limit_hits_total(route_class.as_str());
            throttled_response(*retry_after)
        }
    };

    apply_headers(response.headers_mut(), decision.headers());
    response
}

fn throttled_response(retry_after: u64) -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({
            "error": "Too many requests",
            "retry_after_secs": retry_after,
        })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(RETRY_AFTER, HeaderValue::from(retry_after));
    response
}

/// Write the `X-RateLimit-*` headers
pub fn apply_headers(headers: &mut HeaderMap, limits: RateLimitHeaders) {
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limits.limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(limits.remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(limits.reset_secs));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_headers() {
        let mut headers = HeaderMap::new();
        apply_headers(
            &mut headers,
            RateLimitHeaders {
                limit: 5,
                remaining: 2,
                reset_secs: 41,
            },
        );
        assert_eq!(headers[RATE_LIMIT_LIMIT], "5");
        assert_eq!(headers[RATE_LIMIT_REMAINING], "2");
        assert_eq!(headers[RATE_LIMIT_RESET], "41");
    }

    #[test]
    fn test_throttled_response() {
        let response = throttled_response(17);
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[RETRY_AFTER], "17");
    }
}
