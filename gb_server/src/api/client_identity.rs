//! Client identity middleware.
//!
//! Resolves the caller's IP and user agent from proxy headers once per
//! request, attaches the result to the request extensions, and registers it
//! in the request context store under the request id for the lifetime of the
//! request.

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{HeaderMap, StatusCode, request::Parts},
    middleware::Next,
    response::Response,
};
use geobrains::identity::{ClientContext, HeaderLookup, resolve};

use super::AppState;
use super::request_id::RequestId;

/// [`HeaderLookup`] over an axum header map.
///
/// Repeated headers are joined with `,` so split forwarded-for lines read as
/// a single chain.
pub struct HeaderMapLookup<'a>(pub &'a HeaderMap);

impl HeaderLookup for HeaderMapLookup<'_> {
    fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .0
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }
}

/// Resolved client identity, extractable in handlers
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientIdentity(pub ClientContext);

impl ClientIdentity {
    pub fn context(&self) -> &ClientContext {
        &self.0
    }
}

impl<S> FromRequestParts<S> for ClientIdentity
where
    S: Send + Sync,
{
    type Rejection = (StatusCode, &'static str);

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts.extensions.get::<ClientIdentity>().cloned().ok_or((
            StatusCode::INTERNAL_SERVER_ERROR,
            "Client identity not found in extensions",
        ))
    }
}

/// Resolve the client identity and keep it for the duration of the request.
///
/// Must run inside [`request_id_middleware`](super::request_id::request_id_middleware)
/// so the context can be stored under the request id.
pub async fn client_identity_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let ctx = resolve(&HeaderMapLookup(request.headers()), &state.trust);
    // Only the request that registered an id may release it
    let registered = request
        .extensions()
        .get::<RequestId>()
        .cloned()
        .filter(|id| {
            let inserted = state.contexts.insert_new(id.as_str(), ctx.clone());
            if !inserted {
                tracing::warn!(
                    request_id = %id.as_str(),
                    ip = %ctx.ip,
                    "Request id already in flight; context not registered"
                );
            }
            inserted
        });
    tracing::debug!(ip = %ctx.ip, user_agent = %ctx.user_agent, "Client identity resolved");
    request.extensions_mut().insert(ClientIdentity(ctx));

    let response = next.run(request).await;

    if let Some(id) = registered {
        state.contexts.remove(id.as_str());
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use geobrains::identity::TrustConfig;

    #[test]
    fn test_header_map_lookup_joins_repeats() {
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", HeaderValue::from_static("203.0.113.1"));
        headers.append("x-forwarded-for", HeaderValue::from_static("10.0.0.1"));

        let lookup = HeaderMapLookup(&headers);
        assert_eq!(
            lookup.header("X-Forwarded-For").as_deref(),
            Some("203.0.113.1,10.0.0.1")
        );
        assert!(lookup.header("user-agent").is_none());
    }

    #[test]
    fn test_resolve_through_header_map() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("198.51.100.7, 10.0.0.1"),
        );
        headers.insert("user-agent", HeaderValue::from_static("curl/8.5"));

        let ctx = resolve(&HeaderMapLookup(&headers), &TrustConfig::new(1, false));
        assert_eq!(ctx, ClientContext::new("198.51.100.7", "curl/8.5"));
    }
}
