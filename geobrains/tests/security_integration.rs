//! Integration tests for the edge-side security pieces.
//!
//! Resolves client identities from proxy headers and feeds them to the rate
//! limiter and request context store, the way request middleware does.

use geobrains::identity::{ClientContext, TrustConfig, resolve};
use geobrains::security::{
    ManualClock, RateLimitConfig, RateLimiter, RequestContextStore, RouteClass,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn limiter(clock: &ManualClock) -> RateLimiter {
    RateLimiter::with_clock(
        RateLimitConfig::new(5, 10),
        RateLimitConfig::new(100, 60),
        1_000,
        Arc::new(clock.clone()),
    )
    .expect("valid limiter config")
}

#[test]
fn test_spoofed_forwarded_for_does_not_escape_limit() {
    let clock = ManualClock::new();
    let limiter = limiter(&clock);
    let trust = TrustConfig::new(1, false);

    // attacker rotates the left-most hop, the proxy appends the real address
    for i in 0..5 {
        let spoofed = format!("10.9.9.{}, 198.51.100.20", i);
        let headers = [("x-forwarded-for", spoofed.as_str())];
        let ctx = resolve(&headers, &trust);
        assert_eq!(ctx.ip, "198.51.100.20");
        assert!(limiter.check(&ctx.ip, RouteClass::Auth).is_allowed());
    }

    let headers = [("x-forwarded-for", "10.9.9.99, 198.51.100.20")];
    let ctx = resolve(&headers, &trust);
    let decision = limiter.check(&ctx.ip, RouteClass::Auth);
    assert!(!decision.is_allowed());
    assert!(decision.retry_after().unwrap() > 0);

    clock.advance(Duration::from_secs(10));
    assert!(limiter.check(&ctx.ip, RouteClass::Auth).is_allowed());
}

#[test]
fn test_provider_header_preferred_when_configured() {
    let mut headers = HashMap::new();
    headers.insert("CF-Connecting-IP".to_string(), "203.0.113.5".to_string());
    headers.insert("X-Forwarded-For".to_string(), "198.51.100.1".to_string());

    let preferred = resolve(&headers, &TrustConfig::new(0, true));
    assert_eq!(preferred.ip, "203.0.113.5");

    let chain = resolve(&headers, &TrustConfig::new(0, false));
    assert_eq!(chain.ip, "198.51.100.1");
}

#[test]
fn test_unknown_clients_share_a_bucket() {
    let clock = ManualClock::new();
    let limiter = limiter(&clock);
    let trust = TrustConfig::default();

    let empty: [(&str, &str); 0] = [];
    for _ in 0..5 {
        let ctx = resolve(&empty, &trust);
        assert_eq!(ctx, ClientContext::unknown());
        assert!(limiter.check(&ctx.ip, RouteClass::Auth).is_allowed());
    }
    assert!(!limiter.check("unknown", RouteClass::Auth).is_allowed());
}

#[test]
fn test_context_store_round_trip_through_request_id() {
    let store = RequestContextStore::default();
    let headers = [
        ("x-forwarded-for", "198.51.100.8"),
        ("user-agent", "GeoBrainsApp/2.1"),
    ];
    let ctx = resolve(&headers, &TrustConfig::new(0, false));

    store.set("7c0e1f6a", ctx.clone());
    assert_eq!(store.get("7c0e1f6a"), Some(ctx));
    store.remove("7c0e1f6a");
    assert!(store.is_empty());
}
