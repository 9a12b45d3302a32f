//! Syntactic IP address checks for forwarded-address headers.
//!
//! Header values are attacker-controlled, so every hop is validated before it
//! can be selected as the client address. This is a format check only: it
//! says nothing about reachability or ownership of the address.

use std::net::{IpAddr, SocketAddr};

/// Parse a header hop into a normalized IP address string.
///
/// Accepts bare IPv4/IPv6 addresses as well as `addr:port` forms
/// (`203.0.113.7:8080`, `[2001:db8::1]:443`), in which case only the address
/// part is kept. Returns `None` for anything else.
///
/// # Example
///
/// ```
/// use geobrains::identity::ip::normalize;
///
/// assert_eq!(normalize("203.0.113.7:8080").as_deref(), Some("203.0.113.7"));
/// assert_eq!(normalize("not-an-ip"), None);
/// ```
pub fn normalize(candidate: &str) -> Option<String> {
    let candidate = candidate.trim();
    if candidate.is_empty() {
        return None;
    }

    if let Ok(ip) = candidate.parse::<IpAddr>() {
        return Some(ip.to_string());
    }

    candidate
        .parse::<SocketAddr>()
        .ok()
        .map(|addr| addr.ip().to_string())
}

/// Check whether a header hop is a syntactically valid IP address.
pub fn is_valid_ip(candidate: &str) -> bool {
    normalize(candidate).is_some()
}
