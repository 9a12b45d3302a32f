//! Client identity resolution under a trusted-proxy model.

use super::ip;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Placeholder used when no client address or user agent can be determined.
pub const UNKNOWN: &str = "unknown";

/// Standard forwarded-for header, a left-to-right list of hops.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// User agent header.
pub const USER_AGENT: &str = "user-agent";

/// Single-value headers set by edge networks, in lookup order.
pub const PROVIDER_HEADERS: [&str; 4] = [
    "cf-connecting-ip",
    "true-client-ip",
    "fly-client-ip",
    "x-real-ip",
];

/// How much of the inbound header chain is trusted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustConfig {
    /// Number of proxies between the true client and this service
    pub trusted_proxy_count: usize,

    /// Consult provider headers before the forwarded-for chain
    pub prefer_provider_headers: bool,
}

impl TrustConfig {
    pub fn new(trusted_proxy_count: usize, prefer_provider_headers: bool) -> Self {
        Self {
            trusted_proxy_count,
            prefer_provider_headers,
        }
    }

    /// Load from `TRUSTED_PROXY_COUNT` and `PREFER_PROVIDER_HEADERS`.
    pub fn from_env() -> Self {
        Self {
            trusted_proxy_count: std::env::var("TRUSTED_PROXY_COUNT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(0),
            prefer_provider_headers: std::env::var("PREFER_PROVIDER_HEADERS")
                .map(|v| v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }
}

/// Best-effort client identity for a single request.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClientContext {
    pub ip: String,
    pub user_agent: String,
}

impl ClientContext {
    pub fn new(ip: impl Into<String>, user_agent: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: user_agent.into(),
        }
    }

    /// Context used when nothing about the client is known.
    pub fn unknown() -> Self {
        Self::new(UNKNOWN, UNKNOWN)
    }

    /// Whether a concrete client address was resolved.
    pub fn has_ip(&self) -> bool {
        self.ip != UNKNOWN
    }
}

impl Default for ClientContext {
    fn default() -> Self {
        Self::unknown()
    }
}

/// Read-only access to request headers.
///
/// Lookups are case-insensitive. When a header occurs more than once the
/// implementation should join the values with `,`, which is how proxies
/// concatenate forwarded-for hops anyway.
pub trait HeaderLookup {
    fn header(&self, name: &str) -> Option<String>;
}

impl HeaderLookup for HashMap<String, String> {
    fn header(&self, name: &str) -> Option<String> {
        self.iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.clone())
    }
}

impl HeaderLookup for [(&str, &str)] {
    fn header(&self, name: &str) -> Option<String> {
        let values: Vec<&str> = self
            .iter()
            .filter(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| *value)
            .collect();

        if values.is_empty() {
            None
        } else {
            Some(values.join(","))
        }
    }
}

impl<const N: usize> HeaderLookup for [(&str, &str); N] {
    fn header(&self, name: &str) -> Option<String> {
        self.as_slice().header(name)
    }
}

/// Resolve the client identity from untrusted headers.
///
/// Never fails: anything that cannot be determined comes back as
/// [`UNKNOWN`].
///
/// Forwarded-for hops are read right to left: the rightmost
/// `trusted_proxy_count` entries were appended by our own infrastructure and
/// are skipped; everything further left is attacker-controlled and ignored.
/// The selected index is clamped so a shorter chain than expected still
/// resolves to its leftmost valid hop.
///
/// # Example
///
/// ```
/// use geobrains::identity::{TrustConfig, resolve};
///
/// let headers = [("x-forwarded-for", "1.1.1.1, 2.2.2.2, 3.3.3.3")];
/// let ctx = resolve(&headers, &TrustConfig::new(1, false));
/// assert_eq!(ctx.ip, "2.2.2.2");
/// ```
pub fn resolve<H>(headers: &H, trust: &TrustConfig) -> ClientContext
where
    H: HeaderLookup + ?Sized,
{
    let user_agent = headers
        .header(USER_AGENT)
        .filter(|ua| !ua.is_empty())
        .unwrap_or_else(|| UNKNOWN.to_string());

    if trust.prefer_provider_headers
        && let Some(ip) = provider_ip(headers)
    {
        return ClientContext { ip, user_agent };
    }

    let ip = forwarded_ip(headers, trust.trusted_proxy_count)
        .or_else(|| provider_ip(headers))
        .unwrap_or_else(|| UNKNOWN.to_string());

    ClientContext { ip, user_agent }
}

/// Index of the client hop among `hop_count` valid hops.
///
/// Computes `max(0, min(n - 1, n - trusted_proxy_count - 1))` without
/// underflow. Returns `None` when there are no hops.
pub fn client_hop_index(hop_count: usize, trusted_proxy_count: usize) -> Option<usize> {
    if hop_count == 0 {
        return None;
    }

    Some(
        hop_count
            .saturating_sub(trusted_proxy_count)
            .saturating_sub(1),
    )
}

fn forwarded_ip<H>(headers: &H, trusted_proxy_count: usize) -> Option<String>
where
    H: HeaderLookup + ?Sized,
{
    let raw = headers.header(FORWARDED_FOR)?;
    let hops: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|hop| !hop.is_empty())
        .filter_map(ip::normalize)
        .collect();

    let index = client_hop_index(hops.len(), trusted_proxy_count)?;
    hops.into_iter().nth(index)
}

/// First non-empty provider header, if it holds a valid address.
fn provider_ip<H>(headers: &H) -> Option<String>
where
    H: HeaderLookup + ?Sized,
{
    let value = PROVIDER_HEADERS
        .iter()
        .find_map(|name| headers.header(name).filter(|v| !v.trim().is_empty()))?;

    ip::normalize(&value)
}
