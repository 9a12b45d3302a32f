//! Client identity resolution.
//!
//! Resolves a best-effort client IP and user agent from untrusted request
//! headers. The resolver needs nothing but the headers, so it can run at the
//! edge before any storage is available.
//!
//! ## Trust model
//!
//! - `trusted_proxy_count`: how many proxies sit between the real client and
//!   this service. Each of them appends one hop to `x-forwarded-for`.
//! - `prefer_provider_headers`: consult single-value edge headers
//!   (`cf-connecting-ip`, `true-client-ip`, `fly-client-ip`, `x-real-ip`)
//!   before the forwarded-for chain.
//!
//! Provider headers are always consulted as a last resort when the chain
//! yields nothing valid.

pub mod ip;
pub mod resolver;

pub use resolver::{
    ClientContext, FORWARDED_FOR, HeaderLookup, PROVIDER_HEADERS, TrustConfig, UNKNOWN,
    USER_AGENT, client_hop_index, resolve,
};
