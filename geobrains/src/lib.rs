//! # GeoBrains
//!
//! Authentication security core for the GeoBrains quiz site.
//!
//! The crate verifies credentials under progressive account lockout, records
//! every decision in a hash-chained audit log, and provides the request-level
//! pieces that run before storage is reachable: client identity resolution
//! behind trusted proxies, a per-request context store, and a sliding-window
//! rate limiter.
//!
//! ## Core Modules
//!
//! - [`identity`]: Client IP and user agent from untrusted headers
//! - [`security`]: Rate limiter and request context store
//! - [`audit`]: Tamper-evident audit log
//! - [`auth`]: Lockout, credential pipeline, verification codes, sessions
//! - [`db`]: Storage traits with PostgreSQL and in-memory implementations
//!
//! ## Example
//!
//! ```
//! use geobrains::identity::{TrustConfig, resolve};
//!
//! let headers = [("x-forwarded-for", "198.51.100.4, 10.0.0.2"), ("user-agent", "curl/8.5")];
//! let ctx = resolve(&headers, &TrustConfig::new(1, false));
//!
//! assert_eq!(ctx.ip, "198.51.100.4");
//! assert_eq!(ctx.user_agent, "curl/8.5");
//! ```

/// Hash-chained audit log.
pub mod audit;
pub use audit::{AuditAction, AuditEvent, AuditLog};

/// Credential verification, lockout and verification codes.
pub mod auth;
pub use auth::{Account, AuthError, AuthManager, Credentials};

/// Persistence.
pub mod db;

/// Client identity resolution.
pub mod identity;
pub use identity::{ClientContext, TrustConfig};

/// In-process request security state.
pub mod security;
pub use security::{RateLimiter, RequestContextStore, RouteClass};
