//! In-process security state shared across requests.
//!
//! - [`RateLimiter`]: sliding-window counter keyed by route class and client
//!   identity, bounded by a cap on tracked identities
//! - [`RequestContextStore`]: TTL map from request id to [`ClientContext`]
//!
//! Both are constructed once and injected (usually behind an `Arc`). Neither
//! touches persistent storage, so they can run in an edge layer.
//!
//! ## Example
//!
//! ```
//! use geobrains::security::{RateLimitConfig, RateLimiter, RouteClass};
//!
//! let limiter = RateLimiter::new(
//!     RateLimitConfig::new(5, 60),
//!     RateLimitConfig::new(100, 60),
//!     10_000,
//! )?;
//!
//! let decision = limiter.check("198.51.100.4", RouteClass::Auth);
//! assert!(decision.is_allowed());
//! assert_eq!(decision.remaining(), 4);
//! # Ok::<(), geobrains::security::RateLimitError>(())
//! ```
//!
//! [`ClientContext`]: crate::identity::ClientContext

pub mod clock;
pub mod errors;
pub mod rate_limiter;
pub mod request_context;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::{RateLimitError, RateLimiterResult};
pub use rate_limiter::{
    DEFAULT_MAX_IDENTITIES, RateLimitConfig, RateLimitHeaders, RateLimitResult, RateLimiter,
    RouteClass,
};
pub use request_context::{
    DEFAULT_CONTEXT_CAPACITY, DEFAULT_CONTEXT_TTL, RequestContextStore,
};
