//! Sliding-window rate limiting keyed by client identity.

use super::clock::{Clock, SystemClock};
use super::errors::{RateLimitError, RateLimiterResult};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default cap on tracked (route class, identity) pairs
pub const DEFAULT_MAX_IDENTITIES: usize = 10_000;

/// Route classes with independent limits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    /// Authentication-sensitive routes (login, verification)
    Auth,
    /// Everything else
    General,
}

impl RouteClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteClass::Auth => "auth",
            RouteClass::General => "general",
        }
    }
}

impl fmt::Display for RouteClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rate limit configuration for a route class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests allowed in window
    pub max_requests: usize,

    /// Time window in seconds
    pub window_secs: u64,
}

impl RateLimitConfig {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    /// Configuration for authentication routes
    pub fn auth() -> Self {
        Self {
            max_requests: std::env::var("RATE_LIMIT_AUTH_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(5),
            window_secs: std::env::var("RATE_LIMIT_AUTH_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    /// Configuration for general routes
    pub fn general() -> Self {
        Self {
            max_requests: std::env::var("RATE_LIMIT_GENERAL_MAX")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(100),
            window_secs: std::env::var("RATE_LIMIT_GENERAL_WINDOW_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60),
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
}

/// Response metadata attached to every decision
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitHeaders {
    /// Limit ceiling for the route class
    pub limit: usize,
    /// Requests left in the current window
    pub remaining: usize,
    /// Seconds until the oldest tracked request leaves the window
    pub reset_secs: u64,
}

/// Rate limit check result
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is allowed and has been recorded
    Allowed { headers: RateLimitHeaders },

    /// Request is throttled; nothing was recorded
    Throttled {
        retry_after: u64,
        headers: RateLimitHeaders,
    },
}

impl RateLimitResult {
    /// Check if request is allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }

    /// Response metadata, present regardless of outcome
    pub fn headers(&self) -> RateLimitHeaders {
        match self {
            RateLimitResult::Allowed { headers } | RateLimitResult::Throttled { headers, .. } => {
                *headers
            }
        }
    }

    /// Get remaining requests in the window
    pub fn remaining(&self) -> usize {
        self.headers().remaining
    }

    /// Get retry after seconds (if throttled)
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            RateLimitResult::Throttled { retry_after, .. } => Some(*retry_after),
            RateLimitResult::Allowed { .. } => None,
        }
    }
}

type WindowKey = (RouteClass, String);

/// In-process sliding-window rate limiter.
///
/// Each (route class, identity) pair keeps an ordered list of request
/// timestamps inside its trailing window. Memory is bounded by
/// `max_identities`: when a new pair would exceed the cap, pairs with nothing
/// left in their window are reaped first, then the least recently active
/// pairs are evicted one at a time.
///
/// Construct once at startup and share through an `Arc`; a single mutex
/// guards all windows since each check is O(window size).
pub struct RateLimiter {
    windows: Mutex<HashMap<WindowKey, VecDeque<Instant>>>,
    auth: RateLimitConfig,
    general: RateLimitConfig,
    max_identities: usize,
    clock: Arc<dyn Clock>,
}

impl RateLimiter {
    /// Create a rate limiter with the given per-class limits.
    ///
    /// # Errors
    ///
    /// * `RateLimitError::InvalidWindow` - A class has a zero-second window
    /// * `RateLimitError::InvalidCapacity` - `max_identities` is zero
    ///
    /// # Example
    ///
    /// ```
    /// use geobrains::security::{RateLimitConfig, RateLimiter, RouteClass};
    ///
    /// let limiter = RateLimiter::new(
    ///     RateLimitConfig::new(5, 60),
    ///     RateLimitConfig::new(100, 60),
    ///     1_000,
    /// )
    /// .unwrap();
    ///
    /// assert!(limiter.check("203.0.113.7", RouteClass::Auth).is_allowed());
    /// ```
    pub fn new(
        auth: RateLimitConfig,
        general: RateLimitConfig,
        max_identities: usize,
    ) -> RateLimiterResult<Self> {
        Self::with_clock(auth, general, max_identities, Arc::new(SystemClock))
    }

    /// Create a rate limiter driven by a custom clock.
    pub fn with_clock(
        auth: RateLimitConfig,
        general: RateLimitConfig,
        max_identities: usize,
        clock: Arc<dyn Clock>,
    ) -> RateLimiterResult<Self> {
        if auth.window_secs == 0 {
            return Err(RateLimitError::InvalidWindow {
                route_class: RouteClass::Auth.as_str(),
            });
        }
        if general.window_secs == 0 {
            return Err(RateLimitError::InvalidWindow {
                route_class: RouteClass::General.as_str(),
            });
        }
        if max_identities == 0 {
            return Err(RateLimitError::InvalidCapacity);
        }

        Ok(Self {
            windows: Mutex::new(HashMap::new()),
            auth,
            general,
            max_identities,
            clock,
        })
    }

    /// Limits for a route class
    pub fn config(&self, route_class: RouteClass) -> &RateLimitConfig {
        match route_class {
            RouteClass::Auth => &self.auth,
            RouteClass::General => &self.general,
        }
    }

    /// Check and record a request for `identity` on `route_class`.
    ///
    /// Expired timestamps are dropped first. If the remaining count is at or
    /// above the limit the request is throttled with the number of seconds
    /// until the oldest tracked request leaves the window; otherwise the
    /// request is recorded and allowed.
    pub fn check(&self, identity: &str, route_class: RouteClass) -> RateLimitResult {
        let config = self.config(route_class);
        let window = config.window();
        let now = self.clock.now();
        let key = (route_class, identity.to_string());

        let mut windows = self.lock();

        if !windows.contains_key(&key) && windows.len() >= self.max_identities {
            self.evict(&mut windows, now);
        }

        let timestamps = windows.entry(key).or_default();
        prune(timestamps, now, window);

        if timestamps.len() >= config.max_requests {
            let retry_after = reset_after(timestamps.front(), now, window);
            return RateLimitResult::Throttled {
                retry_after,
                headers: RateLimitHeaders {
                    limit: config.max_requests,
                    remaining: 0,
                    reset_secs: retry_after,
                },
            };
        }

        timestamps.push_back(now);

        RateLimitResult::Allowed {
            headers: RateLimitHeaders {
                limit: config.max_requests,
                remaining: config.max_requests - timestamps.len(),
                reset_secs: reset_after(timestamps.front(), now, window),
            },
        }
    }

    /// Forget all recorded requests for an identity on a route class
    pub fn reset(&self, identity: &str, route_class: RouteClass) {
        self.lock().remove(&(route_class, identity.to_string()));
    }

    /// Number of (route class, identity) pairs currently tracked
    pub fn tracked_identities(&self) -> usize {
        self.lock().len()
    }

    /// Drop every pair with no timestamps left in its window.
    ///
    /// Returns the number of pairs removed.
    pub fn purge_idle(&self) -> usize {
        let now = self.clock.now();
        let mut windows = self.lock();
        let before = windows.len();
        self.reap_idle(&mut windows, now);
        before - windows.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<WindowKey, VecDeque<Instant>>> {
        self.windows.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reap_idle(&self, windows: &mut HashMap<WindowKey, VecDeque<Instant>>, now: Instant) {
        windows.retain(|(class, _), timestamps| {
            let window = self.config(*class).window();
            timestamps
                .back()
                .is_some_and(|last| now.duration_since(*last) < window)
        });
    }

    /// Make room for one new pair: reap idle pairs, then evict the least
    /// recently active ones until below the cap.
    fn evict(&self, windows: &mut HashMap<WindowKey, VecDeque<Instant>>, now: Instant) {
        let before = windows.len();
        self.reap_idle(windows, now);

        while windows.len() >= self.max_identities {
            let victim = windows
                .iter()
                .min_by_key(|(_, timestamps)| timestamps.back().copied())
                .map(|(key, _)| key.clone());

            match victim {
                Some(key) => {
                    windows.remove(&key);
                }
                None => break,
            }
        }

        log::debug!(
            "Rate limiter evicted {} tracked identities (cap {})",
            before - windows.len(),
            self.max_identities
        );
    }
}

/// Drop timestamps that have left the window
fn prune(timestamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(ts) = timestamps.front() {
        if now.duration_since(*ts) >= window {
            timestamps.pop_front();
        } else {
            break;
        }
    }
}

/// Whole seconds until `oldest` leaves the window, at least 1
fn reset_after(oldest: Option<&Instant>, now: Instant, window: Duration) -> u64 {
    let remaining = match oldest {
        Some(oldest) => window.saturating_sub(now.duration_since(*oldest)),
        None => window,
    };

    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::clock::ManualClock;

    fn limiter_with(
        auth: RateLimitConfig,
        max_identities: usize,
    ) -> (RateLimiter, ManualClock) {
        let clock = ManualClock::new();
        let limiter = RateLimiter::with_clock(
            auth,
            RateLimitConfig::new(100, 60),
            max_identities,
            Arc::new(clock.clone()),
        )
        .unwrap();
        (limiter, clock)
    }

    #[test]
    fn test_sixth_request_is_throttled_then_allowed_after_window() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(5, 10), 100);

        for i in 0..5 {
            let result = limiter.check("1.2.3.4", RouteClass::Auth);
            assert!(result.is_allowed(), "Request {} should be allowed", i + 1);
            assert_eq!(result.remaining(), 4 - i);
        }

        let result = limiter.check("1.2.3.4", RouteClass::Auth);
        assert!(!result.is_allowed(), "6th request should be throttled");
        let retry_after = result.retry_after().unwrap();
        assert!(retry_after > 0);
        assert!(retry_after <= 10);

        clock.advance(Duration::from_secs(10));

        let result = limiter.check("1.2.3.4", RouteClass::Auth);
        assert!(result.is_allowed(), "Should allow after window elapses");
    }

    #[test]
    fn test_reset_after_tracks_oldest_timestamp() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(2, 10), 100);

        limiter.check("a", RouteClass::Auth);
        clock.advance(Duration::from_secs(4));
        limiter.check("a", RouteClass::Auth);

        let result = limiter.check("a", RouteClass::Auth);
        assert_eq!(result.retry_after(), Some(6));

        clock.advance(Duration::from_secs(6));
        let result = limiter.check("a", RouteClass::Auth);
        assert!(result.is_allowed(), "Oldest request should have expired");
        assert_eq!(result.remaining(), 0);
    }

    #[test]
    fn test_throttled_request_is_not_recorded() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(1, 10), 100);

        assert!(limiter.check("a", RouteClass::Auth).is_allowed());
        clock.advance(Duration::from_secs(5));
        assert!(!limiter.check("a", RouteClass::Auth).is_allowed());
        assert!(!limiter.check("a", RouteClass::Auth).is_allowed());

        clock.advance(Duration::from_secs(5));
        assert!(limiter.check("a", RouteClass::Auth).is_allowed());
    }

    #[test]
    fn test_headers_present_on_both_outcomes() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::new(1, 30), 100);

        let allowed = limiter.check("a", RouteClass::Auth);
        assert_eq!(
            allowed.headers(),
            RateLimitHeaders {
                limit: 1,
                remaining: 0,
                reset_secs: 30
            }
        );

        let throttled = limiter.check("a", RouteClass::Auth);
        assert_eq!(throttled.headers().limit, 1);
        assert_eq!(throttled.headers().remaining, 0);
        assert_eq!(throttled.headers().reset_secs, 30);
    }

    #[test]
    fn test_route_classes_are_independent() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::new(1, 60), 100);

        assert!(limiter.check("a", RouteClass::Auth).is_allowed());
        assert!(!limiter.check("a", RouteClass::Auth).is_allowed());
        assert!(limiter.check("a", RouteClass::General).is_allowed());
    }

    #[test]
    fn test_identities_are_independent() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::new(1, 60), 100);

        assert!(limiter.check("a", RouteClass::Auth).is_allowed());
        assert!(!limiter.check("a", RouteClass::Auth).is_allowed());
        assert!(limiter.check("b", RouteClass::Auth).is_allowed());
    }

    #[test]
    fn test_idle_identities_reaped_before_lru() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(5, 10), 3);

        limiter.check("idle", RouteClass::Auth);
        clock.advance(Duration::from_secs(11));
        limiter.check("busy-1", RouteClass::Auth);
        limiter.check("busy-2", RouteClass::Auth);
        assert_eq!(limiter.tracked_identities(), 3);

        limiter.check("new", RouteClass::Auth);
        assert_eq!(limiter.tracked_identities(), 3);

        // busy-1 kept its history, so it is still at one request
        let result = limiter.check("busy-1", RouteClass::Auth);
        assert_eq!(result.remaining(), 3);
    }

    #[test]
    fn test_least_recently_active_evicted_when_all_busy() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(5, 60), 2);

        limiter.check("first", RouteClass::Auth);
        clock.advance(Duration::from_secs(1));
        limiter.check("second", RouteClass::Auth);
        clock.advance(Duration::from_secs(1));
        // refresh "first" so "second" becomes the least recently active
        limiter.check("first", RouteClass::Auth);
        clock.advance(Duration::from_secs(1));

        limiter.check("third", RouteClass::Auth);
        assert_eq!(limiter.tracked_identities(), 2);

        // "first" survived with two recorded requests
        assert_eq!(limiter.check("first", RouteClass::Auth).remaining(), 2);
        // "second" was evicted and starts from scratch
        limiter.reset("first", RouteClass::Auth);
        assert_eq!(limiter.check("second", RouteClass::Auth).remaining(), 4);
    }

    #[test]
    fn test_cap_is_never_exceeded() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::new(5, 60), 10);

        for i in 0..100 {
            limiter.check(&format!("10.0.0.{}", i), RouteClass::Auth);
            assert!(limiter.tracked_identities() <= 10);
        }
    }

    #[test]
    fn test_purge_idle() {
        let (limiter, clock) = limiter_with(RateLimitConfig::new(5, 10), 100);

        limiter.check("a", RouteClass::Auth);
        limiter.check("b", RouteClass::Auth);
        clock.advance(Duration::from_secs(10));
        limiter.check("c", RouteClass::Auth);

        assert_eq!(limiter.purge_idle(), 2);
        assert_eq!(limiter.tracked_identities(), 1);
    }

    #[test]
    fn test_invalid_configuration_rejected() {
        assert!(matches!(
            RateLimiter::new(RateLimitConfig::new(5, 0), RateLimitConfig::new(5, 60), 10),
            Err(RateLimitError::InvalidWindow { route_class: "auth" })
        ));
        assert!(matches!(
            RateLimiter::new(RateLimitConfig::new(5, 60), RateLimitConfig::new(5, 0), 10),
            Err(RateLimitError::InvalidWindow { route_class: "general" })
        ));
        assert!(matches!(
            RateLimiter::new(RateLimitConfig::new(5, 60), RateLimitConfig::new(5, 60), 0),
            Err(RateLimitError::InvalidCapacity)
        ));
    }

    #[test]
    fn test_zero_limit_always_throttles() {
        let (limiter, _clock) = limiter_with(RateLimitConfig::new(0, 10), 100);
        let result = limiter.check("a", RouteClass::Auth);
        assert_eq!(result.retry_after(), Some(10));
    }

    #[test]
    fn test_concurrent_checks_allow_exactly_limit() {
        let limiter = Arc::new(
            RateLimiter::new(RateLimitConfig::new(5, 60), RateLimitConfig::new(100, 60), 100)
                .unwrap(),
        );

        let handles: Vec<_> = (0..50)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || limiter.check("shared", RouteClass::Auth).is_allowed())
            })
            .collect();

        let allowed = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(allowed, 5, "Exactly 5 requests should pass the limiter");
    }
}
