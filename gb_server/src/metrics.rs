//! Prometheus metrics for the authentication server.
//!
//! Metrics are exposed in Prometheus text format for scraping by monitoring
//! systems. Without an installed exporter every helper is a no-op.
//!
//! # Metrics Categories
//!
//! - **HTTP Metrics**: Request counts by route and status
//! - **Auth Metrics**: Login outcomes, lockouts, verification results
//! - **Rate Limiting Metrics**: Throttled requests per route class
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gb_server::metrics;
//! use std::net::SocketAddr;
//!
//! let addr: SocketAddr = "127.0.0.1:9090".parse().unwrap();
//! metrics::init_metrics(addr).unwrap();
//!
//! metrics::login_attempts_total(metrics::LoginOutcome::Success);
//! ```

use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Initialize Prometheus metrics exporter.
///
/// Sets up a Prometheus scrape endpoint on the specified address.
/// Metrics will be available at `http://<addr>/metrics`.
///
/// # Arguments
///
/// - `addr`: Address to bind the metrics server to (e.g., `0.0.0.0:9090`)
///
/// # Returns
///
/// Result indicating success or error message
pub fn init_metrics(addr: SocketAddr) -> Result<(), String> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| format!("Failed to install Prometheus exporter: {}", e))
}

// ============================================================================
// HTTP Metrics
// ============================================================================

/// Record HTTP request.
///
/// Increments the total HTTP request counter with method, path, and status labels.
pub fn http_requests_total(method: &str, path: &str, status: u16) {
    metrics::counter!("http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

// ============================================================================
// Auth Metrics
// ============================================================================

/// How a login attempt ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    Rejected,
    Locked,
    Error,
}

impl LoginOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoginOutcome::Success => "success",
            LoginOutcome::Rejected => "rejected",
            LoginOutcome::Locked => "locked",
            LoginOutcome::Error => "error",
        }
    }
}

/// Increment login attempts counter.
pub fn login_attempts_total(outcome: LoginOutcome) {
    metrics::counter!("login_attempts_total",
        "outcome" => outcome.as_str()
    )
    .increment(1);
}

/// Increment counter of rejected attempts against a locked account.
pub fn lockout_rejections_total() {
    metrics::counter!("lockout_rejections_total").increment(1);
}

/// Increment email verification counter.
pub fn email_verifications_total(success: bool) {
    metrics::counter!("email_verifications_total",
        "success" => success.to_string()
    )
    .increment(1);
}

// ============================================================================
// Rate Limiting Metrics
// ============================================================================

/// Increment rate limit hits counter.
pub fn rate_limit_hits_total(route_class: &str) {
    metrics::counter!("rate_limit_hits_total",
        "route_class" => route_class.to_string()
    )
    .increment(1);
}
