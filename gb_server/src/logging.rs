//! Structured logging configuration.
//!
//! Sets up the `tracing` subscriber and provides helpers for security event
//! tracking. Records emitted by the library through the `log` facade are
//! forwarded into the same subscriber.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn,hyper=warn";

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
///
/// # Example
///
/// ```no_run
/// use gb_server::logging;
///
/// #[tokio::main]
/// async fn main() {
///     logging::init();
///     tracing::info!("Server starting");
/// }
/// ```
pub fn init() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Structured logging initialized");
}

/// Log security event with structured data
///
/// # Arguments
///
/// * `event_type` - Type of security event
/// * `account_id` - Optional account ID
/// * `ip_address` - Optional IP address
/// * `message` - Event message
///
/// # Example
///
/// ```
/// use gb_server::logging::log_security_event;
///
/// log_security_event(
///     "account_locked",
///     Some(123),
///     Some("203.0.113.9"),
///     "Account locked after repeated failures"
/// );
/// ```
pub fn log_security_event(
    event_type: &str,
    account_id: Option<i64>,
    ip_address: Option<&str>,
    message: &str,
) {
    tracing::warn!(
        event_type = event_type,
        account_id = account_id,
        ip_address = ip_address,
        "SECURITY: {}",
        message
    );
}
