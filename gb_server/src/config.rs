//! Server configuration management.
//!
//! Consolidates all environment variable reads and provides validated configuration.

use geobrains::auth::{AdminPolicy, AuditPolicy, LockoutPolicy};
use geobrains::db::DatabaseConfig;
use geobrains::identity::TrustConfig;
use geobrains::security::{DEFAULT_MAX_IDENTITIES, RateLimitConfig};
use std::net::SocketAddr;

/// Default listen address
pub const DEFAULT_BIND: &str = "127.0.0.1:8080";

/// Complete server configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Server bind address
    pub bind: SocketAddr,
    /// Database configuration
    pub database: DatabaseConfig,
    /// Security configuration
    pub security: SecurityConfig,
    /// Proxy trust settings for client identity resolution
    pub trust: TrustConfig,
    /// Rate limiter settings
    pub rate_limits: RateLimitSettings,
    /// Lockout tiers
    pub lockout: LockoutPolicy,
    /// Audit write failure handling
    pub audit_policy: AuditPolicy,
    /// Accounts allowed through the admin guard
    pub admins: AdminPolicy,
    /// Prometheus exporter address, disabled when unset
    pub metrics_bind: Option<SocketAddr>,
}

/// Security-related configuration
#[derive(Debug, Clone)]
pub struct SecurityConfig {
    /// JWT signing secret (required)
    pub jwt_secret: String,
    /// Password hashing pepper (may be empty)
    pub password_pepper: String,
}

/// Per route class limits
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub auth: RateLimitConfig,
    pub general: RateLimitConfig,
    pub max_identities: usize,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `bind_override` - Optional bind address override (from CLI args)
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Returns
    ///
    /// * `Result<ServerConfig, ConfigError>` - Loaded configuration or error
    ///
    /// # Errors
    ///
    /// Returns error if required variables are missing or invalid
    pub fn from_env(
        bind_override: Option<SocketAddr>,
        database_url_override: Option<String>,
    ) -> Result<Self, ConfigError> {
        let bind = match bind_override {
            Some(bind) => bind,
            None => parse_env_required_format("SERVER_BIND", DEFAULT_BIND)?,
        };

        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.database_url = url;
        }

        // Security configuration (JWT secret is REQUIRED)
        let jwt_secret = std::env::var("JWT_SECRET").map_err(|_| ConfigError::MissingRequired {
            var: "JWT_SECRET".to_string(),
            hint: "Generate with: openssl rand -hex 32".to_string(),
        })?;
        let password_pepper = std::env::var("PASSWORD_PEPPER").unwrap_or_default();

        let rate_limits = RateLimitSettings {
            auth: RateLimitConfig::auth(),
            general: RateLimitConfig::general(),
            max_identities: parse_env_or("RATE_LIMIT_MAX_IDENTITIES", DEFAULT_MAX_IDENTITIES),
        };

        let lockout = LockoutPolicy::from_env().map_err(|e| ConfigError::Invalid {
            var: "LOCKOUT_THRESHOLD / LOCKOUT_DURATIONS_SECS".to_string(),
            reason: e.to_string(),
        })?;

        let audit_policy = AuditPolicy::from_env().map_err(|e| ConfigError::Invalid {
            var: "AUDIT_POLICY".to_string(),
            reason: e.to_string(),
        })?;

        let metrics_bind = match std::env::var("METRICS_BIND") {
            Ok(raw) if !raw.trim().is_empty() => {
                Some(raw.trim().parse().map_err(|_| ConfigError::Invalid {
                    var: "METRICS_BIND".to_string(),
                    reason: format!("Not a socket address: {}", raw),
                })?)
            }
            _ => None,
        };

        let config = ServerConfig {
            bind,
            database,
            security: SecurityConfig {
                jwt_secret,
                password_pepper,
            },
            trust: TrustConfig::from_env(),
            rate_limits,
            lockout,
            audit_policy,
            admins: AdminPolicy::from_env(),
            metrics_bind,
        };
        config.validate()?;

        Ok(config)
    }

    /// Validate configuration after loading
    ///
    /// # Returns
    ///
    /// * `Result<(), ConfigError>` - Success or validation error
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.security.jwt_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                var: "JWT_SECRET".to_string(),
                reason: "Must be at least 32 characters (128-bit security)".to_string(),
            });
        }

        if self.rate_limits.auth.window_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_AUTH_WINDOW_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.rate_limits.general.window_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_GENERAL_WINDOW_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.rate_limits.max_identities == 0 {
            return Err(ConfigError::Invalid {
                var: "RATE_LIMIT_MAX_IDENTITIES".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Invalid {
                var: "DB_MIN_CONNECTIONS".to_string(),
                reason: format!(
                    "Cannot exceed DB_MAX_CONNECTIONS ({})",
                    self.database.max_connections
                ),
            });
        }

        Ok(())
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {var}\nHint: {hint}")]
    MissingRequired { var: String, hint: String },

    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a set variable strictly, falling back to `default` only when unset
fn parse_env_required_format<T>(key: &str, default: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
{
    let raw = std::env::var(key).unwrap_or_else(|_| default.to_string());
    raw.trim().parse().map_err(|_| ConfigError::Invalid {
        var: key.to_string(),
        reason: format!("Could not parse {:?}", raw),
    })
}
