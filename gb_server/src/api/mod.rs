//! HTTP API for the authentication server.
//!
//! # Architecture
//!
//! The API is built with:
//! - **Axum**: Async web framework for HTTP
//! - **Tower**: Middleware for CORS, request ids, client identity and rate limits
//! - **JWT**: Short-lived bearer tokens issued on successful login
//!
//! # Modules
//!
//! - [`auth`]: Login, email verification and the current account
//! - [`admin`]: Admin-only endpoints
//! - [`middleware`]: Session and admin guards
//! - [`client_identity`]: Client IP and user agent resolution
//! - [`rate_limit`]: Per-client sliding window limits
//! - [`request_id`]: Request id propagation
//!
//! # Endpoints Overview
//!
//! ```text
//! GET  /health                      - Health check (public)
//! POST /api/v1/auth/login           - Login (auth rate limit)
//! POST /api/v1/auth/verify-email    - Submit a verification code (auth rate limit)
//! POST /api/v1/auth/resend-code     - Request a new code (auth rate limit)
//! GET  /api/v1/auth/me              - Current account (bearer token)
//! GET  /api/v1/admin/check          - Admin guard check (bearer token, admin)
//! ```
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gb_server::api::{AppState, Backend, create_router};
//! use gb_server::config::ServerConfig;
//! use geobrains::auth::LogMailer;
//! use geobrains::db::MemoryStore;
//! use std::sync::Arc;
//! # async fn example() -> anyhow::Result<()> {
//!
//! let config = ServerConfig::from_env(None, None)?;
//! let state = AppState::new(
//!     &config,
//!     Backend::Memory(Arc::new(MemoryStore::new())),
//!     Arc::new(LogMailer),
//! )?;
//!
//! let app = create_router(state);
//! let listener = tokio::net::TcpListener::bind(config.bind).await?;
//! axum::serve(listener, app).await?;
//! # Ok(())
//! # }
//! ```

pub mod admin;
pub mod auth;
pub mod client_identity;
pub mod middleware;
pub mod rate_limit;
pub mod request_id;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    middleware::{from_fn, from_fn_with_state},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use geobrains::auth::{AdminPolicy, AuthManager, EmailVerifier, Mailer, SessionIssuer};
use geobrains::db::{
    AccountRepository, AuditRepository, Database, MemoryStore, VerificationTokenRepository,
};
use geobrains::identity::TrustConfig;
use geobrains::security::{RateLimiter, RequestContextStore};
use serde_json::json;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;

/// Where accounts, audit events and verification tokens live
pub enum Backend {
    Postgres(Database),
    Memory(Arc<MemoryStore>),
}

/// Application state shared across all HTTP handlers.
///
/// Cloned for each request (cheap due to Arc wrappers).
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthManager>,
    pub verifier: Arc<EmailVerifier>,
    pub sessions: Arc<SessionIssuer>,
    pub admins: Arc<AdminPolicy>,
    pub accounts: Arc<dyn AccountRepository>,
    pub limiter: Arc<RateLimiter>,
    pub contexts: Arc<RequestContextStore>,
    pub trust: TrustConfig,
    /// `None` for the in-memory backend
    pub database: Option<Database>,
}

impl AppState {
    /// Wire the security components from configuration.
    ///
    /// # Errors
    ///
    /// Fails if the rate limiter or session issuer rejects its configuration.
    pub fn new(
        config: &ServerConfig,
        backend: Backend,
        mailer: Arc<dyn Mailer>,
    ) -> anyhow::Result<Self> {
        let (accounts, audit, tokens, database) = match backend {
            Backend::Postgres(db) => {
                let store = Arc::new(db.store());
                (
                    store.clone() as Arc<dyn AccountRepository>,
                    store.clone() as Arc<dyn AuditRepository>,
                    store as Arc<dyn VerificationTokenRepository>,
                    Some(db),
                )
            }
            Backend::Memory(store) => (
                store.clone() as Arc<dyn AccountRepository>,
                store.clone() as Arc<dyn AuditRepository>,
                store as Arc<dyn VerificationTokenRepository>,
                None,
            ),
        };

        let contexts = Arc::new(RequestContextStore::default());
        let auth = AuthManager::new(
            accounts.clone(),
            audit,
            config.security.password_pepper.clone(),
        )
        .with_lockout_policy(config.lockout.clone())
        .with_audit_policy(config.audit_policy)
        .with_context_store(contexts.clone());

        let limiter = RateLimiter::new(
            config.rate_limits.auth.clone(),
            config.rate_limits.general.clone(),
            config.rate_limits.max_identities,
        )?;
        let sessions = SessionIssuer::new(config.security.jwt_secret.clone())?;

        Ok(Self {
            auth: Arc::new(auth),
            verifier: Arc::new(EmailVerifier::new(accounts.clone(), tokens, mailer)),
            sessions: Arc::new(sessions),
            admins: Arc::new(config.admins.clone()),
            accounts,
            limiter: Arc::new(limiter),
            contexts,
            trust: config.trust,
            database,
        })
    }
}

/// Create the complete API router with all endpoints and middleware.
///
/// Layers run outside-in: CORS, request id, client identity, then the
/// per-route rate limit and guards.
pub fn create_router(state: AppState) -> Router {
    let v1_routes = create_v1_router(state.clone());

    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", v1_routes)
        .layer(from_fn_with_state(
            state.clone(),
            client_identity::client_identity_middleware,
        ))
        .layer(from_fn(request_id::request_id_middleware))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

fn create_v1_router(state: AppState) -> Router<AppState> {
    // Credential handling routes share the tight auth limit
    let credential_routes = Router::new()
        .route("/auth/login", post(auth::login))
        .route("/auth/verify-email", post(auth::verify_email))
        .route("/auth/resend-code", post(auth::resend_code))
        .route_layer(from_fn_with_state(state.clone(), rate_limit::auth_rate_limit));

    let session_routes = Router::new()
        .route("/auth/me", get(auth::me))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_session));

    let admin_routes = Router::new()
        .route("/admin/check", get(admin::check))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_admin))
        .route_layer(from_fn_with_state(state.clone(), middleware::require_session));

    let general_routes = session_routes
        .merge(admin_routes)
        .route_layer(from_fn_with_state(state, rate_limit::general_rate_limit));

    Router::new().merge(credential_routes).merge(general_routes)
}

/// Health check endpoint for monitoring and load balancers.
///
/// # Response
///
/// Returns `200 OK` if storage is reachable, or `503 Service Unavailable`.
async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let (storage, healthy) = match &state.database {
        Some(db) => ("postgres", db.health_check().await.is_ok()),
        None => ("memory", true),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let response = json!({
        "status": if healthy { "healthy" } else { "unhealthy" },
        "version": env!("CARGO_PKG_VERSION"),
        "storage": storage,
        "rate_limiter": {
            "tracked_identities": state.limiter.tracked_identities(),
        },
        "timestamp": chrono::Utc::now().to_rfc3339(),
    });

    (status_code, Json(response))
}
