//! Authentication API handlers.
//!
//! Login never tells the client why a sign-in was refused: unknown email,
//! wrong password, unverified email and malformed input all produce the same
//! `401 {"error":"Invalid credentials"}`. Only a locked account is reported
//! differently, with `423 Locked` and the time left.
//!
//! # Examples
//!
//! Login:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/login \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "player@example.com", "password": "Pass123!"}'
//! ```
//!
//! Verify an email address:
//! ```bash
//! curl -X POST http://localhost:8080/api/v1/auth/verify-email \
//!   -H "Content-Type: application/json" \
//!   -d '{"email": "player@example.com", "code": "482913"}'
//! ```

use axum::{
    Extension, Json,
    extract::State,
    http::{HeaderValue, StatusCode, header::RETRY_AFTER},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use geobrains::auth::{
    Account, AccountId, AuthError, Claims, Credentials, REASON_INVALID_CREDENTIALS,
    VerificationError,
};
use serde::{Deserialize, Serialize};

use super::AppState;
use super::client_identity::ClientIdentity;
use crate::logging::log_security_event;
use crate::metrics::{self, LoginOutcome};

#[derive(Debug, Deserialize)]
pub struct VerifyEmailPayload {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
}

#[derive(Debug, Deserialize)]
pub struct ResendCodePayload {
    #[serde(default)]
    pub email: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: &'static str,
    pub account: AccountView,
}

/// Public view of an account
#[derive(Debug, Serialize)]
pub struct AccountView {
    pub id: AccountId,
    pub email: String,
    pub name: Option<String>,
    pub email_verified: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&Account> for AccountView {
    fn from(account: &Account) -> Self {
        Self {
            id: account.id,
            email: account.email.clone(),
            name: account.name.clone(),
            email_verified: account.is_email_verified(),
            created_at: account.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_secs: Option<u64>,
}

/// Error response with an optional `Retry-After` header
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, error: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: error.into(),
                retry_after_secs: None,
            },
        }
    }

    fn with_retry_after(mut self, secs: u64) -> Self {
        self.body.retry_after_secs = Some(secs);
        self
    }

    pub fn internal() -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let retry_after = self.body.retry_after_secs;
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = retry_after {
            response
                .headers_mut()
                .insert(RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::AccountLocked {
                retry_after_secs, ..
            } => ApiError::new(StatusCode::LOCKED, err.client_message())
                .with_retry_after(retry_after_secs),
            AuthError::Token(_) => ApiError::new(StatusCode::UNAUTHORIZED, err.client_message()),
            _ => {
                tracing::error!("Authentication failure: {}", err);
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, err.client_message())
            }
        }
    }
}

impl From<VerificationError> for ApiError {
    fn from(err: VerificationError) -> Self {
        let status = match &err {
            VerificationError::TokenNotFound
            | VerificationError::InvalidCode
            | VerificationError::CodeExpired => StatusCode::BAD_REQUEST,
            VerificationError::AccountNotFound => StatusCode::NOT_FOUND,
            VerificationError::AlreadyVerified => StatusCode::CONFLICT,
            VerificationError::ResendCooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
            VerificationError::Storage(_) | VerificationError::Mail(_) => {
                tracing::error!("Verification failure: {}", err);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        let api_error = ApiError::new(status, err.client_message());
        match err {
            VerificationError::ResendCooldown { minutes_left } => {
                api_error.with_retry_after(minutes_left.max(0) as u64 * 60)
            }
            _ => api_error,
        }
    }
}

/// Sign in with email and password.
///
/// # Request Body
///
/// ```json
/// { "email": "player@example.com", "password": "SecurePass123!" }
/// ```
///
/// # Response
///
/// - `200 OK` with a bearer token and the account
/// - `401 Unauthorized` with `{"error":"Invalid credentials"}` for every rejection
/// - `423 Locked` with `retry_after_secs` while the account is locked
/// - `500 Internal Server Error` when storage fails
pub async fn login(
    State(state): State<AppState>,
    ClientIdentity(ctx): ClientIdentity,
    Json(credentials): Json<Credentials>,
) -> Result<Json<LoginResponse>, ApiError> {
    let outcome = state.auth.authorize(&credentials, &ctx).await;

    match outcome {
        Ok(Some(account)) => {
            let access_token = state.sessions.issue(&account)?;
            metrics::login_attempts_total(LoginOutcome::Success);
            tracing::info!(account_id = account.id, ip = %ctx.ip, "Login succeeded");

            Ok(Json(LoginResponse {
                access_token,
                token_type: "Bearer",
                account: AccountView::from(&account),
            }))
        }
        Ok(None) => {
            metrics::login_attempts_total(LoginOutcome::Rejected);
            Err(ApiError::new(
                StatusCode::UNAUTHORIZED,
                REASON_INVALID_CREDENTIALS,
            ))
        }
        Err(err @ AuthError::AccountLocked { .. }) => {
            metrics::login_attempts_total(LoginOutcome::Locked);
            metrics::lockout_rejections_total();
            log_security_event(
                "locked_account_login",
                None,
                Some(&ctx.ip),
                "Login attempt against a locked account",
            );
            Err(err.into())
        }
        Err(err) => {
            metrics::login_attempts_total(LoginOutcome::Error);
            Err(err.into())
        }
    }
}

/// Submit an email verification code.
pub async fn verify_email(
    State(state): State<AppState>,
    Json(payload): Json<VerifyEmailPayload>,
) -> Result<Json<MessageResponse>, ApiError> {
    match state.verifier.verify(&payload.email, &payload.code).await {
        Ok(account) => {
            metrics::email_verifications_total(true);
            tracing::info!(account_id = account.id, "Email verified");
            Ok(Json(MessageResponse {
                message: "Email verified".to_string(),
            }))
        }
        Err(err) => {
            metrics::email_verifications_total(false);
            Err(err.into())
        }
    }
}

/// Request a fresh verification code.
///
/// The code is only ever sent by email, never in the response.
pub async fn resend_code(
    State(state): State<AppState>,
    Json(payload): Json<ResendCodePayload>,
) -> Result<Json<MessageResponse>, ApiError> {
    state.verifier.resend(&payload.email).await?;

    Ok(Json(MessageResponse {
        message: "Verification code sent".to_string(),
    }))
}

/// Current account for the bearer token.
pub async fn me(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<AccountView>, ApiError> {
    let account = state
        .accounts
        .find_account_by_id(claims.sub)
        .await
        .map_err(|e| {
            tracing::error!("Account lookup failed: {}", e);
            ApiError::internal()
        })?
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authentication failed"))?;

    Ok(Json(AccountView::from(&account)))
}
