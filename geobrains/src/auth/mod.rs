//! Authentication module: credential verification with progressive lockout.
//!
//! This module implements:
//! - Argon2id password verification with an optional server-side pepper
//! - Progressive lockout (5, 15, 30 and 60 minutes, then a day)
//! - One audit event per login attempt
//! - Email verification codes
//! - JWT access tokens (15-minute expiry)
//!
//! ## Example
//!
//! ```no_run
//! use geobrains::auth::{AuthManager, Credentials};
//! use geobrains::db::{Database, DatabaseConfig};
//! use geobrains::identity::ClientContext;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&DatabaseConfig::from_env()).await?;
//!     let store = Arc::new(db.store());
//!     let auth = AuthManager::new(store.clone(), store, "secret_pepper".to_string());
//!
//!     let credentials = Credentials::new("player@example.com", "SecurePass123!");
//!     let ctx = ClientContext::new("203.0.113.7", "Mozilla/5.0");
//!
//!     match auth.authorize(&credentials, &ctx).await? {
//!         Some(account) => println!("Signed in as {}", account.email),
//!         None => println!("Invalid credentials"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod admin;
pub mod errors;
pub mod lockout;
pub mod manager;
pub mod models;
pub mod session;
pub mod validation;
pub mod verification;

pub use admin::AdminPolicy;
pub use errors::{AuthError, AuthResult, lockout_message};
pub use lockout::{
    DEFAULT_LOCKOUT_THRESHOLD, FailureOutcome, LockoutPolicy, LockoutState, LockoutTier,
};
pub use manager::{
    AuditPolicy, AuthManager, REASON_EMAIL_NOT_VERIFIED, REASON_INVALID_CREDENTIALS,
    REASON_INVALID_FORMAT,
};
pub use models::{Account, AccountId, Credentials, NewAccount, VerificationToken};
pub use session::{Claims, SessionIssuer};
pub use verification::{
    EmailVerifier, LogMailer, MailError, Mailer, VERIFICATION_SUBJECT, VerificationError,
    VerificationResult,
};
