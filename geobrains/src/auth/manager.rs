//! Credential verification pipeline.

use super::{
    errors::{AuthError, AuthResult},
    lockout::{LockoutPolicy, LockoutState},
    models::{Account, AccountId, Credentials},
    validation,
};
use crate::audit::{AuditAction, AuditLog};
use crate::db::{AccountRepository, AuditRepository, StorageError};
use crate::identity::ClientContext;
use crate::security::RequestContextStore;
use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::Utc;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Generic failure reason shared by unknown accounts and wrong passwords
pub const REASON_INVALID_CREDENTIALS: &str = "Invalid credentials";
/// Audit reason for malformed input
pub const REASON_INVALID_FORMAT: &str = "Invalid credentials format";
/// Audit reason for unverified accounts
pub const REASON_EMAIL_NOT_VERIFIED: &str = "Email not verified";

/// What to do when an audit write fails mid-login
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuditPolicy {
    /// Fail the login with a storage error
    #[default]
    Strict,
    /// Log the failure and carry on
    BestEffort,
}

impl AuditPolicy {
    /// Read `AUDIT_POLICY`, defaulting to strict
    pub fn from_env() -> AuthResult<Self> {
        match std::env::var("AUDIT_POLICY") {
            Ok(value) => value.parse(),
            Err(_) => Ok(AuditPolicy::default()),
        }
    }
}

impl FromStr for AuditPolicy {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "strict" => Ok(AuditPolicy::Strict),
            "best_effort" | "best-effort" => Ok(AuditPolicy::BestEffort),
            other => Err(AuthError::InvalidConfig(format!(
                "AUDIT_POLICY must be strict or best_effort, got {}",
                other
            ))),
        }
    }
}

impl fmt::Display for AuditPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuditPolicy::Strict => f.write_str("strict"),
            AuditPolicy::BestEffort => f.write_str("best_effort"),
        }
    }
}

/// Authentication manager
///
/// Runs every login attempt through the same sequence: shape check, account
/// lookup, lockout check, verification check, password check, state
/// transition. Each attempt writes exactly one audit event.
#[derive(Clone)]
pub struct AuthManager {
    accounts: Arc<dyn AccountRepository>,
    audit: AuditLog,
    lockout: LockoutPolicy,
    audit_policy: AuditPolicy,
    pepper: String,
    contexts: Option<Arc<RequestContextStore>>,
}

impl AuthManager {
    /// Create a new authentication manager
    ///
    /// # Arguments
    ///
    /// * `accounts` - Account storage
    /// * `audit` - Audit storage
    /// * `pepper` - Server-side pepper for password hashing (may be empty)
    ///
    /// # Returns
    ///
    /// * `AuthManager` - Manager with the default lockout tiers and strict auditing
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        audit: Arc<dyn AuditRepository>,
        pepper: String,
    ) -> Self {
        Self {
            accounts,
            audit: AuditLog::new(audit),
            lockout: LockoutPolicy::default(),
            audit_policy: AuditPolicy::default(),
            pepper,
            contexts: None,
        }
    }

    pub fn with_lockout_policy(mut self, policy: LockoutPolicy) -> Self {
        self.lockout = policy;
        self
    }

    pub fn with_audit_policy(mut self, policy: AuditPolicy) -> Self {
        self.audit_policy = policy;
        self
    }

    /// Consult this store when a caller has only a request id
    pub fn with_context_store(mut self, store: Arc<RequestContextStore>) -> Self {
        self.contexts = Some(store);
        self
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn lockout_policy(&self) -> &LockoutPolicy {
        &self.lockout
    }

    /// Verify credentials.
    ///
    /// # Arguments
    ///
    /// * `credentials` - Email and password as submitted
    /// * `ctx` - Client identity for the audit trail
    ///
    /// # Returns
    ///
    /// * `Ok(Some(account))` - Credentials are valid; lockout fields were reset
    /// * `Ok(None)` - Any other rejection: malformed input, unknown account,
    ///   federated-only account, unverified email or wrong password
    ///
    /// # Errors
    ///
    /// * `AuthError::AccountLocked` - The account is locked; the password was not checked
    /// * `AuthError::Storage` - Storage failed (including audit writes under
    ///   [`AuditPolicy::Strict`])
    pub async fn authorize(
        &self,
        credentials: &Credentials,
        ctx: &ClientContext,
    ) -> AuthResult<Option<Account>> {
        if !validation::is_well_formed(credentials) {
            self.audit(
                None,
                AuditAction::LoginFailed,
                json!({ "reason": REASON_INVALID_FORMAT }),
                ctx,
            )
            .await?;
            return Ok(None);
        }

        let email = credentials.email.trim();
        let account = self.accounts.find_account_by_email(email).await?;

        let (account, password_hash) = match account {
            Some(account) => match account.password_hash.clone() {
                Some(hash) => (account, hash),
                None => return self.reject_unknown(email, &credentials.password, ctx).await,
            },
            None => return self.reject_unknown(email, &credentials.password, ctx).await,
        };

        let now = Utc::now();
        let state = LockoutState::of(&account, now);
        if let LockoutState::Locked { until } = state {
            let retry_after_secs = state.retry_after_secs(now).unwrap_or(0);
            log::warn!(
                "Login attempt for locked account {} (retry after {}s)",
                account.id,
                retry_after_secs
            );
            self.audit(
                Some(account.id),
                AuditAction::AccountLocked,
                json!({
                    "reason": "Account temporarily locked due to too many failed login attempts",
                    "lockedUntil": until,
                    "retryAfterSeconds": retry_after_secs,
                }),
                ctx,
            )
            .await?;
            return Err(AuthError::AccountLocked {
                retry_after_secs,
                locked_until: until,
            });
        }

        if !account.is_email_verified() {
            self.audit(
                Some(account.id),
                AuditAction::LoginFailed,
                json!({ "reason": REASON_EMAIL_NOT_VERIFIED }),
                ctx,
            )
            .await?;
            return Ok(None);
        }

        if self.verify_password(&credentials.password, &password_hash) {
            self.accounts.reset_security_fields(account.id).await?;
            self.audit(
                Some(account.id),
                AuditAction::LoginSuccess,
                json!({ "message": "User logged in successfully" }),
                ctx,
            )
            .await?;
            return Ok(Some(self.refreshed(account).await?));
        }

        let count = self.accounts.increment_failed_attempts(account.id, now).await?;
        let outcome = self.lockout.register_failure(count, now);
        let locked_until = match outcome.locked_until {
            Some(until) => Some(self.accounts.set_lockout(account.id, until).await?),
            None => None,
        };

        if let Some(until) = locked_until {
            log::warn!(
                "Account {} locked until {} after {} failed attempts",
                account.id,
                until,
                count
            );
        }

        self.audit(
            Some(account.id),
            AuditAction::LoginFailed,
            json!({
                "email": email,
                "reason": REASON_INVALID_CREDENTIALS,
                "failedAttemptCount": count,
                "lockedUntil": locked_until,
            }),
            ctx,
        )
        .await?;

        Ok(None)
    }

    /// [`authorize`](Self::authorize) for callers that may only know the
    /// request id.
    ///
    /// The client context is taken from `ctx` if given, else from the
    /// request context store, else it is unknown.
    pub async fn authorize_for_request(
        &self,
        credentials: &Credentials,
        ctx: Option<&ClientContext>,
        request_id: Option<&str>,
    ) -> AuthResult<Option<Account>> {
        let ctx = self.resolve_context(ctx, request_id);
        self.authorize(credentials, &ctx).await
    }

    /// Client context for a request: explicit, stored, or unknown
    pub fn resolve_context(
        &self,
        ctx: Option<&ClientContext>,
        request_id: Option<&str>,
    ) -> ClientContext {
        if let Some(ctx) = ctx {
            return ctx.clone();
        }
        request_id
            .zip(self.contexts.as_ref())
            .and_then(|(id, store)| store.get(id))
            .unwrap_or_default()
    }

    /// Record a login completed by an external identity provider.
    ///
    /// Clears lockout state and writes the same `LOGIN_SUCCESS` event as a
    /// password login, tagged with the provider name.
    pub async fn record_federated_login(
        &self,
        account_id: AccountId,
        provider: &str,
        ctx: &ClientContext,
    ) -> AuthResult<Account> {
        let account = self
            .accounts
            .find_account_by_id(account_id)
            .await?
            .ok_or(StorageError::AccountNotFound(account_id))?;

        self.accounts.reset_security_fields(account_id).await?;
        self.audit(
            Some(account_id),
            AuditAction::LoginSuccess,
            json!({ "message": "User logged in successfully", "provider": provider }),
            ctx,
        )
        .await?;

        self.refreshed(account).await
    }

    /// Hash password with Argon2id + pepper
    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        let peppered = format!("{}{}", password, self.pepper);
        let salt = SaltString::generate(&mut OsRng);
        let argon2 = Argon2::default();

        Ok(argon2
            .hash_password(peppered.as_bytes(), &salt)
            .map_err(|_| AuthError::HashingFailed)?
            .to_string())
    }

    /// Verify password against hash
    fn verify_password(&self, password: &str, hash: &str) -> bool {
        let peppered = format!("{}{}", password, self.pepper);
        let Ok(parsed_hash) = PasswordHash::new(hash) else {
            log::error!("Stored password hash is not a valid PHC string");
            return false;
        };

        Argon2::default()
            .verify_password(peppered.as_bytes(), &parsed_hash)
            .is_ok()
    }

    /// Unknown email or federated-only account: burn the same hashing time
    /// as a real check and log the generic failure shape.
    async fn reject_unknown(
        &self,
        email: &str,
        password: &str,
        ctx: &ClientContext,
    ) -> AuthResult<Option<Account>> {
        if let Some(hash) = dummy_hash() {
            let _ = self.verify_password(password, hash);
        }

        self.audit(
            None,
            AuditAction::LoginFailed,
            json!({
                "email": email,
                "reason": REASON_INVALID_CREDENTIALS,
                "failedAttemptCount": Value::Null,
                "lockedUntil": Value::Null,
            }),
            ctx,
        )
        .await?;

        Ok(None)
    }

    async fn refreshed(&self, account: Account) -> AuthResult<Account> {
        match self.accounts.find_account_by_id(account.id).await? {
            Some(fresh) => Ok(fresh),
            None => Err(StorageError::AccountNotFound(account.id).into()),
        }
    }

    async fn audit(
        &self,
        account_id: Option<AccountId>,
        action: AuditAction,
        metadata: Value,
        ctx: &ClientContext,
    ) -> AuthResult<()> {
        match self.audit_policy {
            AuditPolicy::Strict => {
                if let Err(e) = self.audit.record(account_id, action, metadata, ctx).await {
                    log::error!(
                        "Audit write for {} (account {:?}) failed, rejecting request: {}",
                        action,
                        account_id,
                        e
                    );
                    return Err(e.into());
                }
            }
            AuditPolicy::BestEffort => {
                self.audit
                    .record_best_effort(account_id, action, metadata, ctx)
                    .await;
            }
        }
        Ok(())
    }
}

/// Hash compared against when no account matched, so unknown emails cost the
/// same Argon2 work as real ones.
fn dummy_hash() -> Option<&'static str> {
    static DUMMY: OnceLock<Option<String>> = OnceLock::new();
    DUMMY
        .get_or_init(|| {
            let salt = SaltString::generate(&mut OsRng);
            Argon2::default()
                .hash_password(b"geobrains-timing-equalizer", &salt)
                .map(|hash| hash.to_string())
                .ok()
        })
        .as_deref()
}
