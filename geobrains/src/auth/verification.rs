//! Email verification codes.
//!
//! A 6-digit code is mailed to the account's address and expires after ten
//! minutes. Issuing a new code replaces the previous one, and a resend is
//! refused until the previous code's cooldown has run out.

use super::models::{Account, VerificationToken};
use crate::db::{AccountRepository, StorageError, VerificationTokenRepository};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use rand::Rng;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Subject line of verification emails
pub const VERIFICATION_SUBJECT: &str = "Verify your GeoBrains email";

/// Outbound mail failure
#[derive(Debug, Error)]
#[error("Failed to send email: {0}")]
pub struct MailError(pub String);

/// Outbound email channel
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError>;
}

/// Mailer that writes messages to the log instead of sending them
#[derive(Debug, Clone, Copy, Default)]
pub struct LogMailer;

#[async_trait]
impl Mailer for LogMailer {
    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<(), MailError> {
        log::info!("Email to {} ({}): {}", to, subject, body);
        Ok(())
    }
}

/// Verification errors
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("Token not found!")]
    TokenNotFound,

    #[error("Invalid code!")]
    InvalidCode,

    #[error("Code has expired!")]
    CodeExpired,

    #[error("Email does not exist!")]
    AccountNotFound,

    #[error("Email already verified!")]
    AlreadyVerified,

    #[error("Please wait {minutes_left} minutes before resending.")]
    ResendCooldown { minutes_left: i64 },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Mail(#[from] MailError),
}

impl VerificationError {
    /// Message safe to show the client
    pub fn client_message(&self) -> String {
        match self {
            VerificationError::Storage(_) => "Internal server error".to_string(),
            VerificationError::Mail(_) => "Could not send verification email".to_string(),
            _ => self.to_string(),
        }
    }
}

/// Result type for verification operations
pub type VerificationResult<T> = Result<T, VerificationError>;

/// Issues, checks and resends verification codes
#[derive(Clone)]
pub struct EmailVerifier {
    accounts: Arc<dyn AccountRepository>,
    tokens: Arc<dyn VerificationTokenRepository>,
    mailer: Arc<dyn Mailer>,
    token_ttl: Duration,
    resend_cooldown: Duration,
}

impl EmailVerifier {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        tokens: Arc<dyn VerificationTokenRepository>,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            accounts,
            tokens,
            mailer,
            token_ttl: Duration::minutes(10),
            resend_cooldown: Duration::minutes(10),
        }
    }

    /// Create a fresh code for `email`, replacing any previous one, and mail it.
    ///
    /// # Errors
    ///
    /// * `VerificationError::Storage` - The token could not be stored
    /// * `VerificationError::Mail` - The token was stored but mailing failed
    pub async fn issue(&self, email: &str) -> VerificationResult<VerificationToken> {
        let email = email.trim();
        let code = generate_code();
        let token = self
            .tokens
            .create_verification_token(email, &code, Utc::now() + self.token_ttl)
            .await?;

        self.mailer
            .send(email, VERIFICATION_SUBJECT, &verification_body(&token.code))
            .await?;

        Ok(token)
    }

    /// Check a submitted code and mark the account verified.
    ///
    /// The token is consumed on success.
    pub async fn verify(&self, email: &str, code: &str) -> VerificationResult<Account> {
        let email = email.trim();
        let token = self
            .tokens
            .find_live_verification_token(email)
            .await?
            .ok_or(VerificationError::TokenNotFound)?;

        if !bool::from(token.code.as_bytes().ct_eq(code.trim().as_bytes())) {
            return Err(VerificationError::InvalidCode);
        }

        let now = Utc::now();
        if token.is_expired(now) {
            return Err(VerificationError::CodeExpired);
        }

        let account = self
            .accounts
            .find_account_by_email(&token.email)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;

        self.accounts.mark_email_verified(account.id, now).await?;
        self.tokens.delete_verification_token(&token).await?;

        let account = self
            .accounts
            .find_account_by_id(account.id)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;
        log::info!("Email verified for account {}", account.id);
        Ok(account)
    }

    /// Issue a new code for an unverified account, subject to the cooldown.
    ///
    /// # Errors
    ///
    /// * `VerificationError::AccountNotFound` - No account with this email
    /// * `VerificationError::AlreadyVerified` - Nothing to verify
    /// * `VerificationError::ResendCooldown` - The current code is too recent
    pub async fn resend(&self, email: &str) -> VerificationResult<VerificationToken> {
        let email = email.trim();
        let account = self
            .accounts
            .find_account_by_email(email)
            .await?
            .ok_or(VerificationError::AccountNotFound)?;

        if account.is_email_verified() {
            return Err(VerificationError::AlreadyVerified);
        }

        if let Some(existing) = self.tokens.find_live_verification_token(email).await? {
            let issued_at = existing.expires_at - self.token_ttl;
            let elapsed = Utc::now() - issued_at;
            if elapsed < self.resend_cooldown {
                let remaining_ms = (self.resend_cooldown - elapsed).num_milliseconds();
                return Err(VerificationError::ResendCooldown {
                    minutes_left: (remaining_ms + 59_999) / 60_000,
                });
            }
        }

        self.issue(email).await
    }
}

/// Random code in 100000..=999999
pub fn generate_code() -> String {
    rand::rng().random_range(100_000..1_000_000u32).to_string()
}

fn verification_body(code: &str) -> String {
    format!(
        "Thanks for starting the registration process. Here is your verification code: {}\n\n\
         This code will expire in 10 minutes.\n\n\
         If you didn't ask to verify this address, you can ignore this email.",
        code
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_codes_are_six_digits() {
        for _ in 0..1_000 {
            let code = generate_code();
            assert_eq!(code.len(), 6);
            assert!(code.chars().all(|c| c.is_ascii_digit()));
            assert!(!code.starts_with('0'));
        }
    }

    #[test]
    fn test_body_contains_code() {
        assert!(verification_body("493021").contains("493021"));
    }

    #[test]
    fn test_client_messages() {
        assert_eq!(
            VerificationError::ResendCooldown { minutes_left: 3 }.client_message(),
            "Please wait 3 minutes before resending."
        );
        assert_eq!(
            VerificationError::Storage(StorageError::Unavailable("down".into())).client_message(),
            "Internal server error"
        );
    }
}
