//! JWT access tokens for authorized accounts.

use super::errors::{AuthError, AuthResult};
use super::models::{Account, AccountId};
use chrono::{Duration, Utc};
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Minimum accepted signing secret length
pub const MIN_SECRET_LEN: usize = 32;

/// JWT claims for access token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    pub sub: AccountId,
    pub email: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 access tokens
#[derive(Clone)]
pub struct SessionIssuer {
    jwt_secret: String,
    access_token_duration: Duration,
}

impl SessionIssuer {
    /// # Errors
    ///
    /// * `AuthError::InvalidConfig` - Secret shorter than [`MIN_SECRET_LEN`]
    pub fn new(jwt_secret: String) -> AuthResult<Self> {
        if jwt_secret.len() < MIN_SECRET_LEN {
            return Err(AuthError::InvalidConfig(format!(
                "JWT secret must be at least {} characters",
                MIN_SECRET_LEN
            )));
        }
        Ok(Self {
            jwt_secret,
            access_token_duration: Duration::minutes(15),
        })
    }

    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.access_token_duration = duration;
        self
    }

    /// Generate JWT access token
    pub fn issue(&self, account: &Account) -> AuthResult<String> {
        let now = Utc::now();
        let claims = Claims {
            sub: account.id,
            email: account.email.clone(),
            iat: now.timestamp(),
            exp: (now + self.access_token_duration).timestamp(),
        };

        Ok(encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )?)
    }

    /// Verify and decode access token
    pub fn verify(&self, token: &str) -> AuthResult<Claims> {
        let token_data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;

        Ok(token_data.claims)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "an-hs256-secret-that-is-long-enough";

    fn account() -> Account {
        Account {
            id: 42,
            email: "player@example.com".to_string(),
            name: None,
            password_hash: None,
            email_verified_at: Some(Utc::now()),
            failed_attempt_count: 0,
            last_failed_at: None,
            locked_until: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_issue_and_verify() {
        let issuer = SessionIssuer::new(SECRET.to_string()).unwrap();
        let token = issuer.issue(&account()).unwrap();

        let claims = issuer.verify(&token).unwrap();
        assert_eq!(claims.sub, 42);
        assert_eq!(claims.email, "player@example.com");
        assert_eq!(claims.exp - claims.iat, 15 * 60);
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let issuer = SessionIssuer::new(SECRET.to_string()).unwrap();
        let other = SessionIssuer::new(format!("{}-rotated", SECRET)).unwrap();
        let token = issuer.issue(&account()).unwrap();

        assert!(matches!(other.verify(&token), Err(AuthError::Token(_))));
    }

    #[test]
    fn test_expired_token_rejected() {
        let issuer = SessionIssuer::new(SECRET.to_string())
            .unwrap()
            .with_duration(Duration::minutes(-10));
        let token = issuer.issue(&account()).unwrap();

        assert!(issuer.verify(&token).is_err());
    }

    #[test]
    fn test_short_secret_rejected() {
        assert!(matches!(
            SessionIssuer::new("short".to_string()),
            Err(AuthError::InvalidConfig(_))
        ));
    }
}
