//! Admin allow-list.

use super::models::Account;
use std::collections::HashSet;

/// Decides whether an account may use the admin surface
#[derive(Debug, Clone, Default)]
pub struct AdminPolicy {
    emails: HashSet<String>,
}

impl AdminPolicy {
    pub fn from_emails<I, S>(emails: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            emails: emails
                .into_iter()
                .map(|email| email.as_ref().trim().to_ascii_lowercase())
                .filter(|email| !email.is_empty())
                .collect(),
        }
    }

    /// Parse a comma-separated list, as found in `ADMIN_EMAILS`
    pub fn from_list(list: &str) -> Self {
        Self::from_emails(list.split(','))
    }

    pub fn from_env() -> Self {
        Self::from_list(&std::env::var("ADMIN_EMAILS").unwrap_or_default())
    }

    /// Allow-listed email and verified account
    pub fn is_authorized(&self, account: &Account) -> bool {
        account.is_email_verified() && self.emails.contains(&account.email.to_ascii_lowercase())
    }

    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }
}
