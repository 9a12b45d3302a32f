//! Credential shape checks.

use super::models::Credentials;

const MAX_EMAIL_LEN: usize = 254;
const MAX_LOCAL_LEN: usize = 64;

/// Whether `email` looks like a deliverable address.
///
/// Syntactic only: one `@`, a non-empty local part without whitespace, and a
/// dotted domain whose labels are alphanumeric or inner hyphens.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > MAX_EMAIL_LEN {
        return false;
    }

    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };

    if local.is_empty()
        || local.len() > MAX_LOCAL_LEN
        || local.starts_with('.')
        || local.ends_with('.')
        || local.contains("..")
        || local
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '@' | '<' | '>' | ',' | ';' | '"'))
    {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() < 2 {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Whether credentials are worth checking against storage
pub fn is_well_formed(credentials: &Credentials) -> bool {
    is_valid_email(credentials.email.trim()) && !credentials.password.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_emails() {
        for email in [
            "player@example.com",
            "first.last+quiz@sub.example.co.uk",
            "a@b.co",
            "x_y-z@geo-brains.io",
        ] {
            assert!(is_valid_email(email), "{} should be valid", email);
        }
    }

    #[test]
    fn test_invalid_emails() {
        for email in [
            "",
            "plainaddress",
            "@example.com",
            "user@",
            "user@localhost",
            "user@@example.com",
            "user@exa mple.com",
            "us er@example.com",
            ".user@example.com",
            "user.@example.com",
            "us..er@example.com",
            "user@-example.com",
            "user@example..com",
            "user@example.com.",
        ] {
            assert!(!is_valid_email(email), "{} should be invalid", email);
        }
    }

    #[test]
    fn test_overlong_email_rejected() {
        let email = format!("{}@example.com", "a".repeat(65));
        assert!(!is_valid_email(&email));
    }

    #[test]
    fn test_well_formed_credentials() {
        assert!(is_well_formed(&Credentials::new(" player@example.com ", "x")));
        assert!(!is_well_formed(&Credentials::new("player@example.com", "")));
        assert!(!is_well_formed(&Credentials::new("player", "password")));
    }
}
