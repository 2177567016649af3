//! Email Authorization Validator
//!
//! Builds the `email -> bool` authorization predicate from the configured
//! domain list. The predicate is consulted by the authenticator and the
//! OAuth2 callback; an email that fails it is treated as an unauthorized
//! account, never as a transport error.

use std::sync::Arc;

/// Shared authorization predicate over canonical email addresses.
pub type Validator = Arc<dyn Fn(&str) -> bool + Send + Sync>;

/// Builds a validator from configured email domains.
///
/// A single `*` entry authorizes any non-empty email. Other entries match
/// case-insensitively against the address suffix, so `example.com` admits
/// `user@example.com` and `user@mail.example.com` stays rejected unless
/// listed itself.
pub fn new_validator(email_domains: &[String]) -> Validator {
    if email_domains.iter().any(|domain| domain == "*") {
        return Arc::new(|email: &str| !email.is_empty());
    }

    let suffixes: Vec<String> = email_domains
        .iter()
        .map(|domain| format!("@{}", domain.trim_start_matches('@').to_ascii_lowercase()))
        .collect();

    Arc::new(move |email: &str| {
        if email.is_empty() {
            return false;
        }
        let lowered = email.to_ascii_lowercase();
        suffixes.iter().any(|suffix| lowered.ends_with(suffix))
    })
}
