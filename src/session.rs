//! Session State and Cookie Serialization
//!
//! [`SessionState`] is the authenticated principal for one browser. It lives
//! only for the duration of a request unless serialized into the sealed
//! session cookie; there is no server-side session table.
//!
//! # Serialized Forms
//! - `email user` (or just `email`) when no token material is persisted
//! - `email user|access_token|expires_on|refresh_token` otherwise, with the
//!   two token fields individually encrypted when a cipher is configured
//!
//! Empty fields stay present-but-empty so the decoder can restore them as
//! empty strings. `expires_on` is unix seconds.

use crate::security::cookie::SessionCipher;
use chrono::{DateTime, Utc};
use std::fmt;

/// Browsers cap cookies around 4 KiB; larger sessions still get emitted but
/// are likely to be truncated client-side.
const COOKIE_SIZE_WARNING: usize = 4096;

/// The authenticated principal carried by one browser session.
///
/// At least one of `user` or `email` is non-empty for an authenticated
/// session. `email` is authoritative for authorization decisions; `user` is
/// the fallback identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub user: String,
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    pub expires_on: Option<DateTime<Utc>>,
}

impl SessionState {
    /// The identity used for headers and authorization: email, falling back
    /// to the provider account name.
    pub fn identity(&self) -> &str {
        if self.email.is_empty() {
            &self.user
        } else {
            &self.email
        }
    }

    /// Whether the access token has passed its provider-supplied expiry.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.expires_on {
            Some(expires_on) => expires_on < now,
            None => false,
        }
    }

    fn account_info(&self) -> String {
        if self.user.is_empty() {
            self.email.clone()
        } else {
            format!("{} {}", self.email, self.user)
        }
    }

    fn parse_account_info(chunk: &str) -> (String, String) {
        match chunk.split_once(' ') {
            Some((email, user)) => (email.to_string(), user.to_string()),
            None => (chunk.to_string(), String::new()),
        }
    }

    /// Serializes the session for the cookie payload.
    ///
    /// Token fields are passed through `cipher` when one is configured. The
    /// result is emitted even above the 4 KiB cookie ceiling, with a warning.
    pub fn encode(&self, cipher: Option<&SessionCipher>) -> Result<String, String> {
        let encoded = if self.access_token.is_empty() && self.refresh_token.is_empty() {
            self.account_info()
        } else {
            let access_token = encode_field(&self.access_token, cipher)?;
            let refresh_token = encode_field(&self.refresh_token, cipher)?;
            let expires_on = self
                .expires_on
                .map(|ts| ts.timestamp().to_string())
                .unwrap_or_default();
            format!(
                "{}|{}|{}|{}",
                self.account_info(),
                access_token,
                expires_on,
                refresh_token
            )
        };

        if encoded.len() > COOKIE_SIZE_WARNING {
            tracing::warn!(
                size = encoded.len(),
                "Session cookie payload exceeds 4 KiB; browsers may drop it"
            );
        }
        Ok(encoded)
    }

    /// Restores a session from a cookie payload, field by field.
    ///
    /// Missing fields yield empty strings. A malformed chunk count or an
    /// unparsable `expires_on` is an invalid session.
    pub fn decode(value: &str, cipher: Option<&SessionCipher>) -> Result<SessionState, String> {
        let chunks: Vec<&str> = value.split('|').collect();
        let (email, user) = Self::parse_account_info(chunks[0]);

        match chunks.len() {
            1 => Ok(SessionState {
                user,
                email,
                ..SessionState::default()
            }),
            4 => {
                let access_token = decode_field(chunks[1], cipher)?;
                let expires_on = if chunks[2].is_empty() {
                    None
                } else {
                    let seconds: i64 = chunks[2]
                        .parse()
                        .map_err(|_| format!("invalid session expiry '{}'", chunks[2]))?;
                    Some(
                        DateTime::<Utc>::from_timestamp(seconds, 0)
                            .ok_or_else(|| format!("invalid session expiry '{}'", chunks[2]))?,
                    )
                };
                let refresh_token = decode_field(chunks[3], cipher)?;
                Ok(SessionState {
                    user,
                    email,
                    access_token,
                    refresh_token,
                    expires_on,
                })
            }
            n => Err(format!("invalid session payload with {} fields", n)),
        }
    }
}

fn encode_field(value: &str, cipher: Option<&SessionCipher>) -> Result<String, String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    match cipher {
        Some(cipher) => cipher.encrypt(value),
        None => Ok(value.to_string()),
    }
}

fn decode_field(value: &str, cipher: Option<&SessionCipher>) -> Result<String, String> {
    if value.is_empty() {
        return Ok(String::new());
    }
    match cipher {
        Some(cipher) => cipher.decrypt(value),
        None => Ok(value.to_string()),
    }
}

impl fmt::Display for SessionState {
    /// Renders the session for logs with token material redacted.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Session{{email:{} user:{}", self.email, self.user)?;
        if !self.access_token.is_empty() {
            write!(f, " token:true")?;
        }
        if let Some(expires_on) = self.expires_on {
            write!(f, " expires:{}", expires_on.to_rfc3339())?;
        }
        if !self.refresh_token.is_empty() {
            write!(f, " refresh:true")?;
        }
        write!(f, "}}")
    }
}
