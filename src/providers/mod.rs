//! Identity Provider Contract
//!
//! The proxy talks to its identity provider through the [`Provider`] trait.
//! Concrete providers embed a shared [`ProviderData`] describing the endpoint
//! set and override only the capabilities their provider family needs; the
//! defaults implement the common OAuth2 relying-party behavior.
//!
//! Session cookie serialization is routed through the provider so families
//! with provider-specific session material can override it; the defaults
//! delegate to [`crate::session::SessionState`].

pub mod oidc;

use crate::security::cookie::SessionCipher;
use crate::session::SessionState;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use url::Url;

/// Endpoint set and client credentials shared by all provider families.
#[derive(Debug, Clone)]
pub struct ProviderData {
    pub name: String,
    pub login_url: Option<Url>,
    pub redeem_url: Option<Url>,
    pub profile_url: Option<Url>,
    pub validate_url: Option<Url>,
    pub jwks_url: Option<Url>,
    pub scope: String,
    pub client_id: String,
    pub client_secret: String,
    pub approval_prompt: String,
}

impl ProviderData {
    /// Builds provider data from configuration, parsing the endpoint URLs.
    pub fn from_config(config: &crate::config::ProxyConfig) -> Result<Self, String> {
        let parse = |key: &str, value: &str| -> Result<Option<Url>, String> {
            if value.is_empty() {
                return Ok(None);
            }
            Url::parse(value)
                .map(Some)
                .map_err(|e| format!("invalid {} '{}': {}", key, value, e))
        };

        Ok(ProviderData {
            name: config.provider_name.clone(),
            login_url: parse("LOGIN_URL", &config.login_url)?,
            redeem_url: parse("REDEEM_URL", &config.redeem_url)?,
            profile_url: parse("PROFILE_URL", &config.profile_url)?,
            validate_url: parse("VALIDATE_URL", &config.validate_url)?,
            jwks_url: parse("JWKS_URL", &config.jwks_url)?,
            scope: config.scope.clone(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            approval_prompt: config.approval_prompt.clone(),
        })
    }
}

/// Capability set of an identity provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// The provider's endpoint set and client credentials.
    fn data(&self) -> &ProviderData;

    /// Constructs the browser redirect for the start of the OAuth2 dance.
    fn login_url(&self, redirect_uri: &str, state: &str) -> Result<Url> {
        let data = self.data();
        let mut url = data
            .login_url
            .clone()
            .ok_or_else(|| anyhow!("provider has no login URL configured"))?;
        url.query_pairs_mut()
            .append_pair("redirect_uri", redirect_uri)
            .append_pair("approval_prompt", &data.approval_prompt)
            .append_pair("scope", &data.scope)
            .append_pair("client_id", &data.client_id)
            .append_pair("response_type", "code")
            .append_pair("state", state);
        Ok(url)
    }

    /// Exchanges an authorization code for a token-bearing session.
    async fn redeem(&self, redirect_uri: &str, code: &str) -> Result<SessionState>;

    /// Resolves the user-identifying email for a session.
    async fn email_address(&self, session: &SessionState) -> Result<String>;

    /// Authorization hook for group or organization membership.
    async fn validate_group(&self, _email: &str) -> bool {
        true
    }

    /// Checks whether the session's access token is still live at the
    /// provider. With no validate URL configured the token is assumed good.
    async fn validate_session(&self, session: &SessionState) -> bool;

    /// Renews the access token when it is due.
    ///
    /// Returns `Ok(false)` when no renewal was needed, `Ok(true)` when the
    /// session was refreshed in place, and an error when renewal failed.
    async fn refresh_if_needed(&self, _session: &mut SessionState) -> Result<bool> {
        Ok(false)
    }

    /// Restores a session from a cookie payload.
    fn session_from_cookie(
        &self,
        value: &str,
        cipher: Option<&SessionCipher>,
    ) -> Result<SessionState, String> {
        SessionState::decode(value, cipher)
    }

    /// Serializes a session into a cookie payload.
    fn cookie_for_session(
        &self,
        session: &SessionState,
        cipher: Option<&SessionCipher>,
    ) -> Result<String, String> {
        session.encode(cipher)
    }
}

/// Token endpoint response for code redemption and refresh grants.
#[derive(Debug, serde::Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub id_token: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

impl TokenResponse {
    /// Converts `expires_in` seconds into an absolute expiry.
    pub fn expires_on(&self) -> Option<chrono::DateTime<Utc>> {
        self.expires_in
            .map(|seconds| Utc::now() + chrono::Duration::seconds(seconds))
    }
}

/// Pings a validate endpoint with the session's access token.
///
/// Shared by provider families whose validate endpoint accepts the token as
/// a query parameter, mirroring the common `tokeninfo` shape.
pub async fn validate_token(
    client: &reqwest::Client,
    validate_url: Option<&Url>,
    access_token: &str,
) -> bool {
    let Some(validate_url) = validate_url else {
        return true;
    };
    if access_token.is_empty() {
        return false;
    }

    let mut url = validate_url.clone();
    url.query_pairs_mut().append_pair("access_token", access_token);

    match client
        .get(url)
        .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", access_token))
        .send()
        .await
    {
        Ok(response) if response.status().is_success() => true,
        Ok(response) => {
            tracing::info!(status = %response.status(), "Access token failed validation");
            false
        }
        Err(err) => {
            tracing::warn!("Token validation request failed: {}", err);
            false
        }
    }
}

/// Extracts the `email` claim from a JWT without verifying its signature.
///
/// Only safe for tokens received directly from the provider's token endpoint
/// over TLS; bearer tokens presented by clients go through JWKS verification
/// instead.
pub fn unverified_email_claim(id_token: &str) -> Result<String> {
    use base64ct::{Base64UrlUnpadded, Encoding};

    let payload = id_token
        .split('.')
        .nth(1)
        .ok_or_else(|| anyhow!("malformed id_token"))?;
    let decoded = Base64UrlUnpadded::decode_vec(payload).context("id_token payload encoding")?;
    let claims: serde_json::Value =
        serde_json::from_slice(&decoded).context("id_token payload JSON")?;
    claims
        .get("email")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| anyhow!("id_token carries no email claim"))
}
