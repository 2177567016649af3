//! Generic OIDC-Style Provider
//!
//! Implements the [`Provider`](super::Provider) contract against any
//! OAuth2/OIDC identity provider that exposes an authorization-code token
//! endpoint. Email resolution prefers a JWKS-verified JWT (for bearer
//! credentials presented by clients) and falls back to the profile endpoint.
//!
//! # Key Cache
//! JWKS keys are fetched lazily and cached process-wide under a mutex.
//! A fetch failure is returned to the caller but never cached, so the next
//! request retries.

use super::{unverified_email_claim, validate_token, Provider, ProviderData, TokenResponse};
use crate::session::SessionState;
use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{decode, decode_header, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::Mutex;

/// One published signing key, kept as raw RSA components.
#[derive(Debug, Clone, Deserialize)]
struct Jwk {
    #[serde(default)]
    kid: String,
    #[serde(default)]
    kty: String,
    #[serde(default)]
    n: String,
    #[serde(default)]
    e: String,
}

#[derive(Debug, Deserialize)]
struct JwkSet {
    keys: Vec<Jwk>,
}

/// Generic OAuth2/OIDC relying-party provider.
pub struct OidcProvider {
    data: ProviderData,
    client: reqwest::Client,
    /// kid -> RSA components; lazily populated, refetched on unknown kid.
    key_cache: Mutex<HashMap<String, Jwk>>,
}

impl OidcProvider {
    /// Builds the provider, requiring login and redeem endpoints.
    pub fn new(data: ProviderData) -> Result<Self, String> {
        if data.login_url.is_none() {
            return Err("LOGIN_URL environment variable not set".to_string());
        }
        if data.redeem_url.is_none() {
            return Err("REDEEM_URL environment variable not set".to_string());
        }
        Ok(OidcProvider {
            data,
            client: reqwest::Client::new(),
            key_cache: Mutex::new(HashMap::new()),
        })
    }

    /// Looks up the signing key for `kid`, fetching the JWKS document on a
    /// cache miss. Fetch failures are not cached.
    async fn signing_key(&self, kid: &str) -> Result<DecodingKey> {
        let jwks_url = self
            .data
            .jwks_url
            .clone()
            .ok_or_else(|| anyhow!("provider has no JWKS URL configured"))?;

        let mut cache = self.key_cache.lock().await;
        if !cache.contains_key(kid) {
            let set: JwkSet = self
                .client
                .get(jwks_url)
                .send()
                .await
                .context("JWKS fetch")?
                .error_for_status()
                .context("JWKS fetch")?
                .json()
                .await
                .context("JWKS parse")?;
            for key in set.keys {
                if key.kty == "RSA" && !key.kid.is_empty() {
                    cache.insert(key.kid.clone(), key);
                }
            }
        }

        let jwk = cache
            .get(kid)
            .ok_or_else(|| anyhow!("no signing key published for kid '{}'", kid))?;
        DecodingKey::from_rsa_components(&jwk.n, &jwk.e).context("JWKS key components")
    }

    /// Verifies a JWT against the provider's JWKS and extracts its email.
    async fn email_from_jwt(&self, token: &str) -> Result<String> {
        let header = decode_header(token).context("bearer token header")?;
        let kid = header
            .kid
            .ok_or_else(|| anyhow!("bearer token has no key id"))?;
        let key = self.signing_key(&kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.validate_aud = false;

        let data = decode::<serde_json::Value>(token, &key, &validation)
            .context("bearer token verification")?;
        data.claims
            .get("email")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("verified token carries no email claim"))
    }

    /// Fetches the profile endpoint and extracts its email field.
    async fn email_from_profile(&self, access_token: &str) -> Result<String> {
        let profile_url = self
            .data
            .profile_url
            .clone()
            .ok_or_else(|| anyhow!("provider has no profile URL configured"))?;

        let profile: serde_json::Value = self
            .client
            .get(profile_url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", access_token),
            )
            .send()
            .await
            .context("profile request")?
            .error_for_status()
            .context("profile request")?
            .json()
            .await
            .context("profile parse")?;

        profile
            .get("email")
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| anyhow!("profile response carries no email"))
    }
}

#[async_trait]
impl Provider for OidcProvider {
    fn data(&self) -> &ProviderData {
        &self.data
    }

    async fn redeem(&self, redirect_uri: &str, code: &str) -> Result<SessionState> {
        if code.is_empty() {
            bail!("missing authorization code");
        }
        let redeem_url = self
            .data
            .redeem_url
            .clone()
            .ok_or_else(|| anyhow!("provider has no redeem URL configured"))?;

        let params = [
            ("grant_type", "authorization_code"),
            ("client_id", self.data.client_id.as_str()),
            ("client_secret", self.data.client_secret.as_str()),
            ("redirect_uri", redirect_uri),
            ("code", code),
        ];

        let response = self
            .client
            .post(redeem_url)
            .form(&params)
            .send()
            .await
            .context("code redemption request")?;
        if !response.status().is_success() {
            // Provider error bodies are logged, never surfaced to clients.
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "Code redemption failed");
            bail!("code redemption returned {}", status);
        }

        let token: TokenResponse = response.json().await.context("token response parse")?;
        let expires_on = token.expires_on();

        // The id_token arrived over TLS straight from the provider, so its
        // email claim is read without signature verification.
        let email = match &token.id_token {
            Some(id_token) => unverified_email_claim(id_token).unwrap_or_default(),
            None => String::new(),
        };

        Ok(SessionState {
            user: String::new(),
            email,
            access_token: token.access_token,
            refresh_token: token.refresh_token.unwrap_or_default(),
            expires_on,
        })
    }

    async fn email_address(&self, session: &SessionState) -> Result<String> {
        let token = &session.access_token;
        if token.is_empty() {
            bail!("session has no access token");
        }

        // A JWT-shaped credential with a JWKS endpoint gets full signature
        // verification; everything else goes through the profile endpoint.
        if self.data.jwks_url.is_some() && token.matches('.').count() == 2 {
            match self.email_from_jwt(token).await {
                Ok(email) => return Ok(email),
                Err(err) if self.data.profile_url.is_some() => {
                    tracing::debug!("JWT email resolution failed, trying profile: {}", err);
                }
                Err(err) => return Err(err),
            }
        }
        self.email_from_profile(token).await
    }

    async fn validate_session(&self, session: &SessionState) -> bool {
        validate_token(
            &self.client,
            self.data.validate_url.as_ref(),
            &session.access_token,
        )
        .await
    }

    async fn refresh_if_needed(&self, session: &mut SessionState) -> Result<bool> {
        let due = match session.expires_on {
            Some(expires_on) => expires_on < Utc::now(),
            None => false,
        };
        if !due || session.refresh_token.is_empty() {
            return Ok(false);
        }

        let redeem_url = self
            .data
            .redeem_url
            .clone()
            .ok_or_else(|| anyhow!("provider has no redeem URL configured"))?;
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.data.client_id.as_str()),
            ("client_secret", self.data.client_secret.as_str()),
            ("refresh_token", session.refresh_token.as_str()),
        ];

        let response = self
            .client
            .post(redeem_url)
            .form(&params)
            .send()
            .await
            .context("token refresh request")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            tracing::error!(%status, %body, "Token refresh failed");
            bail!("token refresh returned {}", status);
        }

        let token: TokenResponse = response.json().await.context("refresh response parse")?;
        session.expires_on = token.expires_on();
        session.access_token = token.access_token;
        if let Some(refresh_token) = token.refresh_token {
            session.refresh_token = refresh_token;
        }
        tracing::info!(session = %session, "Refreshed access token");
        Ok(true)
    }
}
