//! Proxy Configuration
//!
//! This module loads and validates the immutable `ProxyConfig` from
//! environment variables at startup. Validation failures are fatal: `main`
//! aborts the process before the listener is bound.
//!
//! # Required Variables
//! - `COOKIE_SECRET`: seals the session cookie
//! - `UPSTREAMS`: comma-separated upstream URLs (`http`, `https` or `file`)
//! - `EMAIL_DOMAINS`: comma-separated authorized domains (`*` allows any)
//! - `CLIENT_ID` / `CLIENT_SECRET`: OAuth2 client credentials
//!
//! # Optional Variables
//! Cookie attributes (`COOKIE_NAME`, `COOKIE_DOMAIN`, `COOKIE_SECURE`,
//! `COOKIE_HTTPONLY`, `COOKIE_EXPIRE`, `COOKIE_REFRESH`, `COOKIE_ENCRYPT`),
//! header passing policy (`PASS_BASIC_AUTH`, `PASS_USER_HEADERS`,
//! `PASS_ACCESS_TOKEN`, `PASS_HOST_HEADER`, `SET_XAUTHREQUEST`), flow tuning
//! (`PROXY_PREFIX`, `REDIRECT_URL`, `SKIP_PROVIDER_BUTTON`,
//! `SKIP_AUTH_PREFLIGHT`, `SKIP_AUTH_REGEX`), upstream signing
//! (`SIGNATURE_KEY`), manual sign-in (`HTPASSWD_FILE`), page text
//! (`SIGN_IN_MESSAGE`, `FOOTER`) and the provider endpoint set.

use regex::Regex;
use std::env;
use std::time::Duration;
use url::Url;

/// Signature algorithms accepted in `SIGNATURE_KEY`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignatureAlgo {
    Sha1,
    Sha256,
}

impl SignatureAlgo {
    /// Wire name used in the `GAP-Signature` header.
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgo::Sha1 => "sha1",
            SignatureAlgo::Sha256 => "sha256",
        }
    }
}

/// Key used to HMAC-sign forwarded requests, parsed from `algo:secret`.
#[derive(Debug, Clone)]
pub struct SignatureKey {
    pub algo: SignatureAlgo,
    pub secret: String,
}

impl SignatureKey {
    /// Parses a `SIGNATURE_KEY` value of the form `sha256:secret`.
    pub fn parse(spec: &str) -> Result<Self, String> {
        let (algo, secret) = spec
            .split_once(':')
            .ok_or_else(|| format!("invalid SIGNATURE_KEY '{}': expected algo:secret", spec))?;
        let algo = match algo.trim().to_ascii_lowercase().as_str() {
            "sha1" => SignatureAlgo::Sha1,
            "sha256" => SignatureAlgo::Sha256,
            other => return Err(format!("unsupported signature algorithm '{}'", other)),
        };
        if secret.is_empty() {
            return Err("SIGNATURE_KEY secret must not be empty".to_string());
        }
        Ok(SignatureKey {
            algo,
            secret: secret.to_string(),
        })
    }
}

/// Immutable runtime configuration, created once at startup.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Listen address, e.g. `0.0.0.0:4180`.
    pub http_address: String,

    /// Session cookie attributes.
    pub cookie_name: String,
    pub cookie_secret: String,
    pub cookie_domain: Option<String>,
    pub cookie_secure: bool,
    pub cookie_httponly: bool,
    pub cookie_expire: Duration,
    pub cookie_refresh: Duration,
    /// Encrypt persisted token fields with AES-GCM keyed by `cookie_secret`.
    pub cookie_encrypt: bool,

    /// Path prefix owned by the proxy itself.
    pub proxy_prefix: String,

    /// Raw upstream URLs; the registry validates schemes.
    pub upstreams: Vec<Url>,
    /// Compiled path patterns that bypass authentication.
    pub skip_auth_regex: Vec<Regex>,
    pub skip_auth_preflight: bool,
    pub skip_provider_button: bool,

    /// Header enrichment policy.
    pub pass_basic_auth: bool,
    pub basic_auth_password: String,
    pub pass_user_headers: bool,
    pub pass_access_token: bool,
    pub pass_host_header: bool,
    pub set_xauthrequest: bool,

    /// Optional upstream request signing key.
    pub signature_key: Option<SignatureKey>,

    /// Absolute OAuth2 callback override; derived from the request otherwise.
    pub redirect_url: Option<Url>,

    /// Authorized email domains; `*` accepts any non-empty email.
    pub email_domains: Vec<String>,

    /// Optional htpasswd file enabling manual and basic auth.
    pub htpasswd_file: Option<String>,

    /// Sign-in page text.
    pub sign_in_message: String,
    pub footer: String,

    /// Identity provider endpoints and client credentials.
    pub provider_name: String,
    pub login_url: String,
    pub redeem_url: String,
    pub profile_url: String,
    pub validate_url: String,
    pub jwks_url: String,
    pub scope: String,
    pub client_id: String,
    pub client_secret: String,
    pub approval_prompt: String,
}

impl ProxyConfig {
    /// Name of the CSRF cookie, derived from the session cookie name.
    pub fn csrf_cookie_name(&self) -> String {
        format!("{}_csrf", self.cookie_name)
    }
}

/// Helper to parse environment variables as boolean flags.
/// Supports common truthy/falsy strings like '1', 'true', 'yes', 'on', '0', 'false', etc.
pub fn parse_env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .and_then(|value| match value.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Some(true),
            "0" | "false" | "no" | "off" => Some(false),
            _ => {
                tracing::warn!(key = %key, value = %value, "Invalid boolean env value; using default");
                None
            }
        })
        .unwrap_or(default)
}

/// Reads an optional environment variable, trimming whitespace.
fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Reads an environment variable with a fallback default.
fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

/// Reads a duration expressed in seconds.
fn env_duration_secs(key: &str, default_secs: u64) -> Result<Duration, String> {
    match env_opt(key) {
        None => Ok(Duration::from_secs(default_secs)),
        Some(raw) => raw
            .parse::<u64>()
            .map(Duration::from_secs)
            .map_err(|_| format!("{} must be a number of seconds, got '{}'", key, raw)),
    }
}

/// Splits a comma-separated environment variable into trimmed entries.
fn env_list(key: &str) -> Vec<String> {
    env_opt(key)
        .map(|value| {
            value
                .split(',')
                .map(|entry| entry.trim().to_string())
                .filter(|entry| !entry.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

/// Validates the cookie secret has enough material to key an HMAC.
fn validate_cookie_secret(secret: &str) -> Result<(), String> {
    if secret.len() < 16 {
        return Err("COOKIE_SECRET must be at least 16 characters long".to_string());
    }
    let unique_chars = secret
        .chars()
        .collect::<std::collections::HashSet<_>>()
        .len();
    if unique_chars < 8 {
        return Err("COOKIE_SECRET must contain at least 8 unique characters".to_string());
    }
    Ok(())
}

/// Loads and validates the full proxy configuration from the environment.
///
/// # Errors
/// Returns a descriptive message for the first validation failure: missing
/// required variables, malformed URLs or regexes, a cookie refresh period
/// that is not shorter than the cookie lifetime, or an encryption secret
/// whose length cannot key AES.
pub fn load() -> Result<ProxyConfig, String> {
    let cookie_secret =
        env_opt("COOKIE_SECRET").ok_or_else(|| "COOKIE_SECRET environment variable not set".to_string())?;
    validate_cookie_secret(&cookie_secret)?;

    let cookie_encrypt = parse_env_bool("COOKIE_ENCRYPT", false);
    if cookie_encrypt && !matches!(cookie_secret.len(), 16 | 24 | 32) {
        return Err(format!(
            "COOKIE_ENCRYPT requires a COOKIE_SECRET of 16, 24 or 32 bytes, got {}",
            cookie_secret.len()
        ));
    }

    let cookie_expire = env_duration_secs("COOKIE_EXPIRE", 168 * 3600)?;
    let cookie_refresh = env_duration_secs("COOKIE_REFRESH", 0)?;
    if !cookie_refresh.is_zero() && cookie_refresh >= cookie_expire {
        return Err(format!(
            "COOKIE_REFRESH ({}s) must be less than COOKIE_EXPIRE ({}s)",
            cookie_refresh.as_secs(),
            cookie_expire.as_secs()
        ));
    }

    let upstream_raw = env_list("UPSTREAMS");
    if upstream_raw.is_empty() {
        return Err("UPSTREAMS environment variable not set".to_string());
    }
    let mut upstreams = Vec::with_capacity(upstream_raw.len());
    for raw in &upstream_raw {
        let url = Url::parse(raw).map_err(|e| format!("invalid upstream URL '{}': {}", raw, e))?;
        upstreams.push(url);
    }

    let mut skip_auth_regex = Vec::new();
    for pattern in env_list("SKIP_AUTH_REGEX") {
        let compiled = Regex::new(&pattern)
            .map_err(|e| format!("invalid SKIP_AUTH_REGEX pattern '{}': {}", pattern, e))?;
        skip_auth_regex.push(compiled);
    }

    let email_domains = env_list("EMAIL_DOMAINS");
    if email_domains.is_empty() {
        return Err("EMAIL_DOMAINS environment variable not set".to_string());
    }

    let signature_key = match env_opt("SIGNATURE_KEY") {
        Some(spec) => Some(SignatureKey::parse(&spec)?),
        None => None,
    };

    let redirect_url = match env_opt("REDIRECT_URL") {
        Some(raw) => Some(
            Url::parse(&raw).map_err(|e| format!("invalid REDIRECT_URL '{}': {}", raw, e))?,
        ),
        None => None,
    };

    let proxy_prefix = env_or("PROXY_PREFIX", "/oauth2");
    if !proxy_prefix.starts_with('/') || proxy_prefix.ends_with('/') {
        return Err(format!(
            "PROXY_PREFIX must start with '/' and not end with '/', got '{}'",
            proxy_prefix
        ));
    }

    let client_id =
        env_opt("CLIENT_ID").ok_or_else(|| "CLIENT_ID environment variable not set".to_string())?;
    let client_secret = env_opt("CLIENT_SECRET")
        .ok_or_else(|| "CLIENT_SECRET environment variable not set".to_string())?;

    Ok(ProxyConfig {
        http_address: env_or("HTTP_ADDRESS", "0.0.0.0:4180"),
        cookie_name: env_or("COOKIE_NAME", "_authgate"),
        cookie_secret,
        cookie_domain: env_opt("COOKIE_DOMAIN"),
        cookie_secure: parse_env_bool("COOKIE_SECURE", true),
        cookie_httponly: parse_env_bool("COOKIE_HTTPONLY", true),
        cookie_expire,
        cookie_refresh,
        cookie_encrypt,
        proxy_prefix,
        upstreams,
        skip_auth_regex,
        skip_auth_preflight: parse_env_bool("SKIP_AUTH_PREFLIGHT", false),
        skip_provider_button: parse_env_bool("SKIP_PROVIDER_BUTTON", false),
        pass_basic_auth: parse_env_bool("PASS_BASIC_AUTH", true),
        basic_auth_password: env_or("BASIC_AUTH_PASSWORD", ""),
        pass_user_headers: parse_env_bool("PASS_USER_HEADERS", true),
        pass_access_token: parse_env_bool("PASS_ACCESS_TOKEN", false),
        pass_host_header: parse_env_bool("PASS_HOST_HEADER", true),
        set_xauthrequest: parse_env_bool("SET_XAUTHREQUEST", false),
        signature_key,
        redirect_url,
        email_domains,
        htpasswd_file: env_opt("HTPASSWD_FILE"),
        sign_in_message: env_or("SIGN_IN_MESSAGE", ""),
        footer: env_or("FOOTER", ""),
        provider_name: env_or("PROVIDER_NAME", "OpenID Connect"),
        login_url: env_or("LOGIN_URL", ""),
        redeem_url: env_or("REDEEM_URL", ""),
        profile_url: env_or("PROFILE_URL", ""),
        validate_url: env_or("VALIDATE_URL", ""),
        jwks_url: env_or("JWKS_URL", ""),
        scope: env_or("SCOPE", "openid email profile"),
        client_id,
        client_secret,
        approval_prompt: env_or("APPROVAL_PROMPT", "force"),
    })
}
