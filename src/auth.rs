//! Request Authenticator
//!
//! Decides whether a request carries a valid identity and prepares the
//! request/response enrichment that goes with the decision. The decision
//! tree runs in a fixed order:
//!
//! 1. Load the cookied session (corrupt cookies are treated as anonymous)
//! 2. Mark for re-save when the cookie has outlived the refresh period
//! 3. Let the provider refresh the access token if it is due
//! 4. Drop sessions whose access token has expired
//! 5. Revalidate stale-but-marked sessions against the provider
//! 6. Gate the email through the configured validator
//! 7. Re-emit the session cookie when marked (failure is an internal error)
//! 8. Emit expired session and CSRF cookies when the session was dropped
//! 9. Fall back to `Authorization: Bearer` / `Basic` credentials
//! 10. Report Forbidden when still anonymous
//! 11. Enrich headers per policy and report Accepted
//!
//! Revalidation happens after the expiry check on purpose: validation is a
//! network call and must not run for a token already known dead.

use crate::session::SessionState;
use crate::state::AppState;
use crate::upstream::proxy::GAP_AUTH;
use axum::extract::Request;
use axum::http::{header, HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use base64ct::{Base64, Encoding};
use chrono::{DateTime, Utc};
use std::time::Duration;
use time::OffsetDateTime;

/// Identity headers set on forwarded requests. Header names are
/// case-insensitive on the wire; lowercase is the `http` crate's canonical
/// form.
pub const X_FORWARDED_USER: &str = "x-forwarded-user";
pub const X_FORWARDED_EMAIL: &str = "x-forwarded-email";
pub const X_FORWARDED_ACCESS_TOKEN: &str = "x-forwarded-access-token";

/// Identity headers exposed to gateway auth sub-requests.
pub const X_AUTH_REQUEST_USER: &str = "x-auth-request-user";
pub const X_AUTH_REQUEST_EMAIL: &str = "x-auth-request-email";

/// Outcome of the authentication decision tree.
#[derive(Debug)]
pub enum AuthOutcome {
    Accepted(SessionState),
    Forbidden,
    InternalError,
}

/// Decision plus the response side effects that must accompany it.
pub struct AuthResult {
    pub outcome: AuthOutcome,
    /// Cookies to set on the response (session re-save or clearing).
    pub cookies: Vec<Cookie<'static>>,
    /// Headers to merge into the response (`GAP-Auth`, `X-Auth-Request-*`).
    pub response_headers: HeaderMap,
}

impl AuthResult {
    fn forbidden(cookies: Vec<Cookie<'static>>) -> Self {
        AuthResult {
            outcome: AuthOutcome::Forbidden,
            cookies,
            response_headers: HeaderMap::new(),
        }
    }

    fn internal_error() -> Self {
        AuthResult {
            outcome: AuthOutcome::InternalError,
            cookies: Vec::new(),
            response_headers: HeaderMap::new(),
        }
    }
}

/// Request host without any port component, for the cookie Domain.
pub fn request_host(req_headers: &HeaderMap) -> String {
    req_headers
        .get(header::HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn host_sans_port(host: &str) -> String {
    match host.rsplit_once(':') {
        // Bracketed IPv6 literals keep their brackets, drop the port.
        Some((name, port)) if port.chars().all(|c| c.is_ascii_digit()) => name.to_string(),
        _ => host.to_string(),
    }
}

/// Builds a cookie with the configured attributes.
///
/// The Domain is the configured `COOKIE_DOMAIN`, or the request host without
/// its port when none is configured.
pub fn make_cookie(
    state: &AppState,
    host: &str,
    name: String,
    value: String,
    expire: Duration,
    now: DateTime<Utc>,
) -> Cookie<'static> {
    let config = &state.config;
    let domain = config
        .cookie_domain
        .clone()
        .unwrap_or_else(|| host_sans_port(host));

    let expires = OffsetDateTime::from_unix_timestamp(now.timestamp() + expire.as_secs() as i64)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

    let mut builder = Cookie::build((name, value))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(config.cookie_httponly)
        .secure(config.cookie_secure)
        .expires(expires);
    if !domain.is_empty() {
        builder = builder.domain(domain);
    }
    builder.build()
}

/// Builds a cookie that removes `name` (expiry in the past, empty value).
pub fn clear_cookie(state: &AppState, host: &str, name: String, now: DateTime<Utc>) -> Cookie<'static> {
    let config = &state.config;
    let domain = config
        .cookie_domain
        .clone()
        .unwrap_or_else(|| host_sans_port(host));

    let expires = OffsetDateTime::from_unix_timestamp(now.timestamp() - 3600)
        .unwrap_or(OffsetDateTime::UNIX_EPOCH);

    let mut builder = Cookie::build((name, String::new()))
        .path("/")
        .same_site(SameSite::Lax)
        .http_only(config.cookie_httponly)
        .secure(config.cookie_secure)
        .expires(expires);
    if !domain.is_empty() {
        builder = builder.domain(domain);
    }
    builder.build()
}

/// Seals a session into the session cookie.
pub fn session_cookie(
    state: &AppState,
    host: &str,
    session: &SessionState,
    now: DateTime<Utc>,
) -> Result<Cookie<'static>, String> {
    let payload = state
        .provider
        .cookie_for_session(session, state.cipher.as_ref())?;
    let sealed = state
        .seal
        .sign(&state.config.cookie_name, &payload, now);
    Ok(make_cookie(
        state,
        host,
        state.config.cookie_name.clone(),
        sealed,
        state.config.cookie_expire,
        now,
    ))
}

/// Loads and unseals the session cookie, returning its issue time as well.
fn load_session(state: &AppState, req_headers: &HeaderMap) -> Option<(SessionState, DateTime<Utc>)> {
    let jar = CookieJar::from_headers(req_headers);
    let cookie = jar.get(&state.config.cookie_name)?;

    let (payload, issued_at) = state.seal.verify(
        cookie.value(),
        &state.config.cookie_name,
        state.config.cookie_expire,
        Utc::now(),
    )?;

    match state
        .provider
        .session_from_cookie(&payload, state.cipher.as_ref())
    {
        Ok(session) => Some((session, issued_at)),
        Err(err) => {
            tracing::debug!("Discarding undecodable session cookie: {}", err);
            None
        }
    }
}

/// Parses `Authorization` credentials into a session.
///
/// `Basic` requires an htpasswd file and yields a user-only session.
/// `Bearer` resolves the email through the provider and never writes a
/// session cookie.
async fn session_from_authorization(state: &AppState, req_headers: &HeaderMap) -> Option<SessionState> {
    let raw = req_headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .trim();
    let (scheme, credentials) = raw.split_once(' ')?;

    match scheme {
        "Basic" => {
            let htpasswd = state.htpasswd.as_ref()?;
            let decoded = Base64::decode_vec(credentials.trim()).ok()?;
            let pair = String::from_utf8(decoded).ok()?;
            let (user, password) = pair.split_once(':')?;
            if htpasswd.validate(user, password) {
                tracing::info!(user = %user, "Authenticated via basic auth");
                Some(SessionState {
                    user: user.to_string(),
                    ..SessionState::default()
                })
            } else {
                tracing::info!(user = %user, "Rejected basic auth credentials");
                None
            }
        }
        "Bearer" => {
            let probe = SessionState {
                access_token: credentials.trim().to_string(),
                ..SessionState::default()
            };
            match state.provider.email_address(&probe).await {
                Ok(email) => Some(SessionState {
                    user: email.clone(),
                    email,
                    access_token: probe.access_token,
                    ..SessionState::default()
                }),
                Err(err) => {
                    tracing::info!("invalid bearer token: {}", err);
                    None
                }
            }
        }
        other => {
            tracing::info!(scheme = %other, "Unsupported authorization scheme");
            None
        }
    }
}

/// Runs the authentication decision tree for one request.
///
/// On `Accepted` the request headers have been enriched in place; the
/// returned cookies and response headers must be applied to whatever
/// response is eventually written.
pub async fn authenticate(state: &AppState, req: &mut Request) -> AuthResult {
    let now = Utc::now();
    let host = request_host(req.headers());

    let mut save_session = false;
    let mut clear_session = false;
    let mut revalidated = false;

    // Step 1: cookie load. Corrupt or missing cookies mean anonymous.
    let mut session = load_session(state, req.headers());

    // Step 2: refresh-period mark.
    if let Some((_, issued_at)) = &session {
        let refresh = state.config.cookie_refresh;
        if !refresh.is_zero() {
            let age = now.signed_duration_since(*issued_at);
            if age > chrono::Duration::from_std(refresh).unwrap_or(chrono::Duration::zero()) {
                tracing::info!(age_secs = age.num_seconds(), "Refreshing session cookie");
                save_session = true;
            }
        }
    }

    // Step 3: provider refresh.
    let mut refresh_failed = false;
    if let Some((current, _)) = session.as_mut() {
        match state.provider.refresh_if_needed(current).await {
            Ok(true) => {
                save_session = true;
                revalidated = true;
            }
            Ok(false) => {}
            Err(err) => {
                tracing::error!("Dropping session after failed token refresh: {}", err);
                refresh_failed = true;
            }
        }
    }
    if refresh_failed {
        clear_session = true;
        session = None;
    }

    // Step 4: expiry.
    if session.as_ref().is_some_and(|(s, _)| s.is_expired(now)) {
        if let Some((expired, _)) = session.take() {
            tracing::info!(session = %expired, "Removing expired session");
        }
        save_session = false;
        clear_session = true;
    }

    // Step 5: revalidate stale sessions before re-saving them.
    let needs_validation = save_session
        && !revalidated
        && session
            .as_ref()
            .is_some_and(|(s, _)| !s.access_token.is_empty());
    if needs_validation {
        let valid = match session.as_ref() {
            Some((current, _)) => state.provider.validate_session(current).await,
            None => false,
        };
        if !valid {
            if let Some((stale, _)) = session.take() {
                tracing::info!(session = %stale, "Removing session that failed validation");
            }
            save_session = false;
            clear_session = true;
        }
    }

    // Step 6: authorization gate on the email.
    if session
        .as_ref()
        .is_some_and(|(s, _)| !s.email.is_empty() && !(state.validator)(&s.email))
    {
        if let Some((rejected, _)) = session.take() {
            tracing::info!(session = %rejected, "Removing session for unauthorized email");
        }
        save_session = false;
        clear_session = true;
    }

    let mut cookies = Vec::new();

    // Step 7: re-emit the session cookie when marked.
    if save_session {
        if let Some((current, _)) = &session {
            match session_cookie(state, &host, current, now) {
                Ok(cookie) => cookies.push(cookie),
                Err(err) => {
                    tracing::error!("Could not save session cookie: {}", err);
                    return AuthResult::internal_error();
                }
            }
        }
    }

    // Step 8: clearing drops both the session and CSRF cookies.
    if clear_session {
        cookies.push(clear_cookie(
            state,
            &host,
            state.config.cookie_name.clone(),
            now,
        ));
        cookies.push(clear_cookie(
            state,
            &host,
            state.config.csrf_cookie_name(),
            now,
        ));
    }

    // Step 9: bearer/basic fallback; no session cookie is written for these.
    let mut session = session.map(|(current, _)| current);
    if session.is_none() {
        session = session_from_authorization(state, req.headers()).await;
    }

    // Step 10: still anonymous.
    let Some(session) = session else {
        return AuthResult::forbidden(cookies);
    };

    // Step 11: header enrichment.
    let mut response_headers = HeaderMap::new();
    enrich(state, req, &session, &mut response_headers);

    AuthResult {
        outcome: AuthOutcome::Accepted(session),
        cookies,
        response_headers,
    }
}

/// Applies the configured identity-header policy.
fn enrich(state: &AppState, req: &mut Request, session: &SessionState, response_headers: &mut HeaderMap) {
    let config = &state.config;
    let headers = req.headers_mut();

    let user_value = HeaderValue::from_str(&session.user).ok();
    let email_value = HeaderValue::from_str(&session.email).ok();

    if config.pass_basic_auth {
        let credentials = format!("{}:{}", session.user, config.basic_auth_password);
        let encoded = Base64::encode_string(credentials.as_bytes());
        if let Ok(value) = HeaderValue::from_str(&format!("Basic {}", encoded)) {
            headers.insert(header::AUTHORIZATION, value);
        }
    }
    if config.pass_basic_auth || config.pass_user_headers {
        match &user_value {
            Some(value) if !session.user.is_empty() => {
                headers.insert(X_FORWARDED_USER, value.clone());
            }
            _ => {
                headers.remove(X_FORWARDED_USER);
            }
        }
        match &email_value {
            Some(value) if !session.email.is_empty() => {
                headers.insert(X_FORWARDED_EMAIL, value.clone());
            }
            _ => {
                headers.remove(X_FORWARDED_EMAIL);
            }
        }
    }
    if config.pass_access_token && !session.access_token.is_empty() {
        if let Ok(value) = HeaderValue::from_str(&session.access_token) {
            headers.insert(X_FORWARDED_ACCESS_TOKEN, value);
        }
    }

    if config.set_xauthrequest {
        if let Some(value) = &user_value {
            response_headers.insert(X_AUTH_REQUEST_USER, value.clone());
        }
        if let Some(value) = email_value {
            if !session.email.is_empty() {
                response_headers.insert(X_AUTH_REQUEST_EMAIL, value);
            }
        }
    }

    if let Ok(value) = HeaderValue::from_str(session.identity()) {
        response_headers.insert(GAP_AUTH, value);
    }
}
