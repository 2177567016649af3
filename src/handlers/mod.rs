//! OAuth2 Flow and System Endpoints
//!
//! HTTP handlers for everything the proxy serves itself rather than
//! forwarding: the sign-in page, the manual (htpasswd) sign-in POST, the
//! OAuth2 start redirect and callback, sign-out, the auth-only sub-request
//! endpoint used by gateway `auth_request` setups, and the `/ping` and
//! `/robots.txt` system paths.
//!
//! # Login CSRF
//! `/start` binds a one-shot nonce to the browser through the
//! `<cookie>_csrf` cookie and to the provider round-trip through the OAuth2
//! `state` parameter (`<nonce>:<redirect>`). The callback clears the cookie
//! before any nonce comparison and compares in constant time. The manual
//! sign-in form carries the same nonce as a hidden field.

pub mod templates;

use crate::auth::{
    authenticate, clear_cookie, make_cookie, request_host, session_cookie, AuthOutcome,
};
use crate::security::cookie::nonce;
use crate::session::SessionState;
use crate::state::AppState;
use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderValue, StatusCode},
    response::Response,
};
use axum_extra::extract::cookie::{Cookie, CookieJar};
use chrono::Utc;
use std::collections::HashMap;
use std::net::SocketAddr;
use subtle::ConstantTimeEq;

/// Maximum accepted sign-in form body.
const SIGN_IN_FORM_LIMIT: usize = 64 * 1024;

/// Admits only single-slash absolute paths as post-login redirects.
///
/// Anything else (absolute URLs, protocol-relative `//host`, empty strings)
/// collapses to `/`. This is the open-redirect guard; it runs everywhere a
/// redirect target is accepted.
pub fn sanitize_redirect(redirect: &str) -> String {
    if redirect.starts_with('/') && !redirect.starts_with("//") {
        redirect.to_string()
    } else {
        "/".to_string()
    }
}

/// Parses query or form-encoded pairs into a map.
fn parse_pairs(raw: &str) -> HashMap<String, String> {
    url::form_urlencoded::parse(raw.as_bytes())
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect()
}

/// Remote address for audit logs, when the listener recorded one.
fn remote_addr(req: &Request) -> String {
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Appends `Set-Cookie` headers to a response.
pub fn apply_cookies(response: &mut Response, cookies: &[Cookie<'static>]) {
    for cookie in cookies {
        match HeaderValue::from_str(&cookie.to_string()) {
            Ok(value) => {
                response.headers_mut().append(header::SET_COOKIE, value);
            }
            Err(_) => {
                tracing::error!("Failed to serialize cookie for Set-Cookie header");
            }
        }
    }
}

fn html_response(status: StatusCode, body: String) -> Response {
    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
        .body(Body::from(body))
        .unwrap_or_default()
}

fn redirect_response(location: &str) -> Response {
    Response::builder()
        .status(StatusCode::FOUND)
        .header(header::LOCATION, location)
        .body(Body::empty())
        .unwrap_or_default()
}

/// Renders the generic error page.
pub fn error_response(status: StatusCode, title: &str, message: &str) -> Response {
    html_response(status, templates::error_page(status.as_u16(), title, message))
}

/// The OAuth2 callback this deployment answers on.
///
/// The configured `REDIRECT_URL` wins; otherwise the URI is derived from the
/// request host with the scheme implied by `COOKIE_SECURE`.
fn redirect_uri(state: &AppState, host: &str) -> String {
    if let Some(configured) = &state.config.redirect_url {
        return configured.to_string();
    }
    let scheme = if state.config.cookie_secure { "https" } else { "http" };
    format!(
        "{}://{}{}/callback",
        scheme, host, state.config.proxy_prefix
    )
}

/// Renders the sign-in page, issuing a CSRF token for the manual form when
/// an htpasswd file is configured.
pub fn render_sign_in(state: &AppState, host: &str, redirect: &str, status: StatusCode) -> Response {
    let show_form = state.htpasswd.is_some();
    let mut cookies = Vec::new();
    let csrf_token = if show_form {
        match nonce() {
            Ok(token) => {
                cookies.push(make_cookie(
                    state,
                    host,
                    state.config.csrf_cookie_name(),
                    token.clone(),
                    state.config.cookie_expire,
                    Utc::now(),
                ));
                token
            }
            Err(err) => {
                tracing::error!("CSRF nonce generation failed: {}", err);
                return error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Error",
                    "Internal Error",
                );
            }
        }
    } else {
        String::new()
    };

    let body = templates::sign_in_page(&state.config, redirect, &csrf_token, show_form);
    let mut response = html_response(status, body);
    apply_cookies(&mut response, &cookies);
    response
}

/// Begins the OAuth2 redirect dance: fresh nonce, CSRF cookie, 302 to the
/// provider's login URL with the nonce-bound state.
pub fn start_oauth_flow(
    state: &AppState,
    host: &str,
    redirect: &str,
    mut extra_cookies: Vec<Cookie<'static>>,
) -> Response {
    let token = match nonce() {
        Ok(token) => token,
        Err(err) => {
            tracing::error!("CSRF nonce generation failed: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };

    extra_cookies.push(make_cookie(
        state,
        host,
        state.config.csrf_cookie_name(),
        token.clone(),
        state.config.cookie_expire,
        Utc::now(),
    ));

    let oauth_state = format!("{}:{}", token, redirect);
    let login_url = match state
        .provider
        .login_url(&redirect_uri(state, host), &oauth_state)
    {
        Ok(url) => url,
        Err(err) => {
            tracing::error!("Could not build provider login URL: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };

    let mut response = redirect_response(login_url.as_str());
    apply_cookies(&mut response, &extra_cookies);
    response
}

/// GET `/ping`: liveness probe, touches nothing.
pub async fn ping() -> &'static str {
    "OK"
}

/// GET `/robots.txt`: keep crawlers away from protected trees.
pub async fn robots_txt() -> Response {
    Response::builder()
        .status(StatusCode::OK)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("User-agent: *\nDisallow: /"))
        .unwrap_or_default()
}

/// GET `<prefix>/metrics`: Prometheus exposition.
pub async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.exposition() {
        Ok(body) => Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, "text/plain; version=0.0.4")
            .body(Body::from(body))
            .unwrap_or_default(),
        Err(err) => {
            tracing::error!("Metrics exposition failed: {}", err);
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            )
        }
    }
}

/// GET `<prefix>/sign_in`: render the sign-in page.
pub async fn sign_in(State(state): State<AppState>, req: Request) -> Response {
    let host = request_host(req.headers());
    let params = parse_pairs(req.uri().query().unwrap_or(""));
    let redirect = resolve_redirect(&state, &req, params.get("rd").map(String::as_str));
    render_sign_in(&state, &host, &redirect, StatusCode::OK)
}

/// Redirect target selection for the sign-in entry points.
///
/// The `rd` parameter wins; with the provider button skipped the request URI
/// or the `X-Auth-Request-Redirect` header stands in, so a bounced request
/// returns to where it started.
fn resolve_redirect(state: &AppState, req: &Request, rd: Option<&str>) -> String {
    if let Some(rd) = rd {
        if !rd.is_empty() {
            return sanitize_redirect(rd);
        }
    }
    if state.config.skip_provider_button {
        if let Some(value) = req
            .headers()
            .get("X-Auth-Request-Redirect")
            .and_then(|value| value.to_str().ok())
        {
            return sanitize_redirect(value);
        }
        return sanitize_redirect(
            &req.uri()
                .path_and_query()
                .map(|pq| pq.as_str().to_string())
                .unwrap_or_default(),
        );
    }
    "/".to_string()
}

/// POST `<prefix>/sign_in`: manual sign-in against the htpasswd file.
///
/// The form's CSRF token must match the CSRF cookie before credentials are
/// even looked at; the cookie is cleared either way.
pub async fn manual_sign_in(State(state): State<AppState>, req: Request) -> Response {
    let now = Utc::now();
    let host = request_host(req.headers());
    let jar = CookieJar::from_headers(req.headers());
    let csrf_cookie = jar
        .get(&state.config.csrf_cookie_name())
        .map(|c| c.value().to_string());
    let remote = remote_addr(&req);

    let Some(htpasswd) = state.htpasswd.clone() else {
        // No credential store: the POST degrades to the plain page.
        return render_sign_in(&state, &host, "/", StatusCode::OK);
    };

    let body = match axum::body::to_bytes(req.into_body(), SIGN_IN_FORM_LIMIT).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return error_response(StatusCode::BAD_REQUEST, "Bad Request", "Bad Request");
        }
    };
    let form = parse_pairs(std::str::from_utf8(&body).unwrap_or(""));

    let redirect = sanitize_redirect(form.get("rd").map(String::as_str).unwrap_or(""));
    let csrf_clear = clear_cookie(&state, &host, state.config.csrf_cookie_name(), now);

    let (Some(cookie_token), Some(form_token)) = (csrf_cookie, form.get("csrf_token").cloned())
    else {
        tracing::warn!(remote = %remote, "Manual sign-in without CSRF token pair");
        let mut response = error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "Permission Denied",
        );
        apply_cookies(&mut response, &[csrf_clear]);
        return response;
    };

    let matches = cookie_token.len() == form_token.len()
        && bool::from(cookie_token.as_bytes().ct_eq(form_token.as_bytes()));
    if !matches {
        tracing::warn!(remote = %remote, "Manual sign-in CSRF token mismatch");
        let mut response = error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "Permission Denied",
        );
        apply_cookies(&mut response, &[csrf_clear]);
        return response;
    }

    let user = form.get("username").map(String::as_str).unwrap_or("");
    let password = form.get("password").map(String::as_str).unwrap_or("");
    if user.is_empty() || !htpasswd.validate(user, password) {
        tracing::info!(remote = %remote, user = %user, "Manual sign-in rejected");
        let mut response = render_sign_in(&state, &host, &redirect, StatusCode::UNAUTHORIZED);
        apply_cookies(&mut response, &[csrf_clear]);
        return response;
    }

    let session = SessionState {
        user: user.to_string(),
        ..SessionState::default()
    };
    let cookie = match session_cookie(&state, &host, &session, now) {
        Ok(cookie) => cookie,
        Err(err) => {
            tracing::error!("Could not save session cookie: {}", err);
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            );
        }
    };

    tracing::info!(remote = %remote, user = %user, "Manual sign-in accepted");
    let mut response = redirect_response(&redirect);
    apply_cookies(&mut response, &[cookie, csrf_clear]);
    response
}

/// GET `<prefix>/sign_out`: drop the session, return to `/`.
pub async fn sign_out(State(state): State<AppState>, req: Request) -> Response {
    let now = Utc::now();
    let host = request_host(req.headers());
    let cookies = vec![
        clear_cookie(&state, &host, state.config.cookie_name.clone(), now),
        clear_cookie(&state, &host, state.config.csrf_cookie_name(), now),
    ];
    let mut response = redirect_response("/");
    apply_cookies(&mut response, &cookies);
    response
}

/// GET `<prefix>/start`: begin the OAuth2 redirect dance.
pub async fn oauth_start(State(state): State<AppState>, req: Request) -> Response {
    let host = request_host(req.headers());
    let params = parse_pairs(req.uri().query().unwrap_or(""));
    let redirect = resolve_redirect(&state, &req, params.get("rd").map(String::as_str));
    start_oauth_flow(&state, &host, &redirect, Vec::new())
}

/// GET `<prefix>/callback`: complete the OAuth2 redemption.
pub async fn oauth_callback(State(state): State<AppState>, req: Request) -> Response {
    let now = Utc::now();
    let host = request_host(req.headers());
    let remote = remote_addr(&req);
    let params = parse_pairs(req.uri().query().unwrap_or(""));
    let jar = CookieJar::from_headers(req.headers());

    // Whatever happens next, the nonce is one-shot.
    let csrf_clear = clear_cookie(&state, &host, state.config.csrf_cookie_name(), now);
    let finish = |mut response: Response| {
        apply_cookies(&mut response, std::slice::from_ref(&csrf_clear));
        response
    };

    if let Some(error) = params.get("error").filter(|e| !e.is_empty()) {
        tracing::info!(remote = %remote, error = %error, "Provider returned an error");
        return finish(error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            error,
        ));
    }

    let code = params.get("code").map(String::as_str).unwrap_or("");
    let mut session = match state
        .provider
        .redeem(&redirect_uri(&state, &host), code)
        .await
    {
        Ok(session) => session,
        Err(err) => {
            tracing::error!("Error redeeming authorization code: {}", err);
            return finish(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            ));
        }
    };

    let oauth_state = params.get("state").map(String::as_str).unwrap_or("");
    let Some((state_nonce, state_redirect)) = oauth_state.split_once(':') else {
        tracing::error!(remote = %remote, "Invalid state in OAuth2 callback");
        return finish(error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "Invalid State",
        ));
    };

    let Some(csrf_cookie) = jar.get(&state.config.csrf_cookie_name()) else {
        tracing::warn!(remote = %remote, "OAuth2 callback without CSRF cookie");
        return finish(error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "Permission Denied",
        ));
    };

    let cookie_value = csrf_cookie.value();
    let matches = cookie_value.len() == state_nonce.len()
        && bool::from(cookie_value.as_bytes().ct_eq(state_nonce.as_bytes()));
    if !matches {
        tracing::warn!(remote = %remote, "CSRF token mismatch, potential attack");
        return finish(error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "Permission Denied",
        ));
    }

    let redirect = sanitize_redirect(state_redirect);

    if session.email.is_empty() {
        match state.provider.email_address(&session).await {
            Ok(email) => session.email = email,
            Err(err) => {
                tracing::error!("Could not resolve email for redeemed session: {}", err);
                return finish(error_response(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal Error",
                    "Internal Error",
                ));
            }
        }
    }
    if session.user.is_empty() {
        session.user = session
            .email
            .split_once('@')
            .map(|(local, _)| local.to_string())
            .unwrap_or_default();
    }

    // Authorization gate: the email validator and the provider's group
    // check both have to pass. Failures never bounce back to the provider.
    let authorized =
        (state.validator)(&session.email) && state.provider.validate_group(&session.email).await;
    if !authorized {
        tracing::info!(remote = %remote, session = %session, "Permission denied for account");
        return finish(error_response(
            StatusCode::FORBIDDEN,
            "Permission Denied",
            "Invalid Account",
        ));
    }

    let cookie = match session_cookie(&state, &host, &session, now) {
        Ok(cookie) => cookie,
        Err(err) => {
            tracing::error!("Could not save session cookie: {}", err);
            return finish(error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal Error",
                "Internal Error",
            ));
        }
    };

    tracing::info!(remote = %remote, session = %session, "Authenticated via OAuth2 callback");
    let mut response = redirect_response(&redirect);
    apply_cookies(&mut response, &[cookie]);
    finish(response)
}

/// GET `<prefix>/auth`: authentication sub-request for gateway setups.
///
/// Returns 202 with the identity headers on success and a plain 401
/// otherwise; never redirects.
pub async fn auth_only(State(state): State<AppState>, mut req: Request) -> Response {
    let result = authenticate(&state, &mut req).await;
    let mut response = match result.outcome {
        AuthOutcome::Accepted(_) => Response::builder()
            .status(StatusCode::ACCEPTED)
            .body(Body::empty())
            .unwrap_or_default(),
        AuthOutcome::Forbidden => Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .body(Body::from("unauthorized request"))
            .unwrap_or_default(),
        AuthOutcome::InternalError => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "Internal Error",
        ),
    };

    for (name, value) in result.response_headers.iter() {
        response.headers_mut().insert(name.clone(), value.clone());
    }
    apply_cookies(&mut response, &result.cookies);
    response
}
