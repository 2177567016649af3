//! Route Definitions and Request Classification
//!
//! Builds the axum router that realizes the dispatch order: system paths
//! first, then the proxy's own endpoints under the configured prefix, and a
//! fallback that authenticates everything else before forwarding it
//! upstream. Whitelisted paths (preflight or configured regex) skip
//! authentication entirely but still route through the upstream registry.

use crate::auth::{authenticate, request_host, AuthOutcome};
use crate::handlers;
use crate::state::AppState;
use crate::upstream::proxy;
use axum::{
    extract::{ConnectInfo, Request, State},
    http::{Method, StatusCode},
    middleware::Next,
    response::Response,
    routing::get,
    Router,
};
use governor::middleware::NoOpMiddleware;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfig, key_extractor::SmartIpKeyExtractor, GovernorLayer};
use tower_http::trace::TraceLayer;

/// Rate-limit configuration applied to the manual sign-in route.
pub type SignInRateLimit = Arc<GovernorConfig<SmartIpKeyExtractor, NoOpMiddleware>>;

/// Builds the complete application router.
///
/// `sign_in_rate_limit` throttles the credential-bearing sign-in route;
/// tests pass `None` because the key extractor needs a real peer address.
pub fn create_router(state: AppState, sign_in_rate_limit: Option<SignInRateLimit>) -> Router {
    let prefix = state.config.proxy_prefix.clone();

    let mut sign_in_routes = get(handlers::sign_in).post(handlers::manual_sign_in);
    if let Some(config) = sign_in_rate_limit {
        sign_in_routes = sign_in_routes.route_layer(GovernorLayer::new(config));
    }

    Router::new()
        .route("/robots.txt", get(handlers::robots_txt))
        .route("/ping", get(handlers::ping))
        .route(&format!("{}/metrics", prefix), get(handlers::metrics))
        .route(&format!("{}/sign_in", prefix), sign_in_routes)
        .route(&format!("{}/sign_out", prefix), get(handlers::sign_out))
        .route(&format!("{}/start", prefix), get(handlers::oauth_start))
        .route(&format!("{}/callback", prefix), get(handlers::oauth_callback))
        .route(&format!("{}/auth", prefix), get(handlers::auth_only))
        .fallback(proxy_or_start)
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            track_metrics,
        ))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Histogram label for a request path.
fn classify_handler(prefix: &str, path: &str) -> &'static str {
    match path {
        "/ping" => "ping",
        "/robots.txt" => "robots",
        _ => match path.strip_prefix(prefix) {
            Some("/sign_in") => "sign_in",
            Some("/sign_out") => "sign_out",
            Some("/start") => "oauth_start",
            Some("/callback") => "oauth_callback",
            Some("/auth") => "auth",
            _ => "proxy",
        },
    }
}

/// Observes request latency per `{handler, code}`; the metrics exposition
/// endpoint itself is not measured.
async fn track_metrics(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let path = req.uri().path().to_string();
    let prefix = state.config.proxy_prefix.as_str();
    if path == format!("{}/metrics", prefix) {
        return next.run(req).await;
    }

    let handler = classify_handler(prefix, &path);
    let start = std::time::Instant::now();
    let response = next.run(req).await;
    state
        .metrics
        .observe(handler, response.status(), start.elapsed().as_secs_f64());
    response
}

/// Whether the request bypasses authentication entirely.
fn is_whitelisted(state: &AppState, req: &Request) -> bool {
    if state.config.skip_auth_preflight && req.method() == Method::OPTIONS {
        return true;
    }
    let path = req.uri().path();
    state
        .config
        .skip_auth_regex
        .iter()
        .any(|pattern| pattern.is_match(path))
}

/// Resolves the upstream and forwards the request.
async fn dispatch(state: &AppState, gap_auth: Option<&str>, req: Request) -> Response {
    let path = req.uri().path();
    let Some(upstream) = state.registry.resolve(path) else {
        return handlers::error_response(StatusCode::NOT_FOUND, "Not Found", "Not Found");
    };
    let client_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| *addr);
    proxy::dispatch(
        &state.http,
        &state.config,
        upstream,
        gap_auth,
        client_addr,
        req,
    )
    .await
}

/// Fallback for every path the proxy does not serve itself:
/// authenticate-and-forward, or surface the sign-in flow.
async fn proxy_or_start(State(state): State<AppState>, mut req: Request) -> Response {
    if is_whitelisted(&state, &req) {
        return dispatch(&state, None, req).await;
    }

    let result = authenticate(&state, &mut req).await;
    match result.outcome {
        AuthOutcome::Accepted(session) => {
            let identity = session.identity().to_string();
            let mut response = dispatch(&state, Some(identity.as_str()), req).await;
            for (name, value) in result.response_headers.iter() {
                response.headers_mut().insert(name.clone(), value.clone());
            }
            handlers::apply_cookies(&mut response, &result.cookies);
            response
        }
        AuthOutcome::Forbidden => {
            let host = request_host(req.headers());
            let redirect = handlers::sanitize_redirect(
                req.uri()
                    .path_and_query()
                    .map(|pq| pq.as_str())
                    .unwrap_or("/"),
            );
            let mut response = if state.config.skip_provider_button {
                handlers::start_oauth_flow(&state, &host, &redirect, Vec::new())
            } else {
                handlers::render_sign_in(&state, &host, &redirect, StatusCode::FORBIDDEN)
            };
            handlers::apply_cookies(&mut response, &result.cookies);
            response
        }
        AuthOutcome::InternalError => handlers::error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal Error",
            "Internal Error",
        ),
    }
}
