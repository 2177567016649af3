//! Upstream Dispatch Handler
//!
//! Forwards one authenticated (or whitelisted) request to its resolved
//! upstream: reverse proxy for `http`/`https` targets, static file serving
//! for `file` targets, and a raw bidirectional byte pump for WebSocket
//! upgrades. The outgoing request preserves the verbatim inbound
//! path-and-query so encoded slashes survive the hop.

use super::signature::sign_request;
use super::{Upstream, UpstreamTarget};
use crate::config::ProxyConfig;
use axum::{
    body::Body,
    extract::Request,
    http::{header, HeaderMap, HeaderValue, StatusCode, Uri},
    response::Response,
};
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::path::Path;
use tower::ServiceExt;
use tower_http::services::ServeDir;

/// Response header naming the upstream that served the request.
pub const GAP_UPSTREAM_ADDRESS: &str = "gap-upstream-address";

/// Request/response header carrying the authenticated identity.
pub const GAP_AUTH: &str = "gap-auth";

/// Request header carrying the proxy's HMAC over the forwarded request.
pub const GAP_SIGNATURE: &str = "gap-signature";

/// Hop-by-hop headers that must not cross the proxy boundary.
const HOP_BY_HOP: [&str; 8] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Whether the request asks for a WebSocket upgrade.
///
/// Both `Connection: upgrade` (possibly in a token list) and
/// `Upgrade: websocket` must be present, compared case-insensitively.
pub fn is_websocket_upgrade(headers: &HeaderMap) -> bool {
    let connection_upgrade = headers.get_all(header::CONNECTION).iter().any(|value| {
        value
            .to_str()
            .map(|tokens| {
                tokens
                    .split(',')
                    .any(|token| token.trim().eq_ignore_ascii_case("upgrade"))
            })
            .unwrap_or(false)
    });
    let upgrade_websocket = headers
        .get(header::UPGRADE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    connection_upgrade && upgrade_websocket
}

/// `host[:port]` of a proxy base URL.
fn authority(base: &url::Url) -> String {
    let host = base.host_str().unwrap_or_default();
    match base.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    }
}

fn bad_gateway(detail: &str) -> Response {
    tracing::error!("Upstream dispatch failed: {}", detail);
    Response::builder()
        .status(StatusCode::BAD_GATEWAY)
        .header(header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from("Bad Gateway"))
        .unwrap_or_default()
}

/// Dispatches one request to its resolved upstream.
///
/// `gap_auth` is the authenticated identity the authenticator placed on the
/// response; when request signing is configured it is copied onto the
/// outgoing request before the signature is computed.
pub async fn dispatch(
    client: &reqwest::Client,
    config: &ProxyConfig,
    upstream: &Upstream,
    gap_auth: Option<&str>,
    client_addr: Option<SocketAddr>,
    req: Request,
) -> Response {
    let mut response = match &upstream.target {
        UpstreamTarget::Files { root } => serve_files(root, &upstream.prefix, req).await,
        UpstreamTarget::Proxy { base } => {
            if is_websocket_upgrade(req.headers()) {
                proxy_websocket(client, config, base, req).await
            } else {
                proxy_http(client, config, base, gap_auth, client_addr, req).await
            }
        }
    };

    if let Ok(address) = HeaderValue::from_str(&upstream.address()) {
        response.headers_mut().insert(GAP_UPSTREAM_ADDRESS, address);
    }
    response
}

/// Serves a `file:` upstream with the registered prefix stripped.
async fn serve_files(root: &Path, prefix: &str, req: Request) -> Response {
    let path = req.uri().path();
    let stripped = path
        .strip_prefix(prefix.trim_end_matches('/'))
        .unwrap_or(path);
    let rewritten = if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{}", stripped)
    };

    let (mut parts, body) = req.into_parts();
    parts.uri = rewritten.parse::<Uri>().unwrap_or_else(|_| Uri::from_static("/"));
    let req = Request::from_parts(parts, body);

    match ServeDir::new(root).oneshot(req).await {
        Ok(response) => response.map(Body::new),
        Err(err) => bad_gateway(&format!("file serve error: {}", err)),
    }
}

/// Builds the outgoing header set: inbound headers minus hop-by-hop, with
/// the Host header rewritten unless `pass_host_header` keeps the original.
fn outgoing_headers(config: &ProxyConfig, base: &url::Url, inbound: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(inbound.len());
    for (name, value) in inbound {
        if HOP_BY_HOP.contains(&name.as_str()) || name == &header::CONTENT_LENGTH {
            continue;
        }
        if name == &header::HOST && !config.pass_host_header {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    if !config.pass_host_header {
        if let Ok(host) = HeaderValue::from_str(&authority(base)) {
            headers.insert(header::HOST, host);
        }
    }
    headers
}

/// Appends the client address to `X-Forwarded-For`.
fn append_forwarded_for(headers: &mut HeaderMap, client_addr: Option<SocketAddr>) {
    let Some(addr) = client_addr else { return };
    let ip = addr.ip().to_string();
    let combined = match headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        Some(existing) => format!("{}, {}", existing, ip),
        None => ip,
    };
    if let Ok(value) = HeaderValue::from_str(&combined) {
        headers.insert("x-forwarded-for", value);
    }
}

/// Regular reverse-proxy path: forward the request, stream the response.
async fn proxy_http(
    client: &reqwest::Client,
    config: &ProxyConfig,
    base: &url::Url,
    gap_auth: Option<&str>,
    client_addr: Option<SocketAddr>,
    req: Request,
) -> Response {
    // The verbatim inbound path-and-query keeps encoded slashes intact.
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/")
        .to_string();
    let target = format!("{}://{}{}", base.scheme(), authority(base), path_and_query);

    let (parts, body) = req.into_parts();
    let mut headers = outgoing_headers(config, base, &parts.headers);
    append_forwarded_for(&mut headers, client_addr);

    let builder = client.request(parts.method.clone(), &target);
    let builder = if let Some(key) = &config.signature_key {
        // Signing needs the whole body; buffer it and sign the canonical
        // tuple of method, headers and payload.
        if let Some(identity) = gap_auth {
            if let Ok(value) = HeaderValue::from_str(identity) {
                headers.insert(GAP_AUTH, value);
            }
        }
        let body = match axum::body::to_bytes(body, usize::MAX).await {
            Ok(bytes) => bytes,
            Err(err) => return bad_gateway(&format!("request body read error: {}", err)),
        };
        let signature = sign_request(key, parts.method.as_str(), &path_and_query, &headers, &body);
        if let Ok(value) = HeaderValue::from_str(&signature) {
            headers.insert(GAP_SIGNATURE, value);
        }
        builder.headers(headers).body(body)
    } else {
        builder
            .headers(headers)
            .body(reqwest::Body::wrap_stream(body.into_data_stream()))
    };

    let upstream_response = match builder.send().await {
        Ok(response) => response,
        Err(err) => return bad_gateway(&format!("{}", err)),
    };

    let mut response = Response::builder().status(upstream_response.status());
    if let Some(response_headers) = response.headers_mut() {
        for (name, value) in upstream_response.headers() {
            if HOP_BY_HOP.contains(&name.as_str()) {
                continue;
            }
            response_headers.append(name.clone(), value.clone());
        }
    }
    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .unwrap_or_else(|_| bad_gateway("response assembly failed"))
}

/// WebSocket path: relay the handshake, then pump bytes both ways until
/// either side closes.
async fn proxy_websocket(
    client: &reqwest::Client,
    config: &ProxyConfig,
    base: &url::Url,
    req: Request,
) -> Response {
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("{}://{}{}", base.scheme(), authority(base), path_and_query);

    let (mut parts, _body) = req.into_parts();
    let on_upgrade = parts.extensions.remove::<hyper::upgrade::OnUpgrade>();

    // The handshake must keep its upgrade headers, so only Host handling
    // follows the regular policy here.
    let mut headers = parts.headers.clone();
    if !config.pass_host_header {
        match HeaderValue::from_str(&authority(base)) {
            Ok(host) => {
                headers.insert(header::HOST, host);
            }
            Err(_) => {
                headers.remove(header::HOST);
            }
        }
    }

    let upstream_response = match client
        .request(parts.method.clone(), &target)
        .headers(headers)
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => return bad_gateway(&format!("websocket dial error: {}", err)),
    };

    if upstream_response.status() != StatusCode::SWITCHING_PROTOCOLS {
        // Upstream declined the upgrade; relay its answer as-is.
        let mut response = Response::builder().status(upstream_response.status());
        if let Some(response_headers) = response.headers_mut() {
            for (name, value) in upstream_response.headers() {
                response_headers.append(name.clone(), value.clone());
            }
        }
        return response
            .body(Body::from_stream(upstream_response.bytes_stream()))
            .unwrap_or_else(|_| bad_gateway("response assembly failed"));
    }

    let Some(on_upgrade) = on_upgrade else {
        return bad_gateway("inbound connection cannot be hijacked");
    };

    let mut response = Response::builder().status(StatusCode::SWITCHING_PROTOCOLS);
    if let Some(response_headers) = response.headers_mut() {
        for (name, value) in upstream_response.headers() {
            response_headers.append(name.clone(), value.clone());
        }
    }

    tokio::spawn(async move {
        let upstream_io = match upstream_response.upgrade().await {
            Ok(io) => io,
            Err(err) => {
                tracing::warn!("Upstream websocket upgrade failed: {}", err);
                return;
            }
        };
        let client_io = match on_upgrade.await {
            Ok(io) => io,
            Err(err) => {
                tracing::warn!("Client websocket upgrade failed: {}", err);
                return;
            }
        };

        let mut client_io = TokioIo::new(client_io);
        let mut upstream_io = upstream_io;
        match tokio::io::copy_bidirectional(&mut client_io, &mut upstream_io).await {
            Ok((to_upstream, to_client)) => {
                tracing::debug!(to_upstream, to_client, "Websocket relay closed");
            }
            Err(err) => {
                tracing::debug!("Websocket relay ended with error: {}", err);
            }
        }
    });

    response.body(Body::empty()).unwrap_or_else(|_| bad_gateway("response assembly failed"))
}
