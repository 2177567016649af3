//! Upstream Request Signing
//!
//! When a `SIGNATURE_KEY` is configured, every forwarded request carries a
//! deterministic HMAC in the `GAP-Signature` header so upstreams can verify
//! the request really passed through the proxy.
//!
//! # Canonical String
//! The signature covers, newline-separated: the request method, one line per
//! header in [`SIGNATURE_HEADERS`] (multiple values joined with commas,
//! missing headers contribute an empty line), the request path with query,
//! and finally the raw body bytes.

use crate::config::{SignatureAlgo, SignatureKey};
use axum::http::HeaderMap;
use base64ct::{Base64, Encoding};
use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

/// Headers covered by the request signature, in canonical order.
pub const SIGNATURE_HEADERS: [&str; 10] = [
    "Content-Length",
    "Content-Md5",
    "Content-Type",
    "Date",
    "Authorization",
    "X-Forwarded-User",
    "X-Forwarded-Email",
    "X-Forwarded-Access-Token",
    "Cookie",
    "Gap-Auth",
];

/// Builds the canonical string-to-sign for one request.
fn string_to_sign(method: &str, path_and_query: &str, headers: &HeaderMap) -> String {
    let mut canonical = String::new();
    canonical.push_str(method);
    canonical.push('\n');
    for name in SIGNATURE_HEADERS {
        let joined = headers
            .get_all(name)
            .iter()
            .filter_map(|value| value.to_str().ok())
            .collect::<Vec<_>>()
            .join(",");
        canonical.push_str(&joined);
        canonical.push('\n');
    }
    canonical.push_str(path_and_query);
    canonical.push('\n');
    canonical
}

/// Computes the `GAP-Signature` header value for a forwarded request.
pub fn sign_request(
    key: &SignatureKey,
    method: &str,
    path_and_query: &str,
    headers: &HeaderMap,
    body: &[u8],
) -> String {
    let canonical = string_to_sign(method, path_and_query, headers);
    let digest = match key.algo {
        SignatureAlgo::Sha1 => {
            let mut mac = Hmac::<Sha1>::new_from_slice(key.secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(canonical.as_bytes());
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
        SignatureAlgo::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key.secret.as_bytes())
                .expect("HMAC accepts keys of any length");
            mac.update(canonical.as_bytes());
            mac.update(body);
            mac.finalize().into_bytes().to_vec()
        }
    };
    format!("{} {}", key.algo.as_str(), Base64::encode_string(&digest))
}
