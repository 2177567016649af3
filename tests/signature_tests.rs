use authgate::config::{SignatureAlgo, SignatureKey};
use authgate::upstream::signature::{sign_request, SIGNATURE_HEADERS};
use axum::http::{HeaderMap, HeaderValue};

fn test_key() -> SignatureKey {
    SignatureKey::parse("sha256:signing-secret").expect("valid key spec")
}

#[test]
fn test_key_spec_parsing() {
    let key = SignatureKey::parse("sha256:abc").unwrap();
    assert_eq!(key.algo, SignatureAlgo::Sha256);
    assert_eq!(key.secret, "abc");

    let key = SignatureKey::parse("sha1:abc").unwrap();
    assert_eq!(key.algo, SignatureAlgo::Sha1);

    assert!(SignatureKey::parse("md5:abc").is_err());
    assert!(SignatureKey::parse("sha256:").is_err());
    assert!(SignatureKey::parse("nocolon").is_err());
}

#[test]
fn test_signature_is_deterministic() {
    let mut headers = HeaderMap::new();
    headers.insert("Content-Type", HeaderValue::from_static("text/plain"));
    headers.insert("Gap-Auth", HeaderValue::from_static("alice@example.com"));

    let first = sign_request(&test_key(), "POST", "/app?x=1", &headers, b"body");
    let second = sign_request(&test_key(), "POST", "/app?x=1", &headers, b"body");
    assert_eq!(first, second);
    assert!(first.starts_with("sha256 "));
}

#[test]
fn test_signature_covers_inputs() {
    let headers = HeaderMap::new();
    let base = sign_request(&test_key(), "GET", "/app", &headers, b"");

    assert_ne!(base, sign_request(&test_key(), "POST", "/app", &headers, b""));
    assert_ne!(base, sign_request(&test_key(), "GET", "/other", &headers, b""));
    assert_ne!(base, sign_request(&test_key(), "GET", "/app", &headers, b"x"));

    let mut with_identity = HeaderMap::new();
    with_identity.insert("Gap-Auth", HeaderValue::from_static("alice@example.com"));
    assert_ne!(base, sign_request(&test_key(), "GET", "/app", &with_identity, b""));
}

#[test]
fn test_signature_ignores_uncovered_headers() {
    let mut headers = HeaderMap::new();
    headers.insert("X-Request-Id", HeaderValue::from_static("abc123"));
    let with_extra = sign_request(&test_key(), "GET", "/app", &headers, b"");
    let without = sign_request(&test_key(), "GET", "/app", &HeaderMap::new(), b"");
    assert_eq!(with_extra, without);
}

#[test]
fn test_signature_differs_by_key() {
    let other = SignatureKey::parse("sha256:other-secret").unwrap();
    let headers = HeaderMap::new();
    assert_ne!(
        sign_request(&test_key(), "GET", "/app", &headers, b""),
        sign_request(&other, "GET", "/app", &headers, b"")
    );
}

#[test]
fn test_covered_header_list() {
    // The canonical list is part of the wire contract with upstreams.
    assert_eq!(
        SIGNATURE_HEADERS,
        [
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
        ]
    );
}
