use authgate::upstream::{UpstreamRegistry, UpstreamTarget};
use url::Url;

fn urls(raw: &[&str]) -> Vec<Url> {
    raw.iter().map(|u| Url::parse(u).unwrap()).collect()
}

#[test]
fn test_longest_prefix_wins() {
    let registry = UpstreamRegistry::from_urls(&urls(&[
        "http://app.internal:8080/",
        "http://api.internal:9000/api",
        "http://deep.internal:9001/api/v2",
    ]))
    .expect("valid registry");

    let root = registry.resolve("/index.html").expect("match");
    assert_eq!(root.address(), "app.internal:8080");

    let api = registry.resolve("/api/users").expect("match");
    assert_eq!(api.address(), "api.internal:9000");

    let deep = registry.resolve("/api/v2/users").expect("match");
    assert_eq!(deep.address(), "deep.internal:9001");
}

#[test]
fn test_prefix_boundary() {
    let registry =
        UpstreamRegistry::from_urls(&urls(&["http://api.internal/api"])).expect("valid registry");

    assert!(registry.resolve("/api").is_some());
    assert!(registry.resolve("/api/users").is_some());
    // `/apiary` shares the string prefix but not the path segment.
    assert!(registry.resolve("/apiary").is_none());
    assert!(registry.resolve("/other").is_none());
}

#[test]
fn test_file_upstream_with_fragment_prefix() {
    let registry = UpstreamRegistry::from_urls(&urls(&["file:///srv/static#/assets"]))
        .expect("valid registry");

    let upstream = registry.resolve("/assets/logo.png").expect("match");
    assert_eq!(upstream.prefix, "/assets");
    match &upstream.target {
        UpstreamTarget::Files { root } => assert_eq!(root.to_string_lossy(), "/srv/static"),
        other => panic!("expected file target, got {:?}", other),
    }
}

#[test]
fn test_file_upstream_default_prefix() {
    let registry =
        UpstreamRegistry::from_urls(&urls(&["file:///srv/static"])).expect("valid registry");
    let upstream = registry.resolve("/srv/static/logo.png").expect("match");
    match &upstream.target {
        UpstreamTarget::Files { root } => assert_eq!(root.to_string_lossy(), "/srv/static"),
        other => panic!("expected file target, got {:?}", other),
    }
}

#[test]
fn test_unknown_scheme_is_fatal() {
    let err = UpstreamRegistry::from_urls(&urls(&["ftp://files.internal/"]))
        .expect_err("ftp must be rejected");
    assert!(err.contains("ftp"));
}

#[test]
fn test_proxy_address_without_port() {
    let registry =
        UpstreamRegistry::from_urls(&urls(&["https://app.internal/"])).expect("valid registry");
    assert_eq!(registry.resolve("/x").unwrap().address(), "app.internal");
}
