use authgate::handlers::sanitize_redirect;

#[test]
fn test_accepts_absolute_paths() {
    assert_eq!(sanitize_redirect("/app"), "/app");
    assert_eq!(sanitize_redirect("/app/sub?x=1&y=2"), "/app/sub?x=1&y=2");
    assert_eq!(sanitize_redirect("/"), "/");
}

#[test]
fn test_rejects_protocol_relative() {
    // `//evil.example.com` would be interpreted by browsers as a full host.
    assert_eq!(sanitize_redirect("//evil.example.com"), "/");
    assert_eq!(sanitize_redirect("//evil.example.com/app"), "/");
}

#[test]
fn test_rejects_absolute_urls() {
    assert_eq!(sanitize_redirect("https://evil.example.com"), "/");
    assert_eq!(sanitize_redirect("http://evil.example.com/x"), "/");
    assert_eq!(sanitize_redirect("javascript:alert(1)"), "/");
}

#[test]
fn test_rejects_relative_and_empty() {
    assert_eq!(sanitize_redirect(""), "/");
    assert_eq!(sanitize_redirect("app"), "/");
    assert_eq!(sanitize_redirect("../escape"), "/");
}
