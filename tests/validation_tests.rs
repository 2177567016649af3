use authgate::validation::new_validator;

#[test]
fn test_wildcard_accepts_any_nonempty_email() {
    let validator = new_validator(&["*".to_string()]);
    assert!(validator("anyone@anywhere.test"));
    assert!(!validator(""));
}

#[test]
fn test_domain_suffix_match() {
    let validator = new_validator(&["example.com".to_string()]);
    assert!(validator("alice@example.com"));
    assert!(validator("ALICE@EXAMPLE.COM"));
    assert!(!validator("alice@example.org"));
    assert!(!validator("alice@notexample.com"));
    assert!(!validator(""));
}

#[test]
fn test_multiple_domains() {
    let validator = new_validator(&["example.com".to_string(), "example.org".to_string()]);
    assert!(validator("a@example.com"));
    assert!(validator("b@example.org"));
    assert!(!validator("c@example.net"));
}

#[test]
fn test_leading_at_sign_tolerated() {
    let validator = new_validator(&["@example.com".to_string()]);
    assert!(validator("alice@example.com"));
}
