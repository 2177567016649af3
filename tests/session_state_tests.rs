use authgate::security::cookie::SessionCipher;
use authgate::session::SessionState;
use chrono::{DateTime, Duration, Utc};

fn truncated_now() -> DateTime<Utc> {
    // The wire format carries whole seconds only.
    DateTime::<Utc>::from_timestamp(Utc::now().timestamp(), 0).unwrap()
}

#[test]
fn test_roundtrip_without_tokens() {
    let session = SessionState {
        user: "alice".to_string(),
        email: "alice@example.com".to_string(),
        ..Default::default()
    };
    let encoded = session.encode(None).expect("encode");
    assert_eq!(encoded, "alice@example.com alice");
    let decoded = SessionState::decode(&encoded, None).expect("decode");
    assert_eq!(decoded, session);
}

#[test]
fn test_roundtrip_email_only() {
    let session = SessionState {
        email: "alice@example.com".to_string(),
        ..Default::default()
    };
    let encoded = session.encode(None).expect("encode");
    assert_eq!(encoded, "alice@example.com");
    let decoded = SessionState::decode(&encoded, None).expect("decode");
    assert_eq!(decoded, session);
}

#[test]
fn test_roundtrip_with_tokens_plain() {
    let session = SessionState {
        user: "alice".to_string(),
        email: "alice@example.com".to_string(),
        access_token: "access-token".to_string(),
        refresh_token: "refresh-token".to_string(),
        expires_on: Some(truncated_now() + Duration::hours(1)),
    };
    let encoded = session.encode(None).expect("encode");
    assert_eq!(encoded.split('|').count(), 4);
    let decoded = SessionState::decode(&encoded, None).expect("decode");
    assert_eq!(decoded, session);
}

#[test]
fn test_roundtrip_with_tokens_encrypted() {
    let cipher = SessionCipher::new("0123456789abcdef0123456789abcdef").unwrap();
    let session = SessionState {
        user: "alice".to_string(),
        email: "alice@example.com".to_string(),
        access_token: "access-token".to_string(),
        refresh_token: "refresh-token".to_string(),
        expires_on: Some(truncated_now() + Duration::hours(1)),
    };
    let encoded = session.encode(Some(&cipher)).expect("encode");
    // Token material must not appear in the clear.
    assert!(!encoded.contains("access-token"));
    assert!(!encoded.contains("refresh-token"));
    let decoded = SessionState::decode(&encoded, Some(&cipher)).expect("decode");
    assert_eq!(decoded, session);
}

#[test]
fn test_roundtrip_access_token_only() {
    let session = SessionState {
        email: "alice@example.com".to_string(),
        access_token: "access-token".to_string(),
        ..Default::default()
    };
    let encoded = session.encode(None).expect("encode");
    let decoded = SessionState::decode(&encoded, None).expect("decode");
    assert_eq!(decoded, session);
    assert_eq!(decoded.refresh_token, "");
    assert!(decoded.expires_on.is_none());
}

#[test]
fn test_decode_rejects_bad_expiry() {
    assert!(SessionState::decode("a@b.c a|token|notatime|refresh", None).is_err());
}

#[test]
fn test_decode_rejects_bad_chunk_count() {
    assert!(SessionState::decode("a@b.c a|token|123", None).is_err());
    assert!(SessionState::decode("a|b|c|d|e", None).is_err());
}

#[test]
fn test_decode_with_wrong_cipher_fails() {
    let cipher = SessionCipher::new("0123456789abcdef").unwrap();
    let other = SessionCipher::new("fedcba9876543210").unwrap();
    let session = SessionState {
        email: "alice@example.com".to_string(),
        access_token: "access-token".to_string(),
        ..Default::default()
    };
    let encoded = session.encode(Some(&cipher)).expect("encode");
    assert!(SessionState::decode(&encoded, Some(&other)).is_err());
}

#[test]
fn test_identity_prefers_email() {
    let session = SessionState {
        user: "alice".to_string(),
        email: "alice@example.com".to_string(),
        ..Default::default()
    };
    assert_eq!(session.identity(), "alice@example.com");

    let user_only = SessionState {
        user: "alice".to_string(),
        ..Default::default()
    };
    assert_eq!(user_only.identity(), "alice");
}

#[test]
fn test_expiry_check() {
    let now = Utc::now();
    let expired = SessionState {
        expires_on: Some(now - Duration::minutes(1)),
        ..Default::default()
    };
    assert!(expired.is_expired(now));

    let live = SessionState {
        expires_on: Some(now + Duration::minutes(1)),
        ..Default::default()
    };
    assert!(!live.is_expired(now));

    let unbounded = SessionState::default();
    assert!(!unbounded.is_expired(now));
}

#[test]
fn test_display_redacts_tokens() {
    let session = SessionState {
        user: "alice".to_string(),
        email: "alice@example.com".to_string(),
        access_token: "super-secret-token".to_string(),
        refresh_token: "super-secret-refresh".to_string(),
        expires_on: None,
    };
    let rendered = format!("{}", session);
    assert!(!rendered.contains("super-secret"));
    assert!(rendered.contains("alice@example.com"));
}
