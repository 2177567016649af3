use authgate::security::cookie::{nonce, SealKey, SessionCipher};
use chrono::{Duration, Utc};
use std::time::Duration as StdDuration;

const COOKIE_NAME: &str = "_authgate";
const MAX_AGE: StdDuration = StdDuration::from_secs(3600);

#[test]
fn test_seal_roundtrip() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let now = Utc::now();

    let sealed = seal.sign(COOKIE_NAME, "email@example.com user", now);
    let (value, issued_at) = seal
        .verify(&sealed, COOKIE_NAME, MAX_AGE, now)
        .expect("freshly sealed cookie must verify");

    assert_eq!(value, "email@example.com user");
    assert_eq!(issued_at.timestamp(), now.timestamp());
}

#[test]
fn test_seal_rejects_tampering() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let now = Utc::now();
    let sealed = seal.sign(COOKIE_NAME, "payload", now);

    // Flipping any single character of payload, timestamp or MAC must fail
    // verification.
    for index in 0..sealed.len() {
        let original = sealed.as_bytes()[index];
        if original == b'|' {
            continue;
        }
        let flipped = if original == b'A' { b'B' } else { b'A' };
        let mut tampered = sealed.clone().into_bytes();
        tampered[index] = flipped;
        let tampered = String::from_utf8(tampered).unwrap();
        assert!(
            seal.verify(&tampered, COOKIE_NAME, MAX_AGE, now).is_none(),
            "tampered byte {} must not verify",
            index
        );
    }
}

#[test]
fn test_seal_rejects_wrong_cookie_name() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let now = Utc::now();
    let sealed = seal.sign(COOKIE_NAME, "payload", now);
    assert!(seal.verify(&sealed, "_other", MAX_AGE, now).is_none());
}

#[test]
fn test_seal_rejects_wrong_key() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let other = SealKey::new("fedcba9876543210fedcba9876543210");
    let now = Utc::now();
    let sealed = seal.sign(COOKIE_NAME, "payload", now);
    assert!(other.verify(&sealed, COOKIE_NAME, MAX_AGE, now).is_none());
}

#[test]
fn test_seal_rejects_expired() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let issued = Utc::now() - Duration::hours(2);
    let sealed = seal.sign(COOKIE_NAME, "payload", issued);
    assert!(seal
        .verify(&sealed, COOKIE_NAME, MAX_AGE, Utc::now())
        .is_none());
}

#[test]
fn test_seal_rejects_future_timestamp() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let future = Utc::now() + Duration::minutes(5);
    let sealed = seal.sign(COOKIE_NAME, "payload", future);
    // Beyond clock-skew tolerance: must be treated as forged.
    assert!(seal
        .verify(&sealed, COOKIE_NAME, MAX_AGE, Utc::now())
        .is_none());
}

#[test]
fn test_seal_accepts_small_skew() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let now = Utc::now();
    let slightly_ahead = now + Duration::seconds(2);
    let sealed = seal.sign(COOKIE_NAME, "payload", slightly_ahead);
    assert!(seal.verify(&sealed, COOKIE_NAME, MAX_AGE, now).is_some());
}

#[test]
fn test_seal_rejects_malformed() {
    let seal = SealKey::new("0123456789abcdef0123456789abcdef");
    let now = Utc::now();
    for sealed in ["", "abc", "a|b", "a|b|c|d", "payload|notanumber|mac"] {
        assert!(seal.verify(sealed, COOKIE_NAME, MAX_AGE, now).is_none());
    }
}

#[test]
fn test_nonce_shape() {
    let first = nonce().expect("nonce generation");
    let second = nonce().expect("nonce generation");
    // 16 random bytes, base64url unpadded
    assert_eq!(first.len(), 22);
    assert_ne!(first, second);
    assert!(first
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
}

#[test]
fn test_cipher_roundtrip_all_key_sizes() {
    for secret in [
        "0123456789abcdef",                 // AES-128
        "0123456789abcdef01234567",         // AES-192
        "0123456789abcdef0123456789abcdef", // AES-256
    ] {
        let cipher = SessionCipher::new(secret).expect("valid key length");
        let encrypted = cipher.encrypt("an access token").expect("encrypt");
        assert_ne!(encrypted, "an access token");
        let decrypted = cipher.decrypt(&encrypted).expect("decrypt");
        assert_eq!(decrypted, "an access token");
    }
}

#[test]
fn test_cipher_rejects_bad_key_length() {
    assert!(SessionCipher::new("short").is_err());
    assert!(SessionCipher::new("0123456789abcdef0").is_err());
    assert!(SessionCipher::new("").is_err());
}

#[test]
fn test_cipher_nonce_freshness() {
    let cipher = SessionCipher::new("0123456789abcdef").unwrap();
    let first = cipher.encrypt("token").unwrap();
    let second = cipher.encrypt("token").unwrap();
    assert_ne!(first, second);
}

#[test]
fn test_cipher_rejects_tampered_payload() {
    let cipher = SessionCipher::new("0123456789abcdef").unwrap();
    let encrypted = cipher.encrypt("token").unwrap();
    let mut tampered = encrypted.into_bytes();
    let last = tampered.len() - 1;
    tampered[last] = if tampered[last] == b'A' { b'B' } else { b'A' };
    let tampered = String::from_utf8(tampered).unwrap();
    assert!(cipher.decrypt(&tampered).is_err());
}
