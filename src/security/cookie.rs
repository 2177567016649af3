//! Sealed Session Cookie Codec
//!
//! This module seals the session payload into a tamper-evident cookie value
//! and verifies it on the way back in. The proxy keeps no server-side session
//! table: the cookie is the session.
//!
//! # Wire Format
//! `<payload>|<unix_timestamp>|<hmac>`
//! - `payload`: base64url (unpadded) session body, optionally encrypted
//! - `unix_timestamp`: seconds since epoch at signing time
//! - `hmac`: base64url HMAC-SHA256 over `cookie_name + payload + timestamp`
//!
//! # Security Features
//! - HMAC-SHA256 signing (prevents forgery)
//! - Constant-time signature comparison (prevents timing attacks)
//! - Bounded age with a small clock-skew tolerance for future timestamps
//! - Optional AES-GCM encryption of persisted token material

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{AesGcm, Aes128Gcm, Aes256Gcm, Nonce};
use base64ct::{Base64UrlUnpadded, Encoding};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use std::time::Duration;
use subtle::ConstantTimeEq;

/// HMAC-SHA256 type alias for cookie signing
type HmacSha256 = Hmac<Sha256>;

/// AES-192-GCM is not aliased by the aes-gcm crate; build it from the generic.
type Aes192Gcm = AesGcm<aes_gcm::aes::Aes192, aes_gcm::aead::consts::U12>;

/// Tolerated forward clock drift between signer and verifier.
const CLOCK_SKEW: Duration = Duration::from_secs(5);

/// Length of the random CSRF nonce in bytes.
const NONCE_LENGTH: usize = 16;

/// Keyed signer/verifier for sealed cookie values.
#[derive(Clone)]
pub struct SealKey {
    secret: Vec<u8>,
}

impl SealKey {
    pub fn new(secret: &str) -> Self {
        SealKey {
            secret: secret.as_bytes().to_vec(),
        }
    }

    /// Computes the MAC over `name + payload + timestamp`.
    fn mac(&self, name: &str, payload: &str, timestamp: i64) -> Vec<u8> {
        let mut mac = <HmacSha256 as Mac>::new_from_slice(&self.secret)
            .expect("HMAC accepts keys of any length");
        mac.update(name.as_bytes());
        mac.update(payload.as_bytes());
        mac.update(timestamp.to_string().as_bytes());
        mac.finalize().into_bytes().to_vec()
    }

    /// Seals `value` into the signed wire format.
    pub fn sign(&self, name: &str, value: &str, now: DateTime<Utc>) -> String {
        let payload = Base64UrlUnpadded::encode_string(value.as_bytes());
        let timestamp = now.timestamp();
        let signature = Base64UrlUnpadded::encode_string(&self.mac(name, &payload, timestamp));
        format!("{}|{}|{}", payload, timestamp, signature)
    }

    /// Verifies a sealed value and returns the payload with its issue time.
    ///
    /// Returns `None` when the value is malformed, the signature does not
    /// match, the cookie is older than `max_age`, or the timestamp lies in
    /// the future beyond the clock-skew tolerance. Callers treat all of
    /// these as "no session".
    pub fn verify(
        &self,
        sealed: &str,
        name: &str,
        max_age: Duration,
        now: DateTime<Utc>,
    ) -> Option<(String, DateTime<Utc>)> {
        let mut parts = sealed.split('|');
        let payload = parts.next()?;
        let timestamp_str = parts.next()?;
        let signature = parts.next()?;
        if parts.next().is_some() {
            return None;
        }

        let timestamp: i64 = timestamp_str.parse().ok()?;

        // Signature first: reject forgeries before trusting the timestamp.
        let expected = self.mac(name, payload, timestamp);
        let provided = Base64UrlUnpadded::decode_vec(signature).ok()?;
        if expected.len() != provided.len() || !bool::from(expected.ct_eq(&provided)) {
            return None;
        }

        let issued_at = DateTime::<Utc>::from_timestamp(timestamp, 0)?;
        if issued_at > now + chrono::Duration::from_std(CLOCK_SKEW).ok()? {
            return None;
        }
        let age = now.signed_duration_since(issued_at);
        if age > chrono::Duration::from_std(max_age).ok()? {
            return None;
        }

        let decoded = Base64UrlUnpadded::decode_vec(payload).ok()?;
        let value = String::from_utf8(decoded).ok()?;
        Some((value, issued_at))
    }
}

/// Generates the random CSRF nonce: 16 bytes, base64url encoded.
///
/// # Errors
/// Returns an error when the OS random source fails; the caller surfaces
/// this as an internal error rather than issuing a weak nonce.
pub fn nonce() -> Result<String, String> {
    let mut bytes = [0u8; NONCE_LENGTH];
    rand::rngs::OsRng
        .try_fill_bytes(&mut bytes)
        .map_err(|e| format!("random source failure: {}", e))?;
    Ok(Base64UrlUnpadded::encode_string(&bytes))
}

/// AES-GCM cipher for session token fields, keyed by the cookie secret.
///
/// The key length selects the AES variant; any other secret length rejects
/// configuration. Each encryption draws a fresh 96-bit nonce which is
/// carried in front of the ciphertext.
#[derive(Clone)]
pub enum SessionCipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl SessionCipher {
    /// Builds a cipher from a 16-, 24- or 32-byte secret.
    pub fn new(secret: &str) -> Result<Self, String> {
        let key = secret.as_bytes();
        match key.len() {
            16 => Ok(SessionCipher::Aes128(Box::new(
                Aes128Gcm::new_from_slice(key).map_err(|e| e.to_string())?,
            ))),
            24 => Ok(SessionCipher::Aes192(Box::new(
                Aes192Gcm::new_from_slice(key).map_err(|e| e.to_string())?,
            ))),
            32 => Ok(SessionCipher::Aes256(Box::new(
                Aes256Gcm::new_from_slice(key).map_err(|e| e.to_string())?,
            ))),
            other => Err(format!(
                "cookie secret must be 16, 24 or 32 bytes to enable encryption, got {}",
                other
            )),
        }
    }

    fn seal(&self, nonce: &Nonce<aes_gcm::aead::consts::U12>, plaintext: &[u8]) -> Result<Vec<u8>, String> {
        let result = match self {
            SessionCipher::Aes128(cipher) => cipher.encrypt(nonce, plaintext),
            SessionCipher::Aes192(cipher) => cipher.encrypt(nonce, plaintext),
            SessionCipher::Aes256(cipher) => cipher.encrypt(nonce, plaintext),
        };
        result.map_err(|_| "session encryption failed".to_string())
    }

    fn open(&self, nonce: &Nonce<aes_gcm::aead::consts::U12>, ciphertext: &[u8]) -> Result<Vec<u8>, String> {
        let result = match self {
            SessionCipher::Aes128(cipher) => cipher.decrypt(nonce, ciphertext),
            SessionCipher::Aes192(cipher) => cipher.decrypt(nonce, ciphertext),
            SessionCipher::Aes256(cipher) => cipher.decrypt(nonce, ciphertext),
        };
        result.map_err(|_| "session decryption failed".to_string())
    }

    /// Encrypts a field value, returning base64url(nonce || ciphertext).
    pub fn encrypt(&self, plaintext: &str) -> Result<String, String> {
        let mut nonce_bytes = [0u8; 12];
        rand::rngs::OsRng
            .try_fill_bytes(&mut nonce_bytes)
            .map_err(|e| format!("random source failure: {}", e))?;
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self.seal(nonce, plaintext.as_bytes())?;

        let mut payload = Vec::with_capacity(12 + ciphertext.len());
        payload.extend_from_slice(&nonce_bytes);
        payload.extend_from_slice(&ciphertext);
        Ok(Base64UrlUnpadded::encode_string(&payload))
    }

    /// Inverts [`SessionCipher::encrypt`].
    pub fn decrypt(&self, encoded: &str) -> Result<String, String> {
        let payload =
            Base64UrlUnpadded::decode_vec(encoded).map_err(|_| "invalid field encoding".to_string())?;
        if payload.len() < 12 {
            return Err("encrypted field too short".to_string());
        }
        let (nonce_bytes, ciphertext) = payload.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.open(nonce, ciphertext)?;
        String::from_utf8(plaintext).map_err(|_| "decrypted field is not UTF-8".to_string())
    }
}
