//! Htpasswd Credential Store
//!
//! Backs the manual sign-in form and HTTP Basic authentication with an
//! Apache htpasswd file. Two entry formats are accepted:
//! - `{SHA}` digests as produced by `htpasswd -s`
//! - bcrypt hashes (`$2a$` / `$2b$` / `$2y$`)
//!
//! The file is parsed into an in-memory snapshot. An external watcher may
//! call [`HtpasswdFile::reload`] when the file changes; lookups read the
//! current snapshot under a lightweight lock.

use base64ct::{Base64, Encoding};
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{OnceLock, RwLock};
use subtle::ConstantTimeEq;

/// A parsed credential entry.
#[derive(Debug, Clone)]
enum Entry {
    /// Base64 SHA-1 digest from a `{SHA}` line.
    Sha1(String),
    /// Full bcrypt hash string.
    Bcrypt(String),
}

/// In-memory htpasswd store with snapshot reloads.
pub struct HtpasswdFile {
    path: PathBuf,
    entries: RwLock<HashMap<String, Entry>>,
}

/// Returns a precomputed dummy bcrypt hash for timing-attack resistance.
///
/// Verifying against this hash when the user does not exist keeps the
/// response time of failed logins independent of account existence.
fn dummy_bcrypt_hash() -> &'static str {
    static DUMMY_HASH: OnceLock<String> = OnceLock::new();

    DUMMY_HASH.get_or_init(|| match bcrypt::hash("dummy", bcrypt::DEFAULT_COST) {
        Ok(hash) => hash,
        Err(err) => {
            tracing::error!("Failed to generate dummy hash: {}", err);
            "$2b$12$eImiTXuWVxfM37uY4JANjQPzMzXZjQDzqzQpMv0xoGrTplPPNaE3W".to_string()
        }
    })
}

/// Parses htpasswd file contents into an entry map.
///
/// Unsupported hash formats are skipped with a warning so one odd line does
/// not lock everyone out.
fn parse(contents: &str, origin: &Path) -> HashMap<String, Entry> {
    let mut entries = HashMap::new();
    for (lineno, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((user, hash)) = line.split_once(':') else {
            tracing::warn!(file = %origin.display(), line = lineno + 1, "Malformed htpasswd line; skipping");
            continue;
        };
        if let Some(digest) = hash.strip_prefix("{SHA}") {
            entries.insert(user.to_string(), Entry::Sha1(digest.to_string()));
        } else if hash.starts_with("$2a$") || hash.starts_with("$2b$") || hash.starts_with("$2y$") {
            entries.insert(user.to_string(), Entry::Bcrypt(hash.to_string()));
        } else {
            tracing::warn!(
                file = %origin.display(),
                line = lineno + 1,
                "Unsupported htpasswd hash format; skipping (use htpasswd -s or bcrypt)"
            );
        }
    }
    entries
}

impl HtpasswdFile {
    /// Loads the htpasswd file at `path`.
    pub fn load(path: &str) -> Result<Self, String> {
        let path = PathBuf::from(path);
        let contents = std::fs::read_to_string(&path)
            .map_err(|e| format!("could not read htpasswd file '{}': {}", path.display(), e))?;
        let entries = parse(&contents, &path);
        tracing::info!(file = %path.display(), users = entries.len(), "Loaded htpasswd file");
        Ok(HtpasswdFile {
            path,
            entries: RwLock::new(entries),
        })
    }

    /// Re-reads the backing file, swapping in a fresh snapshot.
    pub fn reload(&self) -> Result<(), String> {
        let contents = std::fs::read_to_string(&self.path)
            .map_err(|e| format!("could not read htpasswd file '{}': {}", self.path.display(), e))?;
        let fresh = parse(&contents, &self.path);
        let mut entries = self.entries.write().expect("htpasswd lock poisoned");
        *entries = fresh;
        Ok(())
    }

    /// Validates a username/password pair against the current snapshot.
    pub fn validate(&self, user: &str, password: &str) -> bool {
        let entry = {
            let entries = self.entries.read().expect("htpasswd lock poisoned");
            entries.get(user).cloned()
        };

        match entry {
            Some(Entry::Sha1(expected)) => {
                let digest = Sha1::digest(password.as_bytes());
                let computed = Base64::encode_string(&digest);
                computed.as_bytes().ct_eq(expected.as_bytes()).into()
            }
            Some(Entry::Bcrypt(hash)) => bcrypt::verify(password, &hash).unwrap_or(false),
            None => {
                // Burn a bcrypt verification so missing users cost the same.
                let _ = bcrypt::verify(password, dummy_bcrypt_hash());
                false
            }
        }
    }
}
