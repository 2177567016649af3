use authgate::security::htpasswd::HtpasswdFile;
use std::io::Write;

/// Writes a throwaway htpasswd file and returns its path.
fn write_htpasswd(name: &str, contents: &str) -> String {
    let path = std::env::temp_dir().join(format!("authgate_htpasswd_{}_{}", name, std::process::id()));
    let mut file = std::fs::File::create(&path).expect("create htpasswd fixture");
    file.write_all(contents.as_bytes()).expect("write htpasswd fixture");
    path.to_string_lossy().into_owned()
}

#[test]
fn test_sha_entry_validates() {
    // `htpasswd -s` digest for "hunter2"
    let path = write_htpasswd("sha", "alice:{SHA}87u9ZqY9S/F0eUBXjsPQEDUw4h0=\n");
    let store = HtpasswdFile::load(&path).expect("load");

    assert!(store.validate("alice", "hunter2"));
    assert!(!store.validate("alice", "wrong"));
    assert!(!store.validate("alice", ""));
}

#[test]
fn test_bcrypt_entry_validates() {
    let hash = bcrypt::hash("s3cret pass", 4).expect("bcrypt hash");
    let path = write_htpasswd("bcrypt", &format!("bob:{}\n", hash));
    let store = HtpasswdFile::load(&path).expect("load");

    assert!(store.validate("bob", "s3cret pass"));
    assert!(!store.validate("bob", "other"));
}

#[test]
fn test_unknown_user_rejected() {
    let path = write_htpasswd("unknown", "alice:{SHA}87u9ZqY9S/F0eUBXjsPQEDUw4h0=\n");
    let store = HtpasswdFile::load(&path).expect("load");
    assert!(!store.validate("mallory", "hunter2"));
}

#[test]
fn test_malformed_lines_are_skipped() {
    let path = write_htpasswd(
        "malformed",
        "# comment\n\nnocolonhere\ncarol:{MD5}unsupported\nalice:{SHA}87u9ZqY9S/F0eUBXjsPQEDUw4h0=\n",
    );
    let store = HtpasswdFile::load(&path).expect("load");
    assert!(store.validate("alice", "hunter2"));
    assert!(!store.validate("carol", "anything"));
}

#[test]
fn test_reload_picks_up_changes() {
    let path = write_htpasswd("reload", "alice:{SHA}87u9ZqY9S/F0eUBXjsPQEDUw4h0=\n");
    let store = HtpasswdFile::load(&path).expect("load");
    assert!(store.validate("alice", "hunter2"));

    // Swap in a new credential set, as an external watcher would.
    std::fs::write(&path, "dave:{SHA}suFTwveRedQ2x/ye+TAN4aJsK6M=\n").expect("rewrite");
    store.reload().expect("reload");

    assert!(!store.validate("alice", "hunter2"));
    assert!(store.validate("dave", "Sup3rS3cret!"));
}

#[test]
fn test_missing_file_errors() {
    assert!(HtpasswdFile::load("/nonexistent/htpasswd").is_err());
}
