//! Upstream Registry
//!
//! Maps request paths onto configured upstreams. The registry is built once
//! at startup from the `UPSTREAMS` list and is immutable afterwards:
//! - `http` / `https` URLs register a reverse-proxy target at the URL's
//!   authority, rooted at the URL's path
//! - `file` URLs register a static file tree rooted at the URL's local path;
//!   the registered prefix defaults to the URL path and may be overridden by
//!   the URL fragment
//!
//! Dispatch is by longest path-prefix match against the inbound path.

pub mod proxy;
pub mod signature;

use std::path::PathBuf;
use url::Url;

/// Where a matched request is sent.
#[derive(Debug, Clone)]
pub enum UpstreamTarget {
    /// Reverse proxy to `scheme://authority`.
    Proxy { base: Url },
    /// Static file tree with the registered prefix stripped.
    Files { root: PathBuf },
}

/// One configured upstream mapping.
#[derive(Debug, Clone)]
pub struct Upstream {
    /// Registered path prefix; `/` matches everything.
    pub prefix: String,
    pub target: UpstreamTarget,
}

impl Upstream {
    /// Host component reported in the `GAP-Upstream-Address` header.
    pub fn address(&self) -> String {
        match &self.target {
            UpstreamTarget::Proxy { base } => base
                .host_str()
                .map(|host| match base.port() {
                    Some(port) => format!("{}:{}", host, port),
                    None => host.to_string(),
                })
                .unwrap_or_default(),
            UpstreamTarget::Files { root } => root.display().to_string(),
        }
    }
}

/// Immutable path-prefix routing table.
#[derive(Debug, Clone, Default)]
pub struct UpstreamRegistry {
    upstreams: Vec<Upstream>,
}

impl UpstreamRegistry {
    /// Builds the registry from configured upstream URLs.
    ///
    /// # Errors
    /// Any scheme other than `http`, `https` or `file` rejects the
    /// configuration; startup treats this as fatal.
    pub fn from_urls(urls: &[Url]) -> Result<Self, String> {
        let mut upstreams = Vec::with_capacity(urls.len());
        for url in urls {
            match url.scheme() {
                "http" | "https" => {
                    let prefix = match url.path() {
                        "" => "/".to_string(),
                        path => path.to_string(),
                    };
                    let mut base = url.clone();
                    base.set_path("");
                    base.set_query(None);
                    base.set_fragment(None);
                    tracing::info!(prefix = %prefix, upstream = %base, "Mapping path to upstream");
                    upstreams.push(Upstream {
                        prefix,
                        target: UpstreamTarget::Proxy { base },
                    });
                }
                "file" => {
                    let root = PathBuf::from(url.path());
                    // The fragment overrides the served prefix so a tree can
                    // be mounted somewhere other than its filesystem path.
                    let prefix = match url.fragment() {
                        Some(fragment) if !fragment.is_empty() => format!("/{}", fragment.trim_start_matches('/')),
                        _ => url.path().to_string(),
                    };
                    tracing::info!(prefix = %prefix, root = %root.display(), "Mapping path to file system");
                    upstreams.push(Upstream {
                        prefix,
                        target: UpstreamTarget::Files { root },
                    });
                }
                other => {
                    return Err(format!("unknown upstream scheme '{}' in '{}'", other, url));
                }
            }
        }
        Ok(UpstreamRegistry { upstreams })
    }

    /// Resolves a request path to the longest matching upstream prefix.
    pub fn resolve(&self, path: &str) -> Option<&Upstream> {
        self.upstreams
            .iter()
            .filter(|upstream| {
                let prefix = upstream.prefix.as_str();
                if prefix == "/" {
                    return true;
                }
                let trimmed = prefix.trim_end_matches('/');
                path == trimmed || path.starts_with(&format!("{}/", trimmed))
            })
            .max_by_key(|upstream| upstream.prefix.len())
    }
}
