//! Shared Application State
//!
//! Everything the router needs, constructed once at startup and cloned per
//! request. All fields are read-only after construction; the provider and
//! htpasswd store handle their own interior locking.

use crate::config::ProxyConfig;
use crate::metrics::Metrics;
use crate::providers::Provider;
use crate::security::cookie::{SealKey, SessionCipher};
use crate::security::htpasswd::HtpasswdFile;
use crate::upstream::UpstreamRegistry;
use crate::validation::Validator;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ProxyConfig>,
    pub provider: Arc<dyn Provider>,
    pub registry: Arc<UpstreamRegistry>,
    pub validator: Validator,
    pub htpasswd: Option<Arc<HtpasswdFile>>,
    pub seal: SealKey,
    pub cipher: Option<SessionCipher>,
    pub metrics: Arc<Metrics>,
    /// Shared client for upstream dispatch.
    pub http: reqwest::Client,
}
