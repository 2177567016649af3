// Module declarations for organizing the proxy codebase
pub mod auth; // Request authentication decision tree
pub mod config; // Environment-driven proxy configuration
pub mod handlers; // OAuth2 flow and system endpoints
pub mod metrics; // Injected request metrics registry
pub mod providers; // Identity provider contract and OIDC implementation
pub mod routes; // Route definitions
pub mod security; // Cookie sealing, ciphers, htpasswd
pub mod session; // Session state and serialization
pub mod state; // Shared application state
pub mod upstream; // Upstream registry and dispatch
pub mod validation; // Email authorization validator

use crate::metrics::Metrics;
use crate::providers::oidc::OidcProvider;
use crate::providers::ProviderData;
use crate::security::cookie::{SealKey, SessionCipher};
use crate::security::htpasswd::HtpasswdFile;
use crate::state::AppState;
use crate::upstream::UpstreamRegistry;

use dotenv::dotenv;
use std::io::ErrorKind;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tower_governor::{governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor};

/// Main application entry point.
#[tokio::main]
async fn main() {
    // Load environment variables from .env file (if present)
    dotenv().ok();

    // Initialize structured logging
    tracing_subscriber::fmt::init();

    // Configuration problems are fatal before the listener is bound.
    let config = config::load().expect("Invalid proxy configuration");
    tracing::info!(
        provider = %config.provider_name,
        prefix = %config.proxy_prefix,
        "Proxy configuration loaded"
    );

    let cipher = if config.cookie_encrypt {
        let cipher =
            SessionCipher::new(&config.cookie_secret).expect("Invalid cookie encryption secret");
        tracing::info!("Session token encryption enabled");
        Some(cipher)
    } else {
        None
    };

    let provider_data =
        ProviderData::from_config(&config).expect("Invalid provider configuration");
    let provider = OidcProvider::new(provider_data).expect("Invalid provider configuration");

    let registry =
        UpstreamRegistry::from_urls(&config.upstreams).expect("Invalid upstream configuration");

    let validator = validation::new_validator(&config.email_domains);

    let htpasswd = match &config.htpasswd_file {
        Some(path) => {
            let file = HtpasswdFile::load(path).expect("Failed to load htpasswd file");
            tracing::info!("Manual sign-in enabled");
            Some(Arc::new(file))
        }
        None => None,
    };

    let metrics = Metrics::new().expect("Failed to create metrics registry");

    let http_address = config.http_address.clone();
    let seal = SealKey::new(&config.cookie_secret);
    let state = AppState {
        config: Arc::new(config),
        provider: Arc::new(provider),
        registry: Arc::new(registry),
        validator,
        htpasswd,
        seal,
        cipher,
        metrics: Arc::new(metrics),
        // Upstream responses pass through verbatim; redirects are the
        // client's business, not the proxy's.
        http: reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("Failed to build upstream HTTP client"),
    };

    // Throttle the credential-bearing sign-in route
    let sign_in_rate_limit = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(1)
            .burst_size(5)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .expect("Failed to build governor config for sign-in route"),
    );

    let app = routes::create_router(state, Some(sign_in_rate_limit));

    tracing::info!("Starting server on {}", http_address);

    let listener = match tokio::net::TcpListener::bind(&http_address).await {
        Ok(listener) => listener,
        Err(err) => {
            if err.kind() == ErrorKind::AddrInUse {
                panic!("Failed to bind to {http_address}: address is already in use. Choose a different HTTP_ADDRESS value.");
            } else {
                panic!("Failed to bind to {http_address}: {err}");
            }
        }
    };

    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();

    let server = axum::serve(listener, make_service).with_graceful_shutdown(shutdown_signal());

    tracing::info!("Server is ready to accept connections");

    if let Err(e) = server.await {
        tracing::error!("Server error: {}", e);
    }

    tracing::info!("Server shutdown complete");
}

/// Waits for a shutdown signal and initiates graceful shutdown.
async fn shutdown_signal() {
    // Handle Ctrl+C signal (works on all platforms)
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    // Handle SIGTERM on Unix systems (used by Docker, systemd, etc.)
    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    // On non-Unix systems, SIGTERM doesn't exist, so use a pending future
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    // Wait for either Ctrl+C or SIGTERM
    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM signal");
        },
    }

    tracing::info!("Starting graceful shutdown...");
}
