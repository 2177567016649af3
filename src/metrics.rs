//! Request Metrics
//!
//! A per-instance metrics registry injected into the router, so tests get
//! isolated counters instead of process-wide singletons. Every handler
//! except the exposition endpoint is observed by a latency histogram keyed
//! by `{handler, code}`.

use axum::http::StatusCode;
use prometheus::{Encoder, HistogramOpts, HistogramVec, Registry, TextEncoder};

pub struct Metrics {
    registry: Registry,
    request_duration: HistogramVec,
}

impl Metrics {
    pub fn new() -> Result<Self, String> {
        let registry = Registry::new();
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "authgate_request_duration_seconds",
                "Request latency by handler and response code",
            ),
            &["handler", "code"],
        )
        .map_err(|e| format!("could not create request histogram: {}", e))?;
        registry
            .register(Box::new(request_duration.clone()))
            .map_err(|e| format!("could not register request histogram: {}", e))?;
        Ok(Metrics {
            registry,
            request_duration,
        })
    }

    /// Records one handled request.
    pub fn observe(&self, handler: &str, code: StatusCode, seconds: f64) {
        self.request_duration
            .with_label_values(&[handler, code.as_str()])
            .observe(seconds);
    }

    /// Renders the registry in the Prometheus text format.
    pub fn exposition(&self) -> Result<String, String> {
        let mut buffer = Vec::new();
        let encoder = TextEncoder::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| format!("metrics encoding failed: {}", e))?;
        String::from_utf8(buffer).map_err(|e| format!("metrics encoding failed: {}", e))
    }
}
