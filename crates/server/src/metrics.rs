//! Prometheus metrics
//!
//! Counters are emitted where the work happens (engine, outbox worker,
//! webhook); this module only installs the recorder and renders the
//! exposition endpoint.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

static HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Idempotent; the first call wins.
pub fn init_metrics() -> Option<&'static PrometheusHandle> {
    if HANDLE.get().is_none() {
        match PrometheusBuilder::new().install_recorder() {
            Ok(handle) => {
                let _ = HANDLE.set(handle);
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install Prometheus recorder");
            }
        }
    }
    HANDLE.get()
}

/// GET /metrics in Prometheus exposition format. Empty body when the
/// recorder was never installed.
pub async fn metrics_handler() -> String {
    HANDLE.get().map(PrometheusHandle::render).unwrap_or_default()
}
