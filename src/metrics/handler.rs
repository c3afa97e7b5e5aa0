//! # Metrics HTTP Handler
//!
//! Serves Prometheus-formatted metrics at the `/metrics` endpoint when the
//! `prometheus` feature is enabled.
//!
//! ## HTTP Responses
//!
//! - `200 OK`: Metrics successfully rendered
//! - `503 Service Unavailable`: Metrics recorder not initialized
//! - `404 Not Found`: Metrics feature not compiled in

use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};

/// Global Prometheus handle for metrics rendering.
#[cfg(feature = "prometheus")]
static PROM_HANDLE: std::sync::OnceLock<metrics_exporter_prometheus::PrometheusHandle> =
    std::sync::OnceLock::new();

/// Sets the global Prometheus handle for metrics rendering. Called once
/// during server initialization; later calls are ignored.
#[cfg(feature = "prometheus")]
pub(crate) fn set_prom_handle(handle: metrics_exporter_prometheus::PrometheusHandle) {
    let _ = PROM_HANDLE.set(handle);
}

/// Builds the `/metrics` response in the Prometheus text format.
pub fn make_metrics_response() -> Response {
    #[cfg(feature = "prometheus")]
    {
        match PROM_HANDLE.get() {
            Some(handle) => (
                StatusCode::OK,
                [(
                    header::CONTENT_TYPE,
                    "text/plain; version=0.0.4; charset=utf-8",
                )],
                handle.render(),
            )
                .into_response(),
            None => (
                StatusCode::SERVICE_UNAVAILABLE,
                "metrics recorder not initialized",
            )
                .into_response(),
        }
    }
    #[cfg(not(feature = "prometheus"))]
    {
        (StatusCode::NOT_FOUND, "metrics support not compiled in").into_response()
    }
}
