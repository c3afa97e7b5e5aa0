//! Health check handlers for the ForgeSyte server.
//!
//! This module provides HTTP handlers for health and readiness checks.
//!
//! # Endpoints
//!
//! - `GET /livez` - Returns 200/OK if the server is alive (basic liveness check)
//! - `GET /readyz` - Returns 200/OK if the server is ready to serve requests
//!
//! # Response Format
//!
//! Both endpoints support content negotiation:
//! - `Accept: application/json` returns `{"status": "live|ready|not live|not ready"}`
//! - Default returns plain text `"live"`, `"ready"`, `"not live"`, or `"not ready"`
//!
//! # Notes
//!
//! Readiness covers the worker loop as well: once a job manager is
//! installed, a stale worker heartbeat (beyond the configured liveness
//! window) reports not ready.

use std::sync::Arc;

use axum::http::{HeaderMap, StatusCode};
use axum::{extract::State, response::Response};
use serde_json::json;

use crate::state::ForgeState;

/// Liveness check handler.
///
/// # Endpoint
/// `GET /livez`
///
/// # Returns
/// - 200 OK with "live" if the server is alive
/// - 503 Service Unavailable with "not live" if the server is not alive
pub async fn livez(State(state): State<Arc<ForgeState>>, headers: HeaderMap) -> Response {
    tracing::debug!("livez_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let (status, text) = if state.is_alive() {
        (StatusCode::OK, "live")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not live")
    };

    let body = if accept.contains("application/json") {
        json!({ "status": text }).to_string()
    } else {
        text.to_string()
    };

    Response::builder()
        .status(status)
        .header(
            "Content-Type",
            if accept.contains("application/json") {
                "application/json"
            } else {
                "text/plain"
            },
        )
        .body(body.into())
        .unwrap()
}

/// Readiness check handler.
///
/// # Endpoint
/// `GET /readyz`
///
/// # Returns
/// - 200 OK with "ready" if the server is ready
/// - 503 Service Unavailable with "not ready" if the server is not ready
pub async fn readyz(State(state): State<Arc<ForgeState>>, headers: HeaderMap) -> Response {
    tracing::debug!("readyz_handler invoked");

    let accept = headers
        .get("accept")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // Consider both application readiness and the worker heartbeat.
    let app_ready = state.is_ready();
    let worker_ready = match state.jobs() {
        Ok(_) => state.worker_alive(state.options().heartbeat_window),
        Err(_) => true, // no worker configured, nothing to probe
    };

    let (status, text) = if app_ready && worker_ready {
        (StatusCode::OK, "ready")
    } else {
        tracing::debug!(
            "Server not ready: app_ready={}, worker_ready={}",
            app_ready,
            worker_ready
        );
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    };

    let body = if accept.contains("application/json") {
        json!({ "status": text }).to_string()
    } else {
        text.to_string()
    };

    Response::builder()
        .status(status)
        .header(
            "Content-Type",
            if accept.contains("application/json") {
                "application/json"
            } else {
                "text/plain"
            },
        )
        .body(body.into())
        .unwrap()
}
