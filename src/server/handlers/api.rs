/// Implementation of the plugin management API.
///
/// This module provides HTTP handlers for inspecting and exercising plugins.
///
/// # Endpoints
///
/// - `GET /v1/plugins` - List plugin summaries
/// - `GET /v1/plugins/:id/manifest` - Full manifest for one plugin
/// - `POST /v1/plugins/:id/tools/:tool/run` - Execute a tool synchronously
/// - `POST /v1/plugins/:id/reload` - Re-instantiate and swap a plugin
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::{Value, json};

use std::sync::Arc;
use std::time::Instant;

use crate::{
    errors::ForgeError,
    plugins::{ToolInput, manifest},
    sanitize::decode_image_base64,
    state::ForgeState,
};

/// Retrieves summaries of all registered plugins.
///
/// # Endpoint
/// `GET /v1/plugins`
pub async fn get_plugins(State(state): State<Arc<ForgeState>>) -> Response {
    let start = Instant::now();
    tracing::debug!("API: GET /v1/plugins");

    let summaries = state.plugin_registry.list().await;
    let response = (StatusCode::OK, Json(summaries)).into_response();

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/plugins", "GET", status, latency_ms);
    response
}

/// Retrieves the full manifest for one plugin, through the TTL cache.
///
/// # Endpoint
/// `GET /v1/plugins/:id/manifest`
pub async fn get_plugin_manifest(
    State(state): State<Arc<ForgeState>>,
    Path(plugin_id): Path<String>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: GET /v1/plugins/{}/manifest", plugin_id);

    let response =
        match manifest::manifest_for(&state.plugin_registry, &state.manifests, &plugin_id).await {
            Ok(manifest) => (StatusCode::OK, Json(manifest.as_ref().clone())).into_response(),
            Err(e) => e.into_response(),
        };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/plugins/{id}/manifest", "GET", status, latency_ms);
    response
}

/// Executes a tool on a specific plugin.
///
/// # Endpoint
/// `POST /v1/plugins/:id/tools/:tool/run`
///
/// Body: `{"input": {...}}`. An `image_base64` key inside the input is
/// decoded into raw frame bytes at this boundary — the only place base64
/// enters the process.
///
/// # Returns
/// - 200 OK with `{"output": {...}}`
/// - 400 for unknown plugin/tool or malformed input
/// - 500 on execution failure
pub async fn run_plugin_tool(
    State(state): State<Arc<ForgeState>>,
    Path((plugin_id, tool_id)): Path<(String, String)>,
    Json(payload): Json<Value>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: POST /v1/plugins/{}/tools/{}/run", plugin_id, tool_id);

    let response = match run_tool_inner(&state, &plugin_id, &tool_id, payload).await {
        Ok(output) => (StatusCode::OK, Json(json!({ "output": output }))).into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/plugins/{id}/tools/{tool}/run", "POST", status, latency_ms);
    response
}

async fn run_tool_inner(
    state: &ForgeState,
    plugin_id: &str,
    tool_id: &str,
    payload: Value,
) -> Result<Value, ForgeError> {
    let mut input_data = payload
        .get("input")
        .cloned()
        .ok_or_else(|| ForgeError::invalid_input("body must carry an 'input' object"))?;
    if !input_data.is_object() {
        return Err(ForgeError::invalid_input("'input' must be a JSON object"));
    }

    // Transport boundary: strip and decode any base64 frame data.
    let image = match input_data
        .as_object_mut()
        .and_then(|map| map.remove("image_base64"))
    {
        Some(Value::String(text)) => Some(decode_image_base64(&text)?),
        Some(_) => {
            return Err(ForgeError::invalid_input("'image_base64' must be a string"));
        }
        None => None,
    };
    let input = match image {
        Some(bytes) => ToolInput::with_image(input_data, bytes),
        None => ToolInput::from_json(input_data),
    };

    state
        .plugin_registry
        .call(plugin_id, tool_id, input)
        .await
        // This endpoint reports lookup failures as 400 (bad request names a
        // nonexistent target), not 404.
        .map_err(|e| match e.kind {
            crate::errors::ErrorKind::PluginNotFound | crate::errors::ErrorKind::ToolNotFound => {
                e.with_status(StatusCode::BAD_REQUEST)
            }
            _ => e,
        })
}

/// Re-instantiates a plugin from its factory and swaps the registration.
///
/// # Endpoint
/// `POST /v1/plugins/:id/reload`
///
/// On failure the previous registration is left intact.
pub async fn reload_plugin(
    State(state): State<Arc<ForgeState>>,
    Path(plugin_id): Path<String>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: POST /v1/plugins/{}/reload", plugin_id);

    let response = match state.plugin_registry.reload(&plugin_id).await {
        Ok(()) => {
            state.manifests.invalidate(&plugin_id);
            (
                StatusCode::OK,
                Json(json!({ "message": "plugin reloaded", "id": plugin_id })),
            )
                .into_response()
        }
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/plugins/{id}/reload", "POST", status, latency_ms);
    response
}
