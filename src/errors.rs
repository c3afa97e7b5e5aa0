//! Error taxonomy for the ForgeSyte service.
//!
//! Every failure in the core carries a machine-readable [`ErrorKind`] tag and
//! a human message. The HTTP boundary renders errors as JSON bodies of the
//! shape `{"error": {"kind": ..., "message": ..., ...detail}}` — never HTML.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use thiserror::Error;

/// Machine tags for every failure class the service can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed file, query parameter violation, or schema violation at a
    /// plugin tool input.
    InvalidInput,
    /// Registry lookup failed for a plugin id.
    PluginNotFound,
    /// Registry lookup failed for a tool id within a known plugin.
    ToolNotFound,
    /// Plugin contract violation at load or reload.
    InvalidPlugin,
    /// No pipeline definition registered under the requested id.
    PipelineNotFound,
    /// A pipeline node handler failed during execution.
    PipelineNodeFailed,
    /// The media layer could not open the video container.
    VideoOpenFailed,
    /// The media layer failed while decoding frames mid-stream.
    FrameDecodeFailed,
    /// The sanitizer rejected non-JSON-serializable content.
    JsonUnsafe,
    /// No job registered under the requested id.
    JobNotFound,
    /// Illegal transition requested on a terminal job.
    JobTerminal,
    /// Malformed realtime protocol message.
    Protocol,
    /// Per-session frame backlog overflowed.
    Backpressure,
    /// A configured deadline elapsed.
    Timeout,
    /// The operation was cancelled cooperatively.
    Cancelled,
    /// Anything else.
    Internal,
}

impl ErrorKind {
    /// The wire tag used in JSON error bodies and realtime error frames.
    pub fn as_tag(&self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "INVALID_INPUT",
            ErrorKind::PluginNotFound => "PLUGIN_NOT_FOUND",
            ErrorKind::ToolNotFound => "TOOL_NOT_FOUND",
            ErrorKind::InvalidPlugin => "INVALID_PLUGIN",
            ErrorKind::PipelineNotFound => "PIPELINE_NOT_FOUND",
            ErrorKind::PipelineNodeFailed => "PIPELINE_NODE_FAILED",
            ErrorKind::VideoOpenFailed => "VIDEO_OPEN_FAILED",
            ErrorKind::FrameDecodeFailed => "FRAME_DECODE_FAILED",
            ErrorKind::JsonUnsafe => "JSON_UNSAFE",
            ErrorKind::JobNotFound => "JOB_NOT_FOUND",
            ErrorKind::JobTerminal => "JOB_TERMINAL",
            ErrorKind::Protocol => "PROTOCOL",
            ErrorKind::Backpressure => "BACKPRESSURE",
            ErrorKind::Timeout => "TIMEOUT",
            ErrorKind::Cancelled => "CANCELLED",
            ErrorKind::Internal => "INTERNAL",
        }
    }

    /// Default HTTP status for this kind. Individual handlers may override
    /// (e.g. the tool-run endpoint reports unknown plugins as 400).
    pub fn status(&self) -> StatusCode {
        match self {
            ErrorKind::InvalidInput
            | ErrorKind::InvalidPlugin
            | ErrorKind::VideoOpenFailed
            | ErrorKind::JobTerminal
            | ErrorKind::Protocol
            | ErrorKind::Backpressure
            | ErrorKind::Cancelled => StatusCode::BAD_REQUEST,
            ErrorKind::PluginNotFound
            | ErrorKind::ToolNotFound
            | ErrorKind::PipelineNotFound
            | ErrorKind::JobNotFound => StatusCode::NOT_FOUND,
            ErrorKind::PipelineNodeFailed
            | ErrorKind::FrameDecodeFailed
            | ErrorKind::JsonUnsafe
            | ErrorKind::Timeout
            | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// A tagged service error.
///
/// `detail` carries structured context (e.g. `{"field": "output_schema"}`
/// for contract violations, or `{"available": [...]}` for lookup failures)
/// and is merged into the JSON error body.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct ForgeError {
    pub kind: ErrorKind,
    pub message: String,
    pub detail: Option<Value>,
    status_override: Option<StatusCode>,
}

impl ForgeError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: None,
            status_override: None,
        }
    }

    /// Attach structured context to the error body.
    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = Some(detail);
        self
    }

    /// Override the HTTP status the error maps to.
    pub fn with_status(mut self, status: StatusCode) -> Self {
        self.status_override = Some(status);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status_override.unwrap_or_else(|| self.kind.status())
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "operation cancelled")
    }

    pub fn plugin_not_found(name: &str, available: Vec<String>) -> Self {
        Self::new(
            ErrorKind::PluginNotFound,
            format!("plugin '{}' is not registered", name),
        )
        .with_detail(json!({ "available": available }))
    }

    pub fn tool_not_found(plugin: &str, tool: &str, available: Vec<String>) -> Self {
        Self::new(
            ErrorKind::ToolNotFound,
            format!("plugin '{}' has no tool '{}'", plugin, tool),
        )
        .with_detail(json!({ "available": available }))
    }

    pub fn invalid_plugin(name: &str, field: &str, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self::new(
            ErrorKind::InvalidPlugin,
            format!("plugin '{}' violates the contract: {}", name, reason),
        )
        .with_detail(json!({ "name": name, "field": field, "reason": reason }))
    }

    pub fn pipeline_not_found(id: &str) -> Self {
        Self::new(
            ErrorKind::PipelineNotFound,
            format!("no pipeline registered under id '{}'", id),
        )
    }

    pub fn job_not_found(id: &str) -> Self {
        Self::new(ErrorKind::JobNotFound, format!("no job with id '{}'", id))
    }

    /// The JSON body rendered at the HTTP boundary.
    pub fn to_body(&self) -> Value {
        let mut error = serde_json::Map::new();
        error.insert("kind".into(), Value::String(self.kind.as_tag().into()));
        error.insert("message".into(), Value::String(self.message.clone()));
        if let Some(Value::Object(extra)) = &self.detail {
            for (k, v) in extra {
                error.entry(k.clone()).or_insert_with(|| v.clone());
            }
        }
        json!({ "error": Value::Object(error) })
    }
}

impl IntoResponse for ForgeError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_body())).into_response()
    }
}
