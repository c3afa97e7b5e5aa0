//! ForgeSyte: a pluggable vision-analysis service.
//!
//! Images and videos come in over HTTP or WebSocket, flow through a
//! declarative DAG of plugin tools, and leave as JSON-safe results — per
//! frame synchronously, or per job through the worker loop with live
//! progress fan-out.

pub mod config;
pub mod errors;
pub mod jobs;
pub mod media;
pub mod metrics;
pub mod pipeline;
pub mod plugins;
pub mod sanitize;
pub mod server;
pub mod state;
