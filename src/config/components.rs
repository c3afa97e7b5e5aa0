/// ForgeSyte configuration components module.
///
/// This module defines the user-facing configuration structures for the
/// service. They are the building blocks for the root `ForgeConfig` in
/// `mod.rs`; every block is optional in the file and falls back to its
/// defaults.
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::defaults;

/// HTTP server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address, e.g. `127.0.0.1:8085`.
    #[serde(default = "defaults::default_bind_address_opt")]
    pub bind_address: Option<String>,

    /// Comma-separated CORS origins, or "*" for all origins.
    #[serde(default)]
    pub cors_origins: Option<String>,

    /// Disable the health probes.
    #[serde(default = "defaults::default_false")]
    pub disable_health_api: bool,

    /// Disable the plugin management API.
    #[serde(default = "defaults::default_false")]
    pub disable_plugin_api: bool,

    /// Disable the Prometheus metrics endpoint.
    #[serde(default = "defaults::default_false")]
    pub disable_metrics_api: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: defaults::default_bind_address_opt(),
            cors_origins: None,
            disable_health_api: defaults::default_false(),
            disable_plugin_api: defaults::default_false(),
            disable_metrics_api: defaults::default_false(),
        }
    }
}

/// Pipeline loading configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelinesConfig {
    /// Directory of pipeline definition files (`*.json`).
    #[serde(default = "defaults::default_pipeline_dir")]
    pub dir: PathBuf,

    /// Pipeline used when a request omits `pipeline_id`.
    #[serde(default = "defaults::default_pipeline_id")]
    pub default_pipeline: String,
}

impl Default for PipelinesConfig {
    fn default() -> Self {
        Self {
            dir: defaults::default_pipeline_dir(),
            default_pipeline: defaults::default_pipeline_id(),
        }
    }
}

/// Media decoding configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaConfig {
    /// Path to the ffmpeg binary.
    #[serde(default = "defaults::default_ffmpeg_path")]
    pub ffmpeg_path: String,

    /// Path to the ffprobe binary.
    #[serde(default = "defaults::default_ffprobe_path")]
    pub ffprobe_path: String,

    /// MJPEG quality scale (`-q:v`), 2..=31; lower is better.
    #[serde(default = "defaults::default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for MediaConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: defaults::default_ffmpeg_path(),
            ffprobe_path: defaults::default_ffprobe_path(),
            jpeg_quality: defaults::default_jpeg_quality(),
        }
    }
}

/// Job store and worker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobsConfig {
    /// Data directory for the job database and uploaded inputs.
    #[serde(default = "defaults::default_data_dir")]
    pub data_dir: PathBuf,

    /// Retained-job capacity; the oldest terminal jobs are evicted beyond
    /// it.
    #[serde(default = "defaults::default_job_capacity")]
    pub capacity: usize,

    /// Worker idle poll interval in milliseconds.
    #[serde(default = "defaults::default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Per-job timeout in seconds; 0 disables the deadline.
    #[serde(default = "defaults::default_job_timeout_secs")]
    pub job_timeout_secs: u64,

    /// Minimum percent delta between progress database writes.
    #[serde(default = "defaults::default_persist_threshold_percent")]
    pub persist_threshold_percent: u8,

    /// Worker liveness window in seconds for the readiness probe.
    #[serde(default = "defaults::default_heartbeat_window_secs")]
    pub heartbeat_window_secs: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            data_dir: defaults::default_data_dir(),
            capacity: defaults::default_job_capacity(),
            poll_interval_ms: defaults::default_poll_interval_ms(),
            job_timeout_secs: defaults::default_job_timeout_secs(),
            persist_threshold_percent: defaults::default_persist_threshold_percent(),
            heartbeat_window_secs: defaults::default_heartbeat_window_secs(),
        }
    }
}

impl JobsConfig {
    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("forgesyte.db")
    }

    pub fn upload_dir(&self) -> PathBuf {
        self.data_dir.join("uploads")
    }
}

/// Realtime WebSocket analyzer configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeConfig {
    /// Per-session pending-frame depth before oldest frames are dropped.
    #[serde(default = "defaults::default_backlog_depth")]
    pub backlog_depth: usize,

    /// Seconds of silence (no ping/frame) before a session is closed.
    #[serde(default = "defaults::default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// Plugin activated when a client connects without `?plugin=`.
    #[serde(default)]
    pub default_plugin: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            backlog_depth: defaults::default_backlog_depth(),
            idle_timeout_secs: defaults::default_idle_timeout_secs(),
            default_plugin: None,
        }
    }
}

/// Plugin subsystem configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginsConfig {
    /// Manifest cache TTL in seconds.
    #[serde(default = "defaults::default_manifest_ttl_secs")]
    pub manifest_ttl_secs: u64,

    /// Whether startup fails when zero plugins load.
    #[serde(default = "defaults::default_true")]
    pub require_plugins: bool,
}

impl Default for PluginsConfig {
    fn default() -> Self {
        Self {
            manifest_ttl_secs: defaults::default_manifest_ttl_secs(),
            require_plugins: defaults::default_true(),
        }
    }
}
