/// ForgeSyte configuration defaults module.
///
/// This module provides default value helpers for serde deserialization in
/// config structs. These functions keep defaulting consistent between
/// `components.rs` and `mod.rs`, and handle cases where entire config blocks
/// are missing from the configuration file.
use std::path::PathBuf;

/// Default HTTP bind address for the service.
pub(crate) fn default_bind_address() -> String {
    "127.0.0.1:8085".to_string()
}

pub(crate) fn default_bind_address_opt() -> Option<String> {
    Some(default_bind_address())
}

/// Default directory of pipeline definition files.
pub(crate) fn default_pipeline_dir() -> PathBuf {
    PathBuf::from("pipelines")
}

/// Default pipeline used when a request omits `pipeline_id`.
pub(crate) fn default_pipeline_id() -> String {
    "frame_probe".to_string()
}

/// Default data directory (job database, uploaded inputs).
pub(crate) fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

pub(crate) fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

pub(crate) fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

/// MJPEG quality scale passed to the decoder (2 is near-lossless).
pub(crate) fn default_jpeg_quality() -> u8 {
    2
}

/// Default retained-job capacity before terminal eviction.
pub(crate) fn default_job_capacity() -> usize {
    1000
}

/// Worker idle poll interval in milliseconds.
pub(crate) fn default_poll_interval_ms() -> u64 {
    500
}

/// Per-job timeout in seconds; 0 disables the deadline.
pub(crate) fn default_job_timeout_secs() -> u64 {
    3600
}

/// Progress persistence threshold in percent.
pub(crate) fn default_persist_threshold_percent() -> u8 {
    5
}

/// Worker liveness window in seconds for the readiness probe.
pub(crate) fn default_heartbeat_window_secs() -> u64 {
    5
}

/// Realtime per-session backlog depth before oldest frames are dropped.
pub(crate) fn default_backlog_depth() -> usize {
    4
}

/// Realtime idle timeout in seconds since the last ping/frame.
pub(crate) fn default_idle_timeout_secs() -> u64 {
    60
}

/// Manifest cache TTL in seconds.
pub(crate) fn default_manifest_ttl_secs() -> u64 {
    60
}

pub(crate) fn default_true() -> bool {
    true
}

pub(crate) fn default_false() -> bool {
    false
}
