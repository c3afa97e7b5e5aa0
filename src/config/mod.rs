use serde::{Deserialize, Serialize};
/**
 * ForgeSyte configuration root module.
 *
 * - Defines the root configuration struct (`ForgeConfig`) and its defaults.
 * - Provides config file loading, CLI/env override logic, and error
 *   reporting.
 * - Uses `components.rs` for the nested blocks and `defaults.rs` for
 *   default helpers.
 */
use std::{path::Path, path::PathBuf, sync::Arc, time::Duration};
use thiserror::Error;

use crate::state::{ForgeState, RuntimeOptions};

pub mod components;
pub mod defaults;

pub use components::{
    JobsConfig, MediaConfig, PipelinesConfig, PluginsConfig, RealtimeConfig, ServerConfig,
};

// Root configuration for the ForgeSyte server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ForgeConfig {
    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Pipeline definitions directory and default pipeline.
    #[serde(default)]
    pub pipelines: PipelinesConfig,

    /// Media decoder settings.
    #[serde(default)]
    pub media: MediaConfig,

    /// Job store and worker settings.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Realtime analyzer settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Plugin subsystem settings.
    #[serde(default)]
    pub plugins: PluginsConfig,
}

impl ForgeConfig {
    /// Compute the default configuration file path.
    pub fn default_path() -> PathBuf {
        // Allow override via environment variable
        if let Some(override_path) = std::env::var_os("FORGESYTE_CONFIG_PATH") {
            return PathBuf::from(override_path);
        }
        if cfg!(target_os = "windows") {
            let home = std::env::var_os("HOME")
                .or_else(|| std::env::var_os("USERPROFILE"))
                .unwrap_or_default();
            let mut p = PathBuf::from(home);
            p.push("forgesyte");
            p.push("config");
            p
        } else {
            PathBuf::from("/")
                .join("etc")
                .join("forgesyte")
                .join("config")
        }
    }

    /// Load config from file and apply CLI overrides.
    ///
    /// Loads configuration from a YAML file if it exists, otherwise uses
    /// defaults, then applies command-line overrides with highest
    /// precedence.
    ///
    /// # Arguments
    /// * `config_path` - Optional path to the configuration file.
    /// * `bind_address` - Optional bind address override.
    /// * `pipeline_dir` - Optional pipeline directory override.
    /// * `data_dir` - Optional data directory override.
    /// * `disable_api` - Optional flag to disable the plugin API.
    pub fn load_with_overrides(
        config_path: Option<PathBuf>,
        bind_address: Option<String>,
        pipeline_dir: Option<PathBuf>,
        data_dir: Option<PathBuf>,
        disable_api: Option<bool>,
    ) -> Result<Self, ConfigError> {
        let path = config_path.unwrap_or_else(Self::default_path);

        let mut cfg = if path.exists() {
            tracing::debug!("Reading from configuration file {:?}", path);
            let text = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::Parse(path.clone(), format!("I/O error: {}", e)))?;
            Self::parse_yaml_with_path(&path, &text)?
        } else {
            tracing::warn!(
                "No configuration file (checked {:?}) initializing with defaults",
                path
            );
            Self::default()
        };

        // Apply CLI/env overrides (highest precedence)
        if let Some(addr) = bind_address {
            cfg.server.bind_address = Some(addr);
        }
        if let Some(dir) = pipeline_dir {
            cfg.pipelines.dir = dir;
        }
        if let Some(dir) = data_dir {
            cfg.jobs.data_dir = dir;
        }
        if let Some(disabled) = disable_api {
            cfg.server.disable_plugin_api = disabled;
        }

        Ok(cfg)
    }

    /// Parse YAML configuration with enhanced error reporting.
    ///
    /// Includes line/column information in error messages when the parser
    /// provides it.
    fn parse_yaml_with_path(path: &Path, text: &str) -> Result<Self, ConfigError> {
        serde_yaml_ng::from_str::<Self>(text).map_err(|e| {
            let msg = if let Some(loc) = e.location() {
                format!(
                    "yaml error at line {}, column {}: {}",
                    loc.line(),
                    loc.column(),
                    e
                )
            } else {
                format!("yaml error: {}", e)
            };

            ConfigError::Parse(path.to_path_buf(), msg)
        })
    }

    /// Apply relevant config fields to the shared application state.
    pub fn apply_to_state(&self, state: Arc<ForgeState>) {
        state.set_disable_health_api(self.server.disable_health_api);
        state.set_disable_plugin_api(self.server.disable_plugin_api);
        state.set_disable_metrics_api(self.server.disable_metrics_api);
        state
            .manifests
            .set_ttl(Duration::from_secs(self.plugins.manifest_ttl_secs));
        state.set_options(RuntimeOptions {
            default_pipeline: self.pipelines.default_pipeline.clone(),
            media: self.media.clone(),
            realtime: self.realtime.clone(),
            upload_dir: self.jobs.upload_dir(),
            job_timeout: match self.jobs.job_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            heartbeat_window: Duration::from_secs(self.jobs.heartbeat_window_secs.max(1)),
        });
    }
}

// Errors during configuration loading/parsing.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to parse configuration content.
    ///
    /// Tuple fields:
    /// - 0: Path to the configuration file that failed to parse
    /// - 1: Error message from the underlying parser
    #[error("Failed to parse {0}: {1}")]
    Parse(PathBuf, String),
}
