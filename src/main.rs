//! ForgeSyte server entry point.
//!
//! This module contains the main entry point for the ForgeSyte vision
//! service. It handles command-line argument parsing, configuration
//! loading, plugin and pipeline initialization, worker startup, and server
//! startup.
//!
//! # Responsibilities
//!
//! - Parse CLI arguments and environment variables (via Clap)
//! - Load configuration from file, environment, and CLI overrides
//! - Initialize logging and application state
//! - Load and register plugins; load pipeline definitions
//! - Initialize the job store, recover interrupted jobs, start the worker
//! - Start the HTTP/WebSocket server
//!
//! # Application Lifecycle
//!
//! The server follows a structured initialization sequence:
//! 1. **Unknown** → Parse CLI args and initialize state
//! 2. **Initializing** → Load configuration and apply to state
//! 3. **LoadingPlugins** → Load plugins and register tools
//! 4. **LoadingPipelines** → Load and validate pipeline definitions
//! 5. **StartingNetwork** → Job store, worker, network services
//! 6. **Ready** → Server is fully operational
//! 7. **Terminating** → Server is shutting down

use std::sync::Arc;

use anyhow::bail;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use forgesyte::config::ForgeConfig;
use forgesyte::jobs::manager::JobManager;
use forgesyte::jobs::store::JobStore;
use forgesyte::jobs::worker;
use forgesyte::media::FfmpegSourceFactory;
use forgesyte::pipeline;
use forgesyte::plugins;
use forgesyte::server::service::start;
use forgesyte::state::{ApplicationState, ForgeState};

/// CLI arguments definition for the ForgeSyte server.
///
/// Field documentation is used by Clap to generate help text, so keep them
/// in rustdoc format.
#[derive(Parser, Debug, Clone)]
#[command(name = "forgesyte", version, about = "ForgeSyte vision-analysis server", long_about = None)]
struct Args {
    /// Config file path (overrides default path and FORGESYTE_CONFIG_PATH)
    #[arg(long = "config-file", value_name = "FILE", env = "FORGESYTE_CONFIG_PATH")]
    config_file: Option<std::path::PathBuf>,

    /// HTTP bind address override (optional)
    #[arg(
        long = "bind-address",
        value_name = "BIND_ADDRESS",
        env = "FORGESYTE_BIND_ADDRESS",
        required = false
    )]
    bind_address: Option<String>,

    /// Pipeline definitions directory override (optional)
    #[arg(
        long = "pipeline-dir",
        value_name = "DIR",
        env = "FORGESYTE_PIPELINE_DIR",
        required = false
    )]
    pipeline_dir: Option<std::path::PathBuf>,

    /// Data directory override for the job store and uploads (optional)
    #[arg(
        long = "data-dir",
        value_name = "DIR",
        env = "FORGESYTE_DATA_DIR",
        required = false
    )]
    data_dir: Option<std::path::PathBuf>,

    /// Disable the plugin management API (CLI override)
    #[arg(
        long = "disable-api",
        value_name = "PLUGIN_API_DISABLE",
        env = "FORGESYTE_DISABLE_API",
        required = false
    )]
    disable_api: Option<bool>,
}

/// Main entry point for the ForgeSyte server.
///
/// Orchestrates the complete initialization sequence: argument parsing,
/// configuration loading, state initialization, plugin and pipeline
/// loading, job store recovery, worker startup, and server startup.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize application state with default values
    let app_state = Arc::new(ForgeState::default());

    // Initialize logging
    let env_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(EnvFilter::new(env_filter))
        .init();

    // Transition to initializing state
    app_state.set_state(ApplicationState::Initializing);

    // Load configuration from file, environment, and CLI overrides
    let config = ForgeConfig::load_with_overrides(
        args.config_file.clone(),
        args.bind_address.clone(),
        args.pipeline_dir.clone(),
        args.data_dir.clone(),
        args.disable_api,
    )?;

    // Apply configuration-derived settings to application state
    config.apply_to_state(app_state.clone());
    app_state.set_frame_sources(Arc::new(FfmpegSourceFactory::new(config.media.clone())));
    tracing::debug!("Early init completed");

    // Initialize metrics collection if enabled
    forgesyte::metrics::init();

    // Transition to plugin loading phase
    app_state.set_state(ApplicationState::LoadingPlugins);

    let report = plugins::load_plugins(
        &app_state.plugin_registry,
        &plugins::default_factories(),
    )
    .await;
    for (name, err) in &report.errors {
        tracing::error!("Plugin '{}' failed to load: {}", name, err);
    }
    if report.loaded.is_empty() && config.plugins.require_plugins {
        bail!("no plugins loaded; refusing to start");
    }
    tracing::debug!("Plugin load completed");

    // Load and validate pipeline definitions against the live registry
    app_state.set_state(ApplicationState::LoadingPipelines);
    let pipelines = pipeline::load_dir(&config.pipelines.dir, &app_state.plugin_registry).await?;
    if !pipelines.contains(&config.pipelines.default_pipeline) {
        bail!(
            "default pipeline '{}' is not among the loaded definitions {:?}",
            config.pipelines.default_pipeline,
            pipelines.ids()
        );
    }
    app_state.set_pipelines(Arc::new(pipelines));

    // Transition to network startup phase
    app_state.set_state(ApplicationState::StartingNetwork);

    // Job store: open, recover interrupted jobs, install the manager
    let store = JobStore::with_path(config.jobs.db_path())?;
    let manager = Arc::new(JobManager::new(
        store,
        app_state.pipelines(),
        config.jobs.capacity,
        config.jobs.persist_threshold_percent,
    ));
    manager.recover_interrupted().await?;
    app_state.set_job_manager(manager);

    // Start the worker loop
    let worker_cancel = CancellationToken::new();
    let worker_handle = worker::spawn_with_poll(
        app_state.clone(),
        worker_cancel.clone(),
        std::time::Duration::from_millis(config.jobs.poll_interval_ms.max(10)),
    );

    // Start the HTTP/WebSocket server
    match start(&config, app_state.clone()).await {
        Ok(_) => tracing::debug!("Server has exited"),
        Err(e) => tracing::error!("Server execution failed: {:?}", e),
    }

    // Stop the worker cooperatively
    worker_cancel.cancel();
    let _ = worker_handle.await;
    app_state.set_state(ApplicationState::Terminating);

    Ok(())
}
