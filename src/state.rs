/// The application state is responsible for:
///
/// - Maintaining the lifecycle state of the server
/// - Hosting the plugin registry, pipeline store, and manifest cache
/// - Holding the job manager, WebSocket manager, and frame-source factory
use std::path::PathBuf;
use std::sync::{
    Arc, RwLock,
    atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering},
};
use std::time::{Duration, Instant};

use crate::config::components::{MediaConfig, RealtimeConfig};
use crate::errors::ForgeError;
use crate::jobs::manager::JobManager;
use crate::media::{FfmpegSourceFactory, FrameSourceFactory};
use crate::pipeline::PipelineStore;
use crate::plugins::manifest::ManifestCache;
use crate::plugins::registry::PluginRegistry;
use crate::server::ws::manager::WsManager;

use axum::http::StatusCode;
use tracing::debug;

/** Application lifecycle states. */
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ApplicationState {
    /// Unknown state, typically the initial state.
    Unknown = 0,
    /// The application is initializing.
    Initializing = 1,
    /// Loading plugins.
    LoadingPlugins = 2,
    /// Loading pipeline definitions.
    LoadingPipelines = 3,
    /// Starting network services.
    StartingNetwork = 4,
    /// The application is ready to serve requests.
    Ready = 5,
    /// The application is terminating.
    Terminating = 6,
}

/// Runtime settings derived from configuration, swapped as one unit.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    /// Pipeline used when a request omits `pipeline_id`.
    pub default_pipeline: String,
    pub media: MediaConfig,
    pub realtime: RealtimeConfig,
    /// Directory uploaded job inputs are spooled to.
    pub upload_dir: PathBuf,
    /// Per-job deadline; `None` disables it.
    pub job_timeout: Option<Duration>,
    /// Worker heartbeat freshness window for the readiness probe.
    pub heartbeat_window: Duration,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        Self {
            default_pipeline: "frame_probe".to_string(),
            media: MediaConfig::default(),
            realtime: RealtimeConfig::default(),
            upload_dir: PathBuf::from("data").join("uploads"),
            job_timeout: Some(Duration::from_secs(3600)),
            heartbeat_window: Duration::from_secs(5),
        }
    }
}

// Shared application state and registry of plugins.
//
// This struct holds the core state of the ForgeSyte server: lifecycle state,
// configuration flags, the plugin registry, the pipeline store, and the
// handles the request path and the worker share.
pub struct ForgeState {
    /// Current application lifecycle state.
    pub state: AtomicU8,
    /// Whether the health API is disabled.
    pub disable_health_api: AtomicBool,
    /// Whether the plugin management API is disabled.
    pub disable_plugin_api: AtomicBool,
    /// Whether the Prometheus metrics API is disabled.
    pub disable_metrics_api: AtomicBool,
    /// Registry of all loaded plugins and their tools.
    pub plugin_registry: PluginRegistry,
    /// TTL cache of public plugin manifests.
    pub manifests: ManifestCache,
    /// Compiled pipeline definitions, set once after loading.
    pub pipelines: RwLock<Arc<PipelineStore>>,
    /// Job manager; absent until the store is initialized.
    pub jobs: RwLock<Option<Arc<JobManager>>>,
    /// WebSocket connection and topic registry.
    pub ws: Arc<WsManager>,
    /// Frame-source factory; tests inject synthetic decoders here.
    pub frame_sources: RwLock<Arc<dyn FrameSourceFactory>>,
    /// Runtime options derived from configuration.
    options: RwLock<RuntimeOptions>,
    /// Worker heartbeat: milliseconds since process start, 0 = never.
    worker_heartbeat: AtomicU64,
    started: Instant,
}

impl Default for ForgeState {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(ApplicationState::Unknown as u8),
            disable_health_api: AtomicBool::new(false),
            disable_plugin_api: AtomicBool::new(false),
            disable_metrics_api: AtomicBool::new(false),
            plugin_registry: PluginRegistry::new_local(),
            manifests: ManifestCache::default(),
            pipelines: RwLock::new(Arc::new(PipelineStore::empty())),
            jobs: RwLock::new(None),
            ws: Arc::new(WsManager::new()),
            frame_sources: RwLock::new(Arc::new(FfmpegSourceFactory::default())),
            options: RwLock::new(RuntimeOptions::default()),
            worker_heartbeat: AtomicU64::new(0),
            started: Instant::now(),
        }
    }
}

impl std::fmt::Debug for ForgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ForgeState")
            .field("state", &self.state.load(Ordering::Relaxed))
            .finish()
    }
}

impl ForgeState {
    /// Set application lifecycle state.
    pub fn set_state(&self, value: ApplicationState) {
        let v = value as u8;
        debug!("Application state changed to {:?}", v);
        self.state.store(v, Ordering::Relaxed);
    }

    /// Returns true if the application is running (liveness check).
    pub fn is_alive(&self) -> bool {
        let state = self.state.load(Ordering::SeqCst);
        state >= ApplicationState::Initializing as u8 && state < ApplicationState::Terminating as u8
    }

    /// Returns true if the application is ready to serve requests.
    pub fn is_ready(&self) -> bool {
        self.state.load(Ordering::SeqCst) >= ApplicationState::Ready as u8
    }

    /// Enable/disable health API.
    pub fn set_disable_health_api(&self, value: bool) {
        debug!(
            "Health API is {}",
            if value { "disabled" } else { "enabled" }
        );
        self.disable_health_api.store(value, Ordering::Relaxed);
    }

    /// Enable/disable plugin management API.
    pub fn set_disable_plugin_api(&self, value: bool) {
        debug!(
            "Plugin API is {}",
            if value { "disabled" } else { "enabled" }
        );
        self.disable_plugin_api.store(value, Ordering::Relaxed);
    }

    /// Enable/disable Prometheus metrics API.
    pub fn set_disable_metrics_api(&self, value: bool) {
        debug!(
            "Metrics API is {}",
            if value { "disabled" } else { "enabled" }
        );
        self.disable_metrics_api.store(value, Ordering::Relaxed);
    }

    pub fn is_health_api_enabled(&self) -> bool {
        !self.disable_health_api.load(Ordering::Relaxed)
    }

    pub fn is_plugin_api_enabled(&self) -> bool {
        !self.disable_plugin_api.load(Ordering::Relaxed)
    }

    #[cfg(feature = "prometheus")]
    pub fn is_metrics_api_enabled(&self) -> bool {
        !self.disable_metrics_api.load(Ordering::Relaxed)
    }

    #[cfg(not(feature = "prometheus"))]
    pub fn is_metrics_api_enabled(&self) -> bool {
        false
    }

    /// Swap in the loaded pipeline store.
    pub fn set_pipelines(&self, store: Arc<PipelineStore>) {
        if let Ok(mut w) = self.pipelines.write() {
            *w = store;
        }
    }

    pub fn pipelines(&self) -> Arc<PipelineStore> {
        self.pipelines
            .read()
            .map(|g| Arc::clone(&g))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    /// Install the job manager once its store is initialized.
    pub fn set_job_manager(&self, manager: Arc<JobManager>) {
        if let Ok(mut w) = self.jobs.write() {
            *w = Some(manager);
        }
    }

    /// The job manager, or a 503-mapped error while it is absent.
    pub fn jobs(&self) -> Result<Arc<JobManager>, ForgeError> {
        self.jobs
            .read()
            .ok()
            .and_then(|g| g.clone())
            .ok_or_else(|| {
                ForgeError::internal("job manager is not initialized")
                    .with_status(StatusCode::SERVICE_UNAVAILABLE)
            })
    }

    /// Replace the frame-source factory (test wiring).
    pub fn set_frame_sources(&self, factory: Arc<dyn FrameSourceFactory>) {
        if let Ok(mut w) = self.frame_sources.write() {
            *w = factory;
        }
    }

    pub fn frame_sources(&self) -> Arc<dyn FrameSourceFactory> {
        self.frame_sources
            .read()
            .map(|g| Arc::clone(&g))
            .unwrap_or_else(|e| Arc::clone(&e.into_inner()))
    }

    pub fn set_options(&self, options: RuntimeOptions) {
        if let Ok(mut w) = self.options.write() {
            *w = options;
        }
    }

    pub fn options(&self) -> RuntimeOptions {
        self.options
            .read()
            .map(|g| g.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Record a worker loop iteration for the liveness window.
    pub fn touch_worker_heartbeat(&self) {
        let millis = self.started.elapsed().as_millis() as u64;
        self.worker_heartbeat.store(millis.max(1), Ordering::Relaxed);
    }

    /// Whether the worker heartbeat is fresh within `window`.
    pub fn worker_alive(&self, window: Duration) -> bool {
        let beat = self.worker_heartbeat.load(Ordering::Relaxed);
        if beat == 0 {
            return false;
        }
        let now = self.started.elapsed().as_millis() as u64;
        now.saturating_sub(beat) <= window.as_millis() as u64
    }
}
