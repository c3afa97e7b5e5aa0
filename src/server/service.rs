//! HTTP service implementation - assembles the router and runs the server.

use anyhow::Context;
use axum::{
    Router,
    routing::{get, post},
};
use std::{net::SocketAddr, sync::Arc};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use crate::{
    config::ForgeConfig,
    server::{
        handlers::{
            api::{get_plugin_manifest, get_plugins, reload_plugin, run_plugin_tool},
            health::{livez, readyz},
            video::{
                cancel_job, job_results, job_status, list_jobs, process_video, submit_video,
            },
        },
        ws::{jobs::job_progress_socket, stream::stream_socket},
    },
    state::{ApplicationState, ForgeState},
};

/// CORS configuration for the HTTP server.
///
/// Allows specifying allowed origins for cross-origin requests.
/// Supports "*" for all origins or a comma-separated list of specific
/// origins.
#[derive(Debug, Clone, Default)]
pub struct Cors {
    /// Comma-separated list of allowed origins, or "*" for all origins.
    pub origins: String,
}

impl Cors {
    /// Creates a CorsLayer from the configuration.
    ///
    /// - "*" allows all origins
    /// - A comma-separated list allows specific origins
    pub fn into_layer(self) -> CorsLayer {
        use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin};

        let allow_origin = if self.origins.trim() == "*" {
            AllowOrigin::any()
        } else {
            let origin_list: Vec<_> = self
                .origins
                .split(',')
                .map(|s| s.trim())
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect();

            tracing::debug!(
                "Parsed CORS origins: {:?} from {:?}",
                origin_list,
                self.origins
            );

            if origin_list.is_empty() {
                tracing::warn!("No valid CORS origins specified, defaulting to allow all");
                AllowOrigin::any()
            } else if origin_list.len() == 1 {
                AllowOrigin::exact(origin_list.into_iter().next().unwrap())
            } else {
                AllowOrigin::list(origin_list)
            }
        };

        CorsLayer::new()
            .allow_origin(allow_origin)
            .allow_headers(AllowHeaders::any())
            .allow_methods(AllowMethods::any())
    }
}

/// Assemble the full application router over the shared state.
///
/// Exposed for router-level integration tests.
pub fn build_router(state: Arc<ForgeState>) -> Router {
    let mut router = Router::new()
        // Video processing surface
        .route("/v1/video/process", post(process_video))
        .route("/v1/video/submit", post(submit_video))
        .route("/v1/video/status/{job_id}", get(job_status))
        .route("/v1/video/results/{job_id}", get(job_results))
        .route("/v1/video/jobs", get(list_jobs))
        .route("/v1/video/jobs/{job_id}/cancel", post(cancel_job))
        // Realtime surface
        .route("/v1/stream", get(stream_socket))
        .route("/ws/jobs/{job_id}", get(job_progress_socket));

    if state.is_plugin_api_enabled() {
        router = router
            .route("/v1/plugins", get(get_plugins))
            .route("/v1/plugins/{id}/manifest", get(get_plugin_manifest))
            .route("/v1/plugins/{id}/tools/{tool}/run", post(run_plugin_tool))
            .route("/v1/plugins/{id}/reload", post(reload_plugin));
    }

    if state.is_health_api_enabled() {
        router = router.route("/livez", get(livez)).route("/readyz", get(readyz));
    }

    if state.is_metrics_api_enabled() {
        router = router.route(
            "/metrics",
            get(|| async { crate::metrics::handler::make_metrics_response() }),
        );
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind and serve until SIGINT/SIGTERM.
pub async fn start(config: &ForgeConfig, state: Arc<ForgeState>) -> anyhow::Result<()> {
    let bind_address = config
        .server
        .bind_address
        .clone()
        .unwrap_or_else(crate::config::defaults::default_bind_address);
    let addr: SocketAddr = bind_address
        .parse()
        .with_context(|| format!("invalid bind address '{}'", bind_address))?;

    let mut router = build_router(Arc::clone(&state));
    if let Some(origins) = config.server.cors_origins.clone() {
        router = router.layer(Cors { origins }.into_layer());
    }

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    info!("Serving on http://{}", addr);

    state.set_state(ApplicationState::Ready);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server execution failed")?;

    state.set_state(ApplicationState::Terminating);
    Ok(())
}

/// Resolve on SIGINT (all platforms) or SIGTERM (unix).
async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
