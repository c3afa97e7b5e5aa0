//! # Metrics Collection Module

pub mod handler;

/// Initializes the metrics exporter when the `prometheus` feature is
/// enabled.
///
/// Builds the Prometheus recorder, installs it globally, keeps the handle
/// for the `/metrics` endpoint, and spawns a background task for periodic
/// upkeep of histograms and summaries. A no-op without the feature.
pub fn init() {
    #[cfg(feature = "prometheus")]
    {
        use metrics_exporter_prometheus::PrometheusBuilder;
        use tracing::debug;

        debug!("Prometheus metrics enabled");

        let recorder = PrometheusBuilder::new().build_recorder();
        let handle = recorder.handle();
        crate::metrics::handler::set_prom_handle(handle);

        // Periodic upkeep for histograms/summaries.
        {
            use std::time::Duration;
            let handle_for_task = recorder.handle();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(Duration::from_secs(30));
                loop {
                    tick.tick().await;
                    handle_for_task.run_upkeep();
                }
            });
        }

        if let Err(e) = metrics::set_global_recorder(recorder) {
            tracing::warn!("Metrics recorder already installed: {}", e);
        }
    }
}

/// Record one management/API HTTP request.
#[allow(unused_variables)]
pub fn record_api_http(path: &str, method: &str, status: u16, latency_ms: f64) {
    #[cfg(feature = "prometheus")]
    {
        let labels = [
            ("path", path.to_string()),
            ("method", method.to_string()),
            ("status", status.to_string()),
        ];
        metrics::counter!("forgesyte_http_requests_total", &labels).increment(1);
        metrics::histogram!("forgesyte_http_request_duration_ms", &labels).record(latency_ms);
    }
}

/// Record one plugin tool invocation.
#[allow(unused_variables)]
pub fn record_tool_invocation(plugin: &str, tool: &str, latency_ms: f64, ok: bool) {
    #[cfg(feature = "prometheus")]
    {
        let labels = [
            ("plugin", plugin.to_string()),
            ("tool", tool.to_string()),
            ("outcome", if ok { "ok" } else { "error" }.to_string()),
        ];
        metrics::counter!("forgesyte_tool_invocations_total", &labels).increment(1);
        metrics::histogram!("forgesyte_tool_duration_ms", &labels).record(latency_ms);
    }
}

/// Record frames that completed the per-frame pipeline.
#[allow(unused_variables)]
pub fn record_frames_processed(count: u64) {
    #[cfg(feature = "prometheus")]
    {
        metrics::counter!("forgesyte_frames_processed_total").increment(count);
    }
}

/// Record a job lifecycle event (`submitted`, `completed`, `failed`,
/// `cancelled`).
#[allow(unused_variables)]
pub fn record_job_event(event: &'static str) {
    #[cfg(feature = "prometheus")]
    {
        let labels = [("event", event)];
        metrics::counter!("forgesyte_job_events_total", &labels).increment(1);
    }
}
