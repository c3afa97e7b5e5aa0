//! The job worker loop.
//!
//! One cooperative task claims queued jobs, runs them through the video
//! pipeline service (or the direct DAG for image inputs), and drives the
//! two progress paths: every callback is broadcast on topic `job:{id}`,
//! while database writes go through the manager's percent threshold. A
//! heartbeat is recorded each iteration so the readiness probe can detect a
//! stalled worker.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{ErrorKind, ForgeError};
use crate::jobs::{JobRecord, ProgressEvent, job_topic};
use crate::media::service::{ProgressFn, VideoPipelineService};
use crate::plugins::ToolInput;
use crate::state::ForgeState;

/// Worker idle poll interval when the queue is empty.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Spawn the worker loop. It runs until `cancel` fires.
pub fn spawn(state: Arc<ForgeState>, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(state, cancel, DEFAULT_POLL_INTERVAL))
}

/// Spawn with an explicit idle poll interval (test wiring).
pub fn spawn_with_poll(
    state: Arc<ForgeState>,
    cancel: CancellationToken,
    poll: Duration,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(run(state, cancel, poll))
}

async fn run(state: Arc<ForgeState>, cancel: CancellationToken, poll: Duration) {
    tracing::info!("Job worker started");
    loop {
        state.touch_worker_heartbeat();

        let manager = match state.jobs() {
            Ok(manager) => manager,
            Err(_) => {
                // Store not initialized yet; wait for bootstrap to finish.
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => continue,
                }
            }
        };

        let claimed = match manager.claim_next().await {
            Ok(claimed) => claimed,
            Err(e) => {
                tracing::error!("Job claim failed: {}", e);
                None
            }
        };

        match claimed {
            Some((job, token)) => {
                process_job(&state, job, token).await;
            }
            None => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(poll) => {}
                }
            }
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    tracing::info!("Job worker stopped");
}

/// JPEG/PNG magic sniff: image inputs run the DAG once, everything else is
/// treated as video.
async fn is_image_input(path: &std::path::Path) -> bool {
    let Ok(mut file) = tokio::fs::File::open(path).await else {
        return false;
    };
    use tokio::io::AsyncReadExt;
    let mut magic = [0u8; 8];
    let Ok(n) = file.read(&mut magic).await else {
        return false;
    };
    let magic = &magic[..n];
    magic.starts_with(&[0xFF, 0xD8]) || magic.starts_with(&[0x89, b'P', b'N', b'G'])
}

async fn process_job(state: &Arc<ForgeState>, job: JobRecord, token: CancellationToken) {
    let job_id = job.job_id.clone();
    tracing::info!("Processing job '{}' (pipeline '{}')", job_id, job.pipeline_id);

    let Ok(manager) = state.jobs() else {
        return;
    };
    let ws = Arc::clone(&state.ws);
    let topic = job_topic(&job_id);

    // Progress drain: broadcast every event in order; persist through the
    // manager's threshold.
    let (progress_tx, mut progress_rx) = mpsc::unbounded_channel::<(u64, u64)>();
    let drain = {
        let manager = Arc::clone(&manager);
        let ws = Arc::clone(&ws);
        let state = Arc::clone(state);
        let job_id = job_id.clone();
        let topic = topic.clone();
        tokio::spawn(async move {
            while let Some((current, total)) = progress_rx.recv().await {
                // Frame progress doubles as worker liveness during long jobs.
                state.touch_worker_heartbeat();
                let event = ProgressEvent::new(&job_id, current, total);
                if let Ok(value) = serde_json::to_value(&event) {
                    ws.broadcast(&topic, &value);
                }
                if let Err(e) = manager.update_progress(&job_id, current, total).await {
                    tracing::warn!("Progress persist failed for '{}': {}", job_id, e);
                }
            }
        })
    };

    let service = VideoPipelineService::new(
        state.plugin_registry.clone(),
        state.pipelines(),
        state.frame_sources(),
    );
    let options = state.options();
    let input_path = std::path::PathBuf::from(&job.input_ref);

    let work = async {
        if is_image_input(&input_path).await {
            let bytes = tokio::fs::read(&input_path).await.map_err(|e| {
                ForgeError::invalid_input(format!("cannot read job input: {}", e))
            })?;
            let input = ToolInput::with_image(json!({ "frame_index": 0 }), bytes);
            let value = service.run_payload(&job.pipeline_id, input).await?;
            Ok::<Value, ForgeError>(json!({
                "results": [ { "frame_index": 0, "result": value } ]
            }))
        } else {
            let progress: ProgressFn = {
                let tx = progress_tx.clone();
                Box::new(move |current, total| {
                    let _ = tx.send((current, total));
                })
            };
            let results = service
                .run_on_file(
                    &input_path,
                    &job.pipeline_id,
                    1,
                    None,
                    Some(progress),
                    Some(token.clone()),
                )
                .await?;
            Ok(json!({ "results": results }))
        }
    };

    let outcome = match options.job_timeout {
        Some(deadline) => match tokio::time::timeout(deadline, work).await {
            Ok(outcome) => outcome,
            Err(_) => Err(ForgeError::new(
                ErrorKind::Timeout,
                format!("job exceeded {}s deadline", deadline.as_secs()),
            )),
        },
        None => work.await,
    };

    // The drain task ends once the service (and our sender) are done.
    drop(progress_tx);
    let _ = drain.await;

    match outcome {
        Ok(results) => match manager.complete(&job_id, results).await {
            Ok(()) => {
                ws.broadcast(&topic, &json!({ "status": "completed", "job_id": job_id }));
                tracing::info!("Job '{}' completed", job_id);
            }
            Err(e) => {
                // Typically a cooperative cancel that landed first.
                tracing::warn!("Could not complete job '{}': {}", job_id, e);
                manager.release(&job_id);
            }
        },
        Err(e) if e.kind == ErrorKind::Cancelled => {
            ws.broadcast(&topic, &json!({ "status": "cancelled", "job_id": job_id }));
            tracing::info!("Job '{}' cancelled", job_id);
            manager.release(&job_id);
        }
        Err(e) => {
            let message = e.to_string();
            if let Err(fail_err) = manager.fail(&job_id, &message).await {
                tracing::warn!("Could not fail job '{}': {}", job_id, fail_err);
                manager.release(&job_id);
            }
            ws.broadcast(
                &topic,
                &json!({ "status": "error", "job_id": job_id, "error": message }),
            );
            tracing::warn!("Job '{}' failed: {}", job_id, message);
        }
    }
}
