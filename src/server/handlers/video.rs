/// Video processing endpoints: the synchronous per-frame path and the
/// asynchronous job path.
///
/// # Endpoints
///
/// - `POST /v1/video/process` - Run a pipeline over an uploaded video now
/// - `POST /v1/video/submit` - Queue a job for the worker
/// - `GET /v1/video/status/:job_id` - Job status snapshot
/// - `GET /v1/video/results/:job_id` - Results of a completed job
/// - `GET /v1/video/jobs` - Job listing, newest first
/// - `POST /v1/video/jobs/:job_id/cancel` - Cooperative cancellation
use axum::{
    Json,
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::{Value, json};
use uuid::Uuid;

use std::sync::Arc;
use std::time::Instant;

use crate::{
    errors::ForgeError,
    jobs::{JobRecord, JobStatus},
    media::service::VideoPipelineService,
    state::ForgeState,
};

#[derive(Debug, Deserialize)]
pub struct VideoQuery {
    pub pipeline_id: Option<String>,
    pub frame_stride: Option<u64>,
    pub max_frames: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct JobListQuery {
    pub status: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

/// Pull the uploaded video bytes out of the multipart body.
async fn read_upload(multipart: &mut Multipart) -> Result<Vec<u8>, ForgeError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ForgeError::invalid_input(format!("malformed multipart body: {}", e)))?
    {
        if field.name() == Some("file") {
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ForgeError::invalid_input(format!("could not read upload: {}", e)))?;
            if bytes.is_empty() {
                return Err(ForgeError::invalid_input("uploaded file is empty"));
            }
            return Ok(bytes.to_vec());
        }
    }
    Err(ForgeError::invalid_input(
        "multipart body must carry a 'file' field",
    ))
}

fn validated_stride(query: &VideoQuery) -> Result<u64, ForgeError> {
    match query.frame_stride {
        Some(0) => Err(ForgeError::invalid_input("frame_stride must be >= 1")),
        Some(stride) => Ok(stride),
        None => Ok(1),
    }
}

/// 503 while the registry has nothing registered (startup or total load
/// failure).
async fn ensure_registry(state: &ForgeState) -> Result<(), ForgeError> {
    if state.plugin_registry.is_empty().await {
        return Err(ForgeError::internal("plugin registry unavailable")
            .with_status(StatusCode::SERVICE_UNAVAILABLE));
    }
    Ok(())
}

fn resolve_pipeline_id(state: &ForgeState, requested: Option<String>) -> String {
    requested.unwrap_or_else(|| state.options().default_pipeline)
}

/// Synchronously run a pipeline over an uploaded video.
///
/// # Endpoint
/// `POST /v1/video/process?pipeline_id=&frame_stride=&max_frames=`
///
/// # Returns
/// `{"results": [{"frame_index": n, "result": {...}}, ...]}` and nothing
/// else at the top level.
pub async fn process_video(
    State(state): State<Arc<ForgeState>>,
    Query(query): Query<VideoQuery>,
    mut multipart: Multipart,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: POST /v1/video/process");

    let response = match process_video_inner(&state, &query, &mut multipart).await {
        Ok(results) => (StatusCode::OK, Json(json!({ "results": results }))).into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/process", "POST", status, latency_ms);
    response
}

async fn process_video_inner(
    state: &Arc<ForgeState>,
    query: &VideoQuery,
    multipart: &mut Multipart,
) -> Result<Value, ForgeError> {
    ensure_registry(state).await?;
    let stride = validated_stride(query)?;
    let pipeline_id = resolve_pipeline_id(state, query.pipeline_id.clone());
    // Resolve before touching the upload so unknown pipelines 404 cheaply.
    state.pipelines().get(&pipeline_id)?;

    let bytes = read_upload(multipart).await?;
    let spool = tempfile::NamedTempFile::new()
        .map_err(|e| ForgeError::internal(format!("could not spool upload: {}", e)))?;
    std::fs::write(spool.path(), &bytes)
        .map_err(|e| ForgeError::internal(format!("could not spool upload: {}", e)))?;

    let service = VideoPipelineService::new(
        state.plugin_registry.clone(),
        state.pipelines(),
        state.frame_sources(),
    );
    let results = service
        .run_on_file(
            spool.path(),
            &pipeline_id,
            stride,
            query.max_frames,
            None,
            None,
        )
        .await?;
    serde_json::to_value(&results)
        .map_err(|e| ForgeError::internal(format!("results did not serialize: {}", e)))
}

/// Queue an asynchronous job for the uploaded video.
///
/// # Endpoint
/// `POST /v1/video/submit?pipeline_id=`
///
/// # Returns
/// `{"job_id": "<id>"}`
pub async fn submit_video(
    State(state): State<Arc<ForgeState>>,
    Query(query): Query<VideoQuery>,
    mut multipart: Multipart,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: POST /v1/video/submit");

    let response = match submit_video_inner(&state, &query, &mut multipart).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({ "job_id": job.job_id })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/submit", "POST", status, latency_ms);
    response
}

async fn submit_video_inner(
    state: &Arc<ForgeState>,
    query: &VideoQuery,
    multipart: &mut Multipart,
) -> Result<JobRecord, ForgeError> {
    ensure_registry(state).await?;
    validated_stride(query)?;
    let pipeline_id = resolve_pipeline_id(state, query.pipeline_id.clone());
    let manager = state.jobs()?;

    // Validate before persisting the upload: no job, no file, on a bad
    // pipeline id.
    state.pipelines().get(&pipeline_id)?;

    let bytes = read_upload(multipart).await?;
    let upload_dir = state.options().upload_dir;
    std::fs::create_dir_all(&upload_dir)
        .map_err(|e| ForgeError::internal(format!("could not create upload dir: {}", e)))?;
    let input_path = upload_dir.join(format!("{}.bin", Uuid::new_v4()));
    tokio::fs::write(&input_path, &bytes)
        .await
        .map_err(|e| ForgeError::internal(format!("could not persist upload: {}", e)))?;

    manager
        .submit(&pipeline_id, None, input_path.to_string_lossy().into_owned())
        .await
}

/// Status snapshot for one job.
///
/// # Endpoint
/// `GET /v1/video/status/:job_id`
pub async fn job_status(
    State(state): State<Arc<ForgeState>>,
    Path(job_id): Path<String>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: GET /v1/video/status/{}", job_id);

    let response = match status_inner(&state, &job_id).await {
        Ok(job) => (
            StatusCode::OK,
            Json(json!({
                "job_id": job.job_id,
                "status": job.status,
                "progress": job.progress,
                "created_at": job.created_at.to_rfc3339(),
                "updated_at": job.updated_at.to_rfc3339(),
            })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/status/{id}", "GET", status, latency_ms);
    response
}

async fn status_inner(state: &ForgeState, job_id: &str) -> Result<JobRecord, ForgeError> {
    state.jobs()?.get(job_id).await
}

/// Sanitized results of a completed job.
///
/// # Endpoint
/// `GET /v1/video/results/:job_id`
///
/// 404 for unknown jobs; 400 while the job has not completed.
pub async fn job_results(
    State(state): State<Arc<ForgeState>>,
    Path(job_id): Path<String>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: GET /v1/video/results/{}", job_id);

    let response = match results_inner(&state, &job_id).await {
        Ok(body) => (StatusCode::OK, Json(body)).into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/results/{id}", "GET", status, latency_ms);
    response
}

async fn results_inner(state: &ForgeState, job_id: &str) -> Result<Value, ForgeError> {
    let job = state.jobs()?.get(job_id).await?;
    if job.status != JobStatus::Completed {
        return Err(ForgeError::invalid_input(format!(
            "job '{}' is {}, not completed",
            job_id, job.status
        )));
    }
    Ok(json!({
        "job_id": job.job_id,
        "results": job.result.unwrap_or(Value::Null),
        "created_at": job.created_at.to_rfc3339(),
        "updated_at": job.updated_at.to_rfc3339(),
    }))
}

/// Job listing, newest first.
///
/// # Endpoint
/// `GET /v1/video/jobs?status=&limit=&offset=`
pub async fn list_jobs(
    State(state): State<Arc<ForgeState>>,
    Query(query): Query<JobListQuery>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: GET /v1/video/jobs");

    let response = match list_jobs_inner(&state, &query).await {
        Ok(jobs) => {
            let jobs: Vec<Value> = jobs
                .into_iter()
                .map(|job| {
                    json!({
                        "job_id": job.job_id,
                        "pipeline_id": job.pipeline_id,
                        "tool_name": job.tool_name,
                        "status": job.status,
                        "progress": job.progress,
                        "created_at": job.created_at.to_rfc3339(),
                        "updated_at": job.updated_at.to_rfc3339(),
                    })
                })
                .collect();
            (StatusCode::OK, Json(json!({ "jobs": jobs }))).into_response()
        }
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/jobs", "GET", status, latency_ms);
    response
}

async fn list_jobs_inner(
    state: &ForgeState,
    query: &JobListQuery,
) -> Result<Vec<JobRecord>, ForgeError> {
    let status = match query.status.as_deref() {
        Some(text) => Some(
            JobStatus::parse(text)
                .ok_or_else(|| ForgeError::invalid_input(format!("unknown status '{}'", text)))?,
        ),
        None => None,
    };
    state
        .jobs()?
        .list(status, query.limit.unwrap_or(50).min(500), query.offset.unwrap_or(0))
        .await
}

/// Cooperatively cancel a queued or running job.
///
/// # Endpoint
/// `POST /v1/video/jobs/:job_id/cancel`
pub async fn cancel_job(
    State(state): State<Arc<ForgeState>>,
    Path(job_id): Path<String>,
) -> Response {
    let start = Instant::now();
    tracing::debug!("API: POST /v1/video/jobs/{}/cancel", job_id);

    let response = match cancel_inner(&state, &job_id).await {
        Ok(()) => (
            StatusCode::OK,
            Json(json!({ "job_id": job_id, "status": "cancelled" })),
        )
            .into_response(),
        Err(e) => e.into_response(),
    };

    let status = response.status().as_u16();
    let latency_ms = start.elapsed().as_millis() as f64;
    crate::metrics::record_api_http("/v1/video/jobs/{id}/cancel", "POST", status, latency_ms);
    response
}

async fn cancel_inner(state: &ForgeState, job_id: &str) -> Result<(), ForgeError> {
    state.jobs()?.cancel(job_id).await
}
