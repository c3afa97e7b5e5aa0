mod common;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::http::{Request, StatusCode, header};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::util::ServiceExt;

use forgesyte::jobs::manager::JobManager;
use forgesyte::jobs::store::JobStore;
use forgesyte::sanitize::encode_image_base64;
use forgesyte::server::service::build_router;
use forgesyte::state::{ApplicationState, ForgeState};

const BOUNDARY: &str = "forgesyte-test-boundary";

fn multipart_upload(bytes: &[u8]) -> (String, Vec<u8>) {
    let mut body = Vec::new();
    body.extend_from_slice(format!("--{}\r\n", BOUNDARY).as_bytes());
    body.extend_from_slice(
        b"Content-Disposition: form-data; name=\"file\"; filename=\"clip.mp4\"\r\n",
    );
    body.extend_from_slice(b"Content-Type: application/octet-stream\r\n\r\n");
    body.extend_from_slice(bytes);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    (
        format!("multipart/form-data; boundary={}", BOUNDARY),
        body,
    )
}

async fn router_with_builtins() -> (Arc<ForgeState>, Router) {
    let state = common::state_with_builtins().await;
    state.set_frame_sources(Arc::new(common::SyntheticFactory::with_gray_frames(&[
        10, 20, 30,
    ])));
    state.set_state(ApplicationState::Ready);
    let router = build_router(Arc::clone(&state));
    (state, router)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
/// `GET /v1/plugins` lists plugin summaries with tool names.
async fn plugins_listing_has_summaries() {
    let (_state, router) = router_with_builtins().await;
    let response = router
        .oneshot(Request::get("/v1/plugins").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = body_json(response).await;
    let list = body.as_array().unwrap();
    let probe = list
        .iter()
        .find(|p| p["id"] == "frame-probe")
        .expect("frame-probe listed");
    assert_eq!(probe["tools"], json!(["probe", "thumbnail"]));
}

#[tokio::test]
/// The manifest endpoint serves the full tool table; unknown plugins 404.
async fn manifest_endpoint_round_trips() {
    let (_state, router) = router_with_builtins().await;
    let response = router
        .clone()
        .oneshot(
            Request::get("/v1/plugins/frame-probe/manifest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["id"], "frame-probe");
    assert!(body["tools"]["probe"]["input_schema"].is_object());

    let response = router
        .oneshot(
            Request::get("/v1/plugins/ghost/manifest")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "PLUGIN_NOT_FOUND");
}

#[tokio::test]
/// Running a tool on an unknown plugin is a 400 naming the alternatives.
async fn unknown_plugin_tool_run_is_bad_request() {
    let (_state, router) = router_with_builtins().await;
    let response = router
        .oneshot(
            Request::post("/v1/plugins/unknown/tools/x/run")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({ "input": {} }).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["kind"], "PLUGIN_NOT_FOUND");
    assert!(
        body["error"]["available"]
            .as_array()
            .unwrap()
            .iter()
            .any(|v| v == "frame-probe")
    );
}

#[tokio::test]
/// Tool run decodes base64 frame data at the boundary and returns
/// sanitized output.
async fn tool_run_decodes_base64_at_the_boundary() {
    let (_state, router) = router_with_builtins().await;
    let input = json!({
        "input": { "image_base64": encode_image_base64(&common::tiny_jpeg(99, 8)) }
    });
    let response = router
        .oneshot(
            Request::post("/v1/plugins/frame-probe/tools/probe/run")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(input.to_string()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["output"]["width"], 8);
    assert_eq!(body["output"]["height"], 8);
}

#[tokio::test]
/// Synchronous processing of a 3-frame upload yields exactly three ordered
/// frame results under a single top-level key.
async fn sync_processing_returns_ordered_frame_results() {
    let (_state, router) = router_with_builtins().await;
    let (content_type, body) = multipart_upload(b"synthetic-container");
    let response = router
        .oneshot(
            Request::post("/v1/video/process?pipeline_id=frame_probe&frame_stride=1")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    let top_level: Vec<&String> = body.as_object().unwrap().keys().collect();
    assert_eq!(top_level, vec!["results"], "no extra top-level keys");
    let results = body["results"].as_array().unwrap();
    assert_eq!(results.len(), 3);
    for (i, frame) in results.iter().enumerate() {
        assert_eq!(frame["frame_index"], i as u64);
        assert!(frame["result"]["luma"]["mean"].is_number());
    }
}

#[tokio::test]
/// Query validation: stride zero 400, unknown pipeline 404.
async fn process_validates_query_parameters() {
    let (_state, router) = router_with_builtins().await;

    let (content_type, body) = multipart_upload(b"bytes");
    let response = router
        .clone()
        .oneshot(
            Request::post("/v1/video/process?frame_stride=0")
                .header(header::CONTENT_TYPE, content_type.clone())
                .body(Body::from(body.clone()))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let json_body = body_json(response).await;
    assert_eq!(json_body["error"]["kind"], "INVALID_INPUT");

    let response = router
        .oneshot(
            Request::post("/v1/video/process?pipeline_id=ghost")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let json_body = body_json(response).await;
    assert_eq!(json_body["error"]["kind"], "PIPELINE_NOT_FOUND");
}

#[tokio::test]
/// With nothing registered, the processing surface reports 503.
async fn empty_registry_is_service_unavailable() {
    let state = Arc::new(ForgeState::default());
    state.set_state(ApplicationState::Ready);
    let router = build_router(Arc::clone(&state));

    let (content_type, body) = multipart_upload(b"bytes");
    let response = router
        .oneshot(
            Request::post("/v1/video/process")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
/// Submit/status/results flow without a worker: the job stays queued,
/// status has the exact contract keys, and premature results reads are
/// rejected.
async fn submit_status_results_contract() {
    let (state, router) = router_with_builtins().await;
    let dir = TempDir::new().unwrap();
    let store = JobStore::with_path(dir.path().join("jobs.db")).unwrap();
    let manager = Arc::new(JobManager::new(store, state.pipelines(), 100, 5));
    state.set_job_manager(manager);

    // Uploads land inside the temp dir.
    let mut options = state.options();
    options.upload_dir = dir.path().join("uploads");
    state.set_options(options);

    let (content_type, body) = multipart_upload(b"synthetic-container");
    let response = router
        .clone()
        .oneshot(
            Request::post("/v1/video/submit?pipeline_id=frame_probe")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let submitted = body_json(response).await;
    let job_id = submitted["job_id"].as_str().unwrap().to_string();
    assert_eq!(submitted.as_object().unwrap().len(), 1);

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/v1/video/status/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let status = body_json(response).await;
    assert_eq!(status["job_id"], json!(job_id));
    assert_eq!(status["status"], "queued");
    assert_eq!(status["progress"], 0);
    assert!(status["created_at"].is_string());
    assert!(status["updated_at"].is_string());

    let response = router
        .clone()
        .oneshot(
            Request::get(format!("/v1/video/results/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = router
        .clone()
        .oneshot(
            Request::get("/v1/video/status/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    // The job listing surfaces the queued job, newest first.
    let response = router
        .clone()
        .oneshot(Request::get("/v1/video/jobs").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let jobs = body_json(response).await;
    assert_eq!(jobs["jobs"][0]["job_id"], json!(job_id));

    // Cancellation through the API moves it to cancelled.
    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/v1/video/jobs/{}/cancel", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let response = router
        .oneshot(
            Request::get(format!("/v1/video/status/{}", job_id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = body_json(response).await;
    assert_eq!(status["status"], "cancelled");
}

#[tokio::test]
/// Submitting against an unknown pipeline creates no job.
async fn submit_rejects_unknown_pipelines() {
    let (state, router) = router_with_builtins().await;
    let dir = TempDir::new().unwrap();
    let store = JobStore::with_path(dir.path().join("jobs.db")).unwrap();
    let manager = Arc::new(JobManager::new(store, state.pipelines(), 100, 5));
    state.set_job_manager(Arc::clone(&manager));

    let (content_type, body) = multipart_upload(b"bytes");
    let response = router
        .oneshot(
            Request::post("/v1/video/submit?pipeline_id=ghost")
                .header(header::CONTENT_TYPE, content_type)
                .body(Body::from(body))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    assert!(manager.list(None, 10, 0).await.unwrap().is_empty());
}

#[tokio::test]
/// Health endpoints negotiate content and report liveness.
async fn health_endpoints_respond() {
    let (_state, router) = router_with_builtins().await;
    let response = router
        .clone()
        .oneshot(Request::get("/livez").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let response = router
        .oneshot(
            Request::get("/livez")
                .header(header::ACCEPT, "application/json")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["status"], "live");
}

#[tokio::test]
/// Errors are always JSON bodies, never HTML.
async fn errors_are_json_only() {
    let (_state, router) = router_with_builtins().await;
    let response = router
        .oneshot(
            Request::get("/v1/video/status/ghost")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let content_type = response
        .headers()
        .get(header::CONTENT_TYPE)
        .unwrap()
        .to_str()
        .unwrap()
        .to_string();
    assert!(content_type.starts_with("application/json"));
    let body = body_json(response).await;
    assert!(body["error"]["kind"].is_string());
}
