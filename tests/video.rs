mod common;

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio_util::sync::CancellationToken;

use forgesyte::errors::ErrorKind;
use forgesyte::media::service::{ProgressFn, VideoPipelineService};
use forgesyte::state::ForgeState;

async fn service_with_frames(levels: &[u8]) -> (Arc<ForgeState>, VideoPipelineService) {
    let state = common::state_with_builtins().await;
    state.set_frame_sources(Arc::new(common::SyntheticFactory::with_gray_frames(levels)));
    let service = VideoPipelineService::new(
        state.plugin_registry.clone(),
        state.pipelines(),
        state.frame_sources(),
    );
    (state, service)
}

#[tokio::test]
/// Stride 2 over six frames emits exactly the frames at indices 0, 2, 4,
/// strictly increasing.
async fn stride_selects_every_nth_frame() {
    let (_state, service) = service_with_frames(&[10, 20, 30, 40, 50, 60]).await;
    let results = service
        .run_on_file(Path::new("synthetic.mp4"), "frame_probe", 2, None, None, None)
        .await
        .unwrap();
    let indices: Vec<u64> = results.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![0, 2, 4]);
    for r in &results {
        assert!(r.result["width"].is_number());
    }
}

#[tokio::test]
/// `frame_stride=1, max_frames=1` processes exactly one frame.
async fn max_frames_caps_the_run() {
    let (_state, service) = service_with_frames(&[10, 20, 30]).await;
    let results = service
        .run_on_file(
            Path::new("synthetic.mp4"),
            "frame_probe",
            1,
            Some(1),
            None,
            None,
        )
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].frame_index, 0);
}

#[tokio::test]
/// Stride zero is rejected before any decoding happens.
async fn stride_zero_is_invalid_input() {
    let (_state, service) = service_with_frames(&[10]).await;
    let err = service
        .run_on_file(Path::new("synthetic.mp4"), "frame_probe", 0, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::InvalidInput);
}

#[tokio::test]
/// Unknown pipelines fail before the decoder opens.
async fn unknown_pipeline_is_reported() {
    let (_state, service) = service_with_frames(&[10]).await;
    let err = service
        .run_on_file(Path::new("synthetic.mp4"), "nope", 1, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::PipelineNotFound);
}

#[tokio::test]
/// Progress strictly increases and reports the container's total.
async fn progress_is_strictly_monotonic() {
    let (_state, service) = service_with_frames(&[10, 20, 30, 40]).await;
    let seen = Arc::new(std::sync::Mutex::new(Vec::<(u64, u64)>::new()));
    let sink = Arc::clone(&seen);
    let progress: ProgressFn = Box::new(move |current, total| {
        sink.lock().unwrap().push((current, total));
    });
    service
        .run_on_file(
            Path::new("synthetic.mp4"),
            "frame_probe",
            1,
            None,
            Some(progress),
            None,
        )
        .await
        .unwrap();
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 4);
    for window in seen.windows(2) {
        assert!(window[1].0 > window[0].0, "progress regressed: {:?}", *seen);
    }
    assert_eq!(seen.last().unwrap(), &(4, 4));
}

#[tokio::test]
/// A cancelled token stops the run at a frame boundary with CANCELLED.
async fn cancellation_stops_at_frame_boundaries() {
    let (_state, service) = service_with_frames(&[10, 20, 30]).await;
    let token = CancellationToken::new();
    token.cancel();
    let err = service
        .run_on_file(
            Path::new("synthetic.mp4"),
            "frame_probe",
            1,
            None,
            None,
            Some(token),
        )
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Cancelled);
}

#[tokio::test]
/// An unopenable container reports VIDEO_OPEN_FAILED.
async fn open_failure_is_reported() {
    let state = common::state_with_builtins().await;
    state.set_frame_sources(Arc::new(common::SyntheticFactory::failing()));
    let service = VideoPipelineService::new(
        state.plugin_registry.clone(),
        state.pipelines(),
        state.frame_sources(),
    );
    let err = service
        .run_on_file(Path::new("broken.mp4"), "frame_probe", 1, None, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::VideoOpenFailed);
}

#[tokio::test]
/// The per-frame results arrive in frame-index order even under a chained
/// pipeline with stateful nodes.
async fn chained_pipeline_preserves_frame_order() {
    let (_state, service) = service_with_frames(&[10, 10, 240, 240]).await;
    let results = service
        .run_on_file(
            Path::new("synthetic.mp4"),
            "probe_motion",
            1,
            None,
            None,
            None,
        )
        .await
        .unwrap();
    let indices: Vec<u64> = results.iter().map(|r| r.frame_index).collect();
    assert_eq!(indices, vec![0, 1, 2, 3]);
    assert_eq!(results[0].result["baseline"], true);
    // The 10 → 240 jump crosses the motion threshold.
    assert_eq!(results[2].result["changed"], true);
}

#[tokio::test]
/// Counter-based sanity: the synthetic factory opens one source per run.
async fn each_run_opens_a_fresh_source() {
    struct CountingFactory {
        inner: common::SyntheticFactory,
        opens: AtomicU64,
    }

    #[async_trait::async_trait]
    impl forgesyte::media::FrameSourceFactory for CountingFactory {
        async fn open(
            &self,
            path: &Path,
        ) -> Result<Box<dyn forgesyte::media::FrameSource>, forgesyte::errors::ForgeError>
        {
            self.opens.fetch_add(1, Ordering::SeqCst);
            self.inner.open(path).await
        }
    }

    let state = common::state_with_builtins().await;
    let factory = Arc::new(CountingFactory {
        inner: common::SyntheticFactory::with_gray_frames(&[10, 20]),
        opens: AtomicU64::new(0),
    });
    state.set_frame_sources(factory.clone());
    let service = VideoPipelineService::new(
        state.plugin_registry.clone(),
        state.pipelines(),
        state.frame_sources(),
    );
    for _ in 0..2 {
        service
            .run_on_file(Path::new("synthetic.mp4"), "frame_probe", 1, None, None, None)
            .await
            .unwrap();
    }
    assert_eq!(factory.opens.load(Ordering::SeqCst), 2);
}
