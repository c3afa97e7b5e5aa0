//! Video file pipeline service: a video in, ordered per-frame results out.

use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

use crate::errors::ForgeError;
use crate::media::{FrameSource, FrameSourceFactory};
use crate::pipeline::{PipelineStore, executor};
use crate::plugins::ToolInput;
use crate::plugins::registry::PluginRegistry;

/// Progress callback: `(current_frame, total_frames)`, where `total_frames`
/// is 0 when the container did not report a count. Invoked after each
/// emitted result, with strictly increasing `current_frame`.
pub type ProgressFn = Box<dyn FnMut(u64, u64) + Send>;

/// One frame's sanitized pipeline output.
#[derive(Debug, Clone, Serialize)]
pub struct FrameResult {
    pub frame_index: u64,
    pub result: Value,
}

/// Maps a video file + pipeline id to an ordered sequence of per-frame
/// results by running the DAG once per extracted frame.
#[derive(Clone)]
pub struct VideoPipelineService {
    registry: PluginRegistry,
    pipelines: Arc<PipelineStore>,
    sources: Arc<dyn FrameSourceFactory>,
}

impl VideoPipelineService {
    pub fn new(
        registry: PluginRegistry,
        pipelines: Arc<PipelineStore>,
        sources: Arc<dyn FrameSourceFactory>,
    ) -> Self {
        Self {
            registry,
            pipelines,
            sources,
        }
    }

    /// Run `pipeline_id` over every `frame_stride`-th frame of the file.
    ///
    /// Emits at most `max_frames` results. Cancellation is checked at frame
    /// boundaries. The decoder is released on every exit path.
    pub async fn run_on_file(
        &self,
        path: &Path,
        pipeline_id: &str,
        frame_stride: u64,
        max_frames: Option<u64>,
        progress: Option<ProgressFn>,
        cancel: Option<CancellationToken>,
    ) -> Result<Vec<FrameResult>, ForgeError> {
        if frame_stride == 0 {
            return Err(ForgeError::invalid_input("frame_stride must be >= 1"));
        }
        if max_frames == Some(0) {
            return Err(ForgeError::invalid_input("max_frames must be >= 1"));
        }
        let pipeline = self.pipelines.get(pipeline_id)?;

        let mut source = self.sources.open(path).await?;
        let outcome = self
            .drive(
                source.as_mut(),
                pipeline_id,
                frame_stride,
                max_frames,
                progress,
                cancel,
                &pipeline,
            )
            .await;
        source.close().await;
        outcome
    }

    #[allow(clippy::too_many_arguments)]
    async fn drive(
        &self,
        source: &mut dyn FrameSource,
        _pipeline_id: &str,
        frame_stride: u64,
        max_frames: Option<u64>,
        mut progress: Option<ProgressFn>,
        cancel: Option<CancellationToken>,
        pipeline: &crate::pipeline::CompiledPipeline,
    ) -> Result<Vec<FrameResult>, ForgeError> {
        let total = source.total_frames().unwrap_or(0);
        let mut results = Vec::new();

        while let Some(frame) = source.next_frame().await? {
            if let Some(token) = &cancel {
                if token.is_cancelled() {
                    return Err(ForgeError::cancelled());
                }
            }
            if frame.index % frame_stride != 0 {
                continue;
            }

            let input = ToolInput::with_image(json!({ "frame_index": frame.index }), frame.jpeg);
            let value = executor::execute(pipeline, &self.registry, input).await?;
            results.push(FrameResult {
                frame_index: frame.index,
                result: value,
            });
            crate::metrics::record_frames_processed(1);

            if let Some(cb) = progress.as_mut() {
                cb(frame.index + 1, total);
            }
            if let Some(cap) = max_frames {
                if results.len() as u64 >= cap {
                    break;
                }
            }
        }

        Ok(results)
    }

    /// Run the pipeline once over a single payload (image jobs and the
    /// synchronous tool path).
    pub async fn run_payload(
        &self,
        pipeline_id: &str,
        input: ToolInput,
    ) -> Result<Value, ForgeError> {
        let pipeline = self.pipelines.get(pipeline_id)?;
        executor::execute(&pipeline, &self.registry, input).await
    }
}
