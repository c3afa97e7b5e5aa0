//! Job lifecycle management.
//!
//! The manager owns the store and enforces the submission contract: the
//! pipeline must exist before a job id is ever minted, and the tool name is
//! resolved only when unambiguous — a missing tool name is never papered
//! over with a placeholder string.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::ForgeError;
use crate::jobs::store::JobStore;
use crate::jobs::{JobRecord, JobStatus, percent_of};
use crate::pipeline::PipelineStore;

/// Progress persistence threshold: absolute percent delta below which a
/// callback does not reach the database. Broadcasts are never throttled.
pub const DEFAULT_PERSIST_THRESHOLD: u8 = 5;

/// Frame-count fallback for the persist throttle while the total frame
/// count (and so a percent) is unknown.
const UNKNOWN_TOTAL_FRAME_STEP: u64 = 30;

#[derive(Clone, Copy, Debug, Default)]
struct PersistMark {
    percent: u8,
    frame: u64,
}

pub struct JobManager {
    store: JobStore,
    pipelines: Arc<PipelineStore>,
    capacity: usize,
    persist_threshold: u8,
    /// Cancellation token per job currently being processed.
    cancel_tokens: Mutex<HashMap<String, CancellationToken>>,
    /// Last persisted progress per running job, for the throttle.
    persisted: Mutex<HashMap<String, PersistMark>>,
}

impl JobManager {
    pub fn new(
        store: JobStore,
        pipelines: Arc<PipelineStore>,
        capacity: usize,
        persist_threshold: u8,
    ) -> Self {
        Self {
            store,
            pipelines,
            capacity,
            persist_threshold: persist_threshold.max(1),
            cancel_tokens: Mutex::new(HashMap::new()),
            persisted: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &JobStore {
        &self.store
    }

    /// Submit a new job. Validates the pipeline id before any job is
    /// created; re-submitting the same input always mints a distinct id.
    pub async fn submit(
        &self,
        pipeline_id: &str,
        tool_name: Option<String>,
        input_ref: String,
    ) -> Result<JobRecord, ForgeError> {
        let pipeline = self.pipelines.get(pipeline_id)?;

        // Resolve the tool only when unambiguous: a single-node pipeline has
        // a canonical tool. Multi-node pipelines leave it unset.
        let tool_name = tool_name.or_else(|| {
            if let [only] = pipeline.def.nodes.as_slice() {
                Some(only.tool_id.clone())
            } else {
                None
            }
        });

        let now = Utc::now();
        let record = JobRecord {
            job_id: Uuid::new_v4().to_string(),
            pipeline_id: pipeline_id.to_string(),
            tool_name,
            input_ref,
            status: JobStatus::Queued,
            progress: 0,
            current_frame: 0,
            total_frames: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
            result: None,
            error: None,
        };
        self.store.insert(record.clone()).await?;
        crate::metrics::record_job_event("submitted");

        let evicted = self.store.cleanup(self.capacity).await?;
        if evicted > 0 {
            tracing::debug!("Evicted {} terminal jobs over capacity", evicted);
        }
        Ok(record)
    }

    pub async fn get(&self, job_id: &str) -> Result<JobRecord, ForgeError> {
        self.store
            .get(job_id)
            .await?
            .ok_or_else(|| ForgeError::job_not_found(job_id))
    }

    pub async fn list(
        &self,
        status: Option<JobStatus>,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<JobRecord>, ForgeError> {
        self.store.list(status, limit, offset).await
    }

    /// Claim the next queued job for processing and hand back a cancellation
    /// token scoped to it.
    pub async fn claim_next(&self) -> Result<Option<(JobRecord, CancellationToken)>, ForgeError> {
        let Some(record) = self.store.claim_next_queued(Utc::now()).await? else {
            return Ok(None);
        };
        let token = CancellationToken::new();
        self.cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.job_id.clone(), token.clone());
        Ok(Some((record, token)))
    }

    /// Persist progress when it has moved at least the configured threshold
    /// since the last write. Returns whether a write happened.
    pub async fn update_progress(
        &self,
        job_id: &str,
        current_frame: u64,
        total_frames: u64,
    ) -> Result<bool, ForgeError> {
        let percent = percent_of(current_frame, total_frames);
        let due = {
            let mut marks = self.persisted.lock().unwrap_or_else(|e| e.into_inner());
            let mark = marks.entry(job_id.to_string()).or_default();
            let due = if total_frames > 0 {
                percent >= 100
                    || percent.saturating_sub(mark.percent) >= self.persist_threshold
            } else {
                current_frame.saturating_sub(mark.frame) >= UNKNOWN_TOTAL_FRAME_STEP
            };
            if due {
                *mark = PersistMark {
                    percent,
                    frame: current_frame,
                };
            }
            due
        };
        if !due {
            return Ok(false);
        }
        self.store
            .update_progress(job_id, current_frame, total_frames, percent, Utc::now())
            .await
    }

    /// `running → completed` with sanitized results.
    pub async fn complete(&self, job_id: &str, result: Value) -> Result<(), ForgeError> {
        self.store.complete(job_id, result, Utc::now()).await?;
        self.release(job_id);
        crate::metrics::record_job_event("completed");
        Ok(())
    }

    /// `running → failed` with a typed error message. The worker converts
    /// exceptions to this; a raw failure never reaches the store.
    pub async fn fail(&self, job_id: &str, error: &str) -> Result<(), ForgeError> {
        self.store.fail(job_id, error, Utc::now()).await?;
        self.release(job_id);
        crate::metrics::record_job_event("failed");
        Ok(())
    }

    /// `queued|running → cancelled`; a running job is interrupted at its
    /// next frame boundary through its cancellation token.
    pub async fn cancel(&self, job_id: &str) -> Result<(), ForgeError> {
        self.store.cancel(job_id, Utc::now()).await?;
        if let Some(token) = self
            .cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(job_id)
        {
            token.cancel();
        }
        self.release_marks(job_id);
        crate::metrics::record_job_event("cancelled");
        Ok(())
    }

    /// Mark jobs stranded in `running` by a previous process as failed.
    pub async fn recover_interrupted(&self) -> Result<usize, ForgeError> {
        let n = self.store.recover_interrupted(Utc::now()).await?;
        if n > 0 {
            tracing::warn!("Marked {} interrupted jobs as failed", n);
        }
        Ok(n)
    }

    /// Drop per-job bookkeeping once the job left `running`.
    pub(crate) fn release(&self, job_id: &str) {
        self.cancel_tokens
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
        self.release_marks(job_id);
    }

    fn release_marks(&self, job_id: &str) {
        self.persisted
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(job_id);
    }
}
