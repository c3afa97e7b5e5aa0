//! Asynchronous job processing: model, store, manager, worker.

pub mod manager;
pub mod store;
pub mod worker;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Job lifecycle states.
///
/// Legal transitions: `queued→running`, `running→completed`,
/// `running→failed`, `queued|running→cancelled`. Terminal states are
/// absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "completed" => Some(JobStatus::Completed),
            "failed" => Some(JobStatus::Failed),
            "cancelled" => Some(JobStatus::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persistent record of an asynchronous pipeline execution.
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job_id: String,
    pub pipeline_id: String,
    pub tool_name: Option<String>,
    pub input_ref: String,
    pub status: JobStatus,
    /// Percent complete, `0..=100`, monotone non-decreasing.
    pub progress: u8,
    pub current_frame: u64,
    pub total_frames: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Sanitized results; set iff `status == completed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure message; set iff `status == failed`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Ephemeral progress message broadcast on topic `job:{id}`. Not persisted.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressEvent {
    pub job_id: String,
    pub current_frame: u64,
    pub total_frames: u64,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_tool: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_total: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools_completed: Option<u32>,
}

impl ProgressEvent {
    pub fn new(job_id: &str, current_frame: u64, total_frames: u64) -> Self {
        Self {
            job_id: job_id.to_string(),
            current_frame,
            total_frames,
            percent: percent_of(current_frame, total_frames),
            current_tool: None,
            tools_total: None,
            tools_completed: None,
        }
    }
}

/// Percent complete, clamped to `0..=100`; 0 while the total is unknown.
pub fn percent_of(current: u64, total: u64) -> u8 {
    if total == 0 {
        return 0;
    }
    ((current.saturating_mul(100)) / total).min(100) as u8
}

/// The topic a job's progress is broadcast on.
pub fn job_topic(job_id: &str) -> String {
    format!("job:{}", job_id)
}
