//! Job status and the documents exposed to callers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::JobId;

/// Public lifecycle of a job.
///
/// `Queued -> Running -> {Completed, Failed}`. Terminal states never
/// transition further.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status document returned for a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInfo {
    pub status: JobStatus,
    pub details: Option<String>,
    pub error: Option<String>,
    pub download_url: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

/// Acknowledgement returned by a successful submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitReceipt {
    pub status: JobStatus,
    pub job_id: JobId,
    pub message: String,
}

impl SubmitReceipt {
    pub fn queued(job_id: JobId) -> Self {
        Self {
            status: JobStatus::Queued,
            job_id,
            message: "TSDHN job has been queued successfully".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_states() {
        assert!(!JobStatus::Queued.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Completed.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_document_shape() {
        let info = JobInfo {
            status: JobStatus::Running,
            details: Some("processing `deform`".to_string()),
            error: None,
            download_url: None,
            created_at: None,
            started_at: None,
            ended_at: None,
        };

        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["details"], "processing `deform`");
        assert!(json["ended_at"].is_null());
    }

    #[test]
    fn test_receipt_is_queued() {
        let receipt = SubmitReceipt::queued(JobId::new());
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["status"], "queued");
    }
}
