//! Submission, status and result lookup.

use crate::security::{resolve_job_dir, validate_job_id};
use crate::store::JobStore;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tsdhn_core::{Error, JobId, JobInfo, JobStatus, PipelineDefinition, Result, SubmitReceipt};

/// Report file ready for download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportFile {
    pub path: PathBuf,
    /// Suggested download filename.
    pub filename: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Health {
    pub status: &'static str,
    pub queue: &'static str,
    pub timestamp: DateTime<Utc>,
}

/// Front door of the job system. Workers pick submitted jobs up
/// asynchronously.
pub struct JobQueue {
    store: Arc<dyn JobStore>,
    pipeline: PipelineDefinition,
    jobs_root: PathBuf,
    report_file: String,
}

impl JobQueue {
    pub fn new(
        store: Arc<dyn JobStore>,
        pipeline: PipelineDefinition,
        jobs_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            store,
            pipeline,
            jobs_root: jobs_root.into(),
            report_file: "reporte.pdf".to_string(),
        }
    }

    /// Final deliverable, relative to the workspace root.
    pub fn with_report_file(mut self, report_file: impl Into<String>) -> Self {
        self.report_file = report_file.into();
        self
    }

    /// Validate the skip list and queue a new job.
    ///
    /// The job is recorded as queued before any worker can see it. A store
    /// failure is returned as is.
    pub async fn enqueue(&self, skip_steps: &[String]) -> Result<SubmitReceipt> {
        let skip = self.pipeline.validate_skip(skip_steps)?;
        let job_id = JobId::new();

        self.store.insert(&job_id, &skip.names()).await?;

        info!(job_id = %job_id, skip = ?skip.names(), "Job queued");
        Ok(SubmitReceipt::queued(job_id))
    }

    /// Status document of a job. Malformed and unknown identifiers are both
    /// not-found errors.
    pub async fn status(&self, id: &str) -> Result<JobInfo> {
        let job_id = JobId::parse(id).map_err(|_| Error::NotFound(format!("job {}", id)))?;
        let record = self
            .store
            .fetch(&job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
        Ok(record.info())
    }

    /// Location of the final report of a completed job.
    pub async fn report_path(&self, id: &str) -> Result<ReportFile> {
        let (job_id, record) = validate_job_id(self.store.as_ref(), id).await?;
        if record.status != JobStatus::Completed {
            return Err(Error::NotReady(record.status));
        }

        let dir = resolve_job_dir(&self.jobs_root, &job_id.to_string())?;
        let path = dir.join(&self.report_file);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!(job_id = %job_id, path = %path.display(), "Report missing for completed job");
            return Err(Error::NotFound(format!("report for job {}", job_id)));
        }

        Ok(ReportFile {
            path,
            filename: format!("tsdhn_report_{}.pdf", job_id),
        })
    }

    pub async fn health(&self) -> Health {
        let connected = match self.store.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Job store unreachable");
                false
            }
        };
        Health {
            status: if connected { "healthy" } else { "unhealthy" },
            queue: if connected { "connected" } else { "disconnected" },
            timestamp: Utc::now(),
        }
    }
}
