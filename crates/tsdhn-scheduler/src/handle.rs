//! Explicit access to the metadata of the job being executed.

use crate::store::JobStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use tsdhn_core::{Error, JobId, Result};

pub const DETAIL_INITIALIZING: &str = "initializing";
pub const DETAIL_COMPLETED: &str = "completed successfully";

/// Detail recorded for a failed job whose last detail was `last`.
pub(crate) fn failure_detail(last: Option<&str>) -> String {
    format!("failed at: {}", last.unwrap_or(DETAIL_INITIALIZING))
}

/// Handle held by the worker that owns a job. All metadata writes for the
/// job go through it.
pub struct JobHandle {
    id: JobId,
    store: Arc<dyn JobStore>,
    result_ttl: Duration,
    last_detail: Option<String>,
    finished: bool,
}

impl JobHandle {
    pub fn new(id: JobId, store: Arc<dyn JobStore>, result_ttl: Duration) -> Self {
        Self {
            id,
            store,
            result_ttl,
            last_detail: None,
            finished: false,
        }
    }

    pub fn id(&self) -> &JobId {
        &self.id
    }

    /// Last progress detail written for this job.
    pub fn last_detail(&self) -> Option<&str> {
        self.last_detail.as_deref()
    }

    /// Whether a terminal state has been recorded.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub async fn set_detail(&mut self, detail: impl Into<String>) -> Result<()> {
        let detail = detail.into();
        debug!(job_id = %self.id, detail = %detail, "Updating job detail");
        self.last_detail = Some(detail.clone());
        self.store.set_detail(&self.id, &detail).await
    }

    pub async fn complete(&mut self, download_url: &str) -> Result<()> {
        self.store
            .complete(&self.id, DETAIL_COMPLETED, download_url, self.result_ttl)
            .await?;
        self.last_detail = Some(DETAIL_COMPLETED.to_string());
        self.finished = true;
        Ok(())
    }

    /// Record a failure. The detail names the last thing the job was doing.
    pub async fn fail(&mut self, error: &Error) -> Result<()> {
        let detail = failure_detail(self.last_detail.as_deref());
        let result = self
            .store
            .fail(&self.id, &detail, &error.describe(), self.result_ttl)
            .await;
        match &result {
            Ok(()) => self.finished = true,
            Err(e) => warn!(job_id = %self.id, error = %e, "Failed to record job failure"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;
    use tsdhn_core::JobStatus;

    async fn running_job(store: &Arc<MemoryJobStore>) -> JobId {
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();
        store.claim("w").await.unwrap();
        id
    }

    #[tokio::test]
    async fn test_failure_detail_references_last_step() {
        let store = Arc::new(MemoryJobStore::new());
        let id = running_job(&store).await;
        let mut handle = JobHandle::new(id, store.clone(), Duration::from_secs(60));

        handle.set_detail("processing `tsunami`").await.unwrap();
        handle
            .fail(&Error::Callback("plot failed".to_string()))
            .await
            .unwrap();
        assert!(handle.is_finished());

        let record = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.detail.as_deref(), Some("failed at: processing `tsunami`"));
        assert_eq!(
            record.error.as_deref(),
            Some("StepExecutionError: callback failed: plot failed")
        );
    }

    #[tokio::test]
    async fn test_complete() {
        let store = Arc::new(MemoryJobStore::new());
        let id = running_job(&store).await;
        let mut handle = JobHandle::new(id, store.clone(), Duration::from_secs(60));

        handle.complete("/job-result/abc").await.unwrap();
        assert_eq!(handle.last_detail(), Some("completed successfully"));

        let info = store.fetch(&id).await.unwrap().unwrap().info();
        assert_eq!(info.status, JobStatus::Completed);
        assert_eq!(info.download_url.as_deref(), Some("/job-result/abc"));
        assert!(info.ended_at.is_some());
    }
}
