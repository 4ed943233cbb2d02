//! Expiry of job metadata, recovery of abandoned jobs and, when configured,
//! removal of old workspaces.

use crate::store::JobStore;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use tsdhn_core::{Error, JobId, Result};
use tsdhn_executor::WorkspaceManager;

/// Outcome of one sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stopped_jobs: usize,
    pub purged_jobs: u64,
    pub removed_workspaces: usize,
}

/// Periodically purges expired job metadata. Workspaces of ended jobs are
/// deleted only when a workspace retention window is set.
///
/// Jobs still running past their deadline belong to a worker that died
/// without recording an outcome. They are stopped as timed out and their
/// workspaces deleted.
pub struct Janitor {
    store: Arc<dyn JobStore>,
    workspaces: WorkspaceManager,
    workspace_retention: Option<Duration>,
    stale_after: Option<Duration>,
    result_ttl: Duration,
}

impl Janitor {
    pub fn new(
        store: Arc<dyn JobStore>,
        workspaces: WorkspaceManager,
        workspace_retention: Option<Duration>,
    ) -> Self {
        Self {
            store,
            workspaces,
            workspace_retention,
            stale_after: None,
            result_ttl: Duration::from_secs(24 * 60 * 60),
        }
    }

    /// Stop jobs that have been running longer than `stale_after`. Their
    /// metadata is kept for `result_ttl`.
    pub fn with_stale_after(mut self, stale_after: Duration, result_ttl: Duration) -> Self {
        self.stale_after = Some(stale_after);
        self.result_ttl = result_ttl;
        self
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let stopped_jobs = match self.stale_after {
            Some(after) => self.stop_stale_jobs(after).await?,
            None => 0,
        };

        let purged_jobs = self.store.purge_expired(Utc::now()).await?;
        if purged_jobs > 0 {
            info!(count = purged_jobs, "Purged expired job metadata");
        }

        let removed_workspaces = match self.workspace_retention {
            Some(retention) => self.remove_old_workspaces(retention).await?,
            None => 0,
        };

        Ok(SweepReport {
            stopped_jobs,
            purged_jobs,
            removed_workspaces,
        })
    }

    /// Sweep every `interval` until `shutdown` turns true.
    pub async fn run(&self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        while !*shutdown.borrow() {
            if let Err(e) = self.sweep().await {
                warn!(error = %e, "Retention sweep failed");
            }
            tokio::select! {
                _ = sleep(interval) => {}
                _ = shutdown.changed() => {}
            }
        }
    }

    async fn stop_stale_jobs(&self, after: Duration) -> Result<usize> {
        let after = chrono::Duration::from_std(after).unwrap_or(chrono::Duration::MAX);
        let cutoff = Utc::now()
            .checked_sub_signed(after)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        let error = Error::Timeout(format!(
            "job still running after {}s, its worker is gone",
            after.num_seconds()
        ));

        let stopped = self
            .store
            .stop_stale(cutoff, &error.describe(), self.result_ttl)
            .await?;
        for id in &stopped {
            warn!(job_id = %id, "Stopped abandoned job");
            self.workspaces.teardown(&self.workspaces.path_for(id)).await;
        }
        Ok(stopped.len())
    }

    async fn remove_old_workspaces(&self, retention: Duration) -> Result<usize> {
        let root = self.workspaces.jobs_root();
        let mut entries = match tokio::fs::read_dir(root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(Error::workspace(root, e)),
        };

        let cutoff = SystemTime::now()
            .checked_sub(retention)
            .unwrap_or(SystemTime::UNIX_EPOCH);
        let mut removed = 0;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::workspace(root, e))?
        {
            let Some(job_id) = entry.file_name().to_str().and_then(|n| JobId::parse(n).ok())
            else {
                continue;
            };

            let modified = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified,
                Err(e) => {
                    debug!(path = %entry.path().display(), error = %e, "Skipping workspace");
                    continue;
                }
            };
            if modified > cutoff {
                continue;
            }

            // Never delete the workspace of a job that is still active
            let active = self
                .store
                .fetch(&job_id)
                .await?
                .is_some_and(|record| !record.status.is_terminal());
            if active {
                continue;
            }

            self.workspaces.teardown(&entry.path()).await;
            removed += 1;
        }

        if removed > 0 {
            info!(count = removed, "Removed old workspaces");
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryJobStore;

    fn janitor(
        root: &std::path::Path,
        store: Arc<MemoryJobStore>,
        retention: Option<Duration>,
    ) -> Janitor {
        Janitor::new(
            store,
            WorkspaceManager::new(root.join("jobs"), root.join("model")),
            retention,
        )
    }

    #[tokio::test]
    async fn test_workspaces_kept_without_retention() {
        let root = tempfile::tempdir().unwrap();
        let workspace = root.path().join("jobs").join(JobId::new().to_string());
        std::fs::create_dir_all(&workspace).unwrap();

        let report = janitor(root.path(), Arc::new(MemoryJobStore::new()), None)
            .sweep()
            .await
            .unwrap();
        assert_eq!(report, SweepReport::default());
        assert!(workspace.exists());
    }

    #[tokio::test]
    async fn test_old_workspaces_removed() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let ended = JobId::new();
        let running = JobId::new();
        store.insert(&running, &[]).await.unwrap();
        store.claim("w").await.unwrap();

        let jobs = root.path().join("jobs");
        for id in [ended, running] {
            std::fs::create_dir_all(jobs.join(id.to_string())).unwrap();
        }
        std::fs::create_dir_all(jobs.join("not-a-job")).unwrap();

        let report = janitor(root.path(), store, Some(Duration::ZERO))
            .sweep()
            .await
            .unwrap();

        assert_eq!(report.removed_workspaces, 1);
        assert!(!jobs.join(ended.to_string()).exists());
        assert!(jobs.join(running.to_string()).exists());
        assert!(jobs.join("not-a-job").exists());
    }

    #[tokio::test]
    async fn test_abandoned_jobs_stopped() {
        let root = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryJobStore::new());

        let abandoned = JobId::new();
        store.insert(&abandoned, &[]).await.unwrap();
        store.claim("dead-worker").await.unwrap();
        store.set_detail(&abandoned, "processing `tsunami`").await.unwrap();
        let queued = JobId::new();
        store.insert(&queued, &[]).await.unwrap();

        let workspace = root.path().join("jobs").join(abandoned.to_string());
        std::fs::create_dir_all(&workspace).unwrap();

        let fresh = janitor(root.path(), store.clone(), None)
            .with_stale_after(Duration::from_secs(3600), Duration::from_secs(60));
        assert_eq!(fresh.sweep().await.unwrap().stopped_jobs, 0);
        assert!(workspace.exists());

        let report = janitor(root.path(), store.clone(), None)
            .with_stale_after(Duration::ZERO, Duration::from_secs(60))
            .sweep()
            .await
            .unwrap();
        assert_eq!(report.stopped_jobs, 1);
        assert!(!workspace.exists());

        let record = store.fetch(&abandoned).await.unwrap().unwrap();
        assert_eq!(record.status, tsdhn_core::JobStatus::Failed);
        assert_eq!(record.detail.as_deref(), Some("failed at: processing `tsunami`"));
        assert!(record.error.unwrap().starts_with("TimeoutError: "));
        assert!(record.expires_at.is_some());

        let record = store.fetch(&queued).await.unwrap().unwrap();
        assert_eq!(record.status, tsdhn_core::JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_recent_workspaces_kept() {
        let root = tempfile::tempdir().unwrap();
        let workspace = root.path().join("jobs").join(JobId::new().to_string());
        std::fs::create_dir_all(&workspace).unwrap();

        let report = janitor(
            root.path(),
            Arc::new(MemoryJobStore::new()),
            Some(Duration::from_secs(3600)),
        )
        .sweep()
        .await
        .unwrap();
        assert_eq!(report.removed_workspaces, 0);
        assert!(workspace.exists());
    }
}
