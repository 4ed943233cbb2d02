//! Workers that claim and execute queued jobs.

use crate::handle::JobHandle;
use crate::runner::JobRunner;
use crate::store::{ClaimedJob, JobStore};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{error, info, warn};
use tsdhn_core::{Error, Result};

/// Timing shared by every worker in a pool.
#[derive(Debug, Clone, Copy)]
pub struct WorkerSettings {
    /// Hard wall-clock limit for one job.
    pub job_timeout: Duration,
    /// How long metadata of an ended job is kept.
    pub result_ttl: Duration,
    /// Back-off when no job is queued.
    pub poll_interval: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(2 * 60 * 60),
            result_ttl: Duration::from_secs(24 * 60 * 60),
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// A worker that claims and executes jobs, one at a time.
pub struct Worker {
    id: String,
    store: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        store: Arc<dyn JobStore>,
        runner: Arc<JobRunner>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            store,
            runner,
            settings,
        }
    }

    /// Run the worker loop until `shutdown` turns true. A job in progress is
    /// finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker_id = %self.id, "Starting worker");

        while !*shutdown.borrow() {
            let backoff = match self.run_once().await {
                Ok(true) => continue,
                Ok(false) => self.settings.poll_interval,
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Failed to claim job");
                    self.settings.poll_interval * 5
                }
            };

            tokio::select! {
                _ = sleep(backoff) => {}
                _ = shutdown.changed() => {}
            }
        }

        info!(worker_id = %self.id, "Worker stopped");
    }

    /// Claim and execute at most one job. Returns whether a job was processed.
    pub async fn run_once(&self) -> Result<bool> {
        match self.store.claim(&self.id).await? {
            Some(job) => {
                info!(worker_id = %self.id, job_id = %job.id, "Claimed job");
                self.process(job).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn process(&self, job: ClaimedJob) {
        let mut handle = JobHandle::new(job.id, self.store.clone(), self.settings.result_ttl);

        let outcome = tokio::time::timeout(
            self.settings.job_timeout,
            self.runner.execute(&mut handle, &job.skip_steps),
        )
        .await;

        match outcome {
            Ok(Ok(workspace)) => {
                info!(
                    worker_id = %self.id,
                    job_id = %job.id,
                    workspace = %workspace.display(),
                    "Job finished"
                );
            }
            Ok(Err(e)) => {
                // Rejected before the runner recorded anything
                if !handle.is_finished() {
                    let _ = handle.fail(&e).await;
                }
                warn!(worker_id = %self.id, job_id = %job.id, error = %e.describe(), "Job failed");
            }
            Err(_) => {
                // Dropping the runner future killed the running child process
                let e = Error::Timeout(format!(
                    "job exceeded {}s",
                    self.settings.job_timeout.as_secs()
                ));
                error!(worker_id = %self.id, job_id = %job.id, "Job timed out");
                if !handle.is_finished() {
                    let _ = handle.fail(&e).await;
                }
                let workspaces = self.runner.workspaces();
                workspaces.teardown(&workspaces.path_for(&job.id)).await;
            }
        }
    }
}

/// A fixed number of workers sharing one store and runner.
pub struct WorkerPool {
    store: Arc<dyn JobStore>,
    runner: Arc<JobRunner>,
    settings: WorkerSettings,
    size: usize,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn JobStore>,
        runner: Arc<JobRunner>,
        settings: WorkerSettings,
        size: usize,
    ) -> Self {
        Self {
            store,
            runner,
            settings,
            size: size.max(1),
        }
    }

    /// Run all workers until `shutdown` turns true and every worker has
    /// finished its current job.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(workers = self.size, "Starting worker pool");

        let handles: Vec<_> = (0..self.size)
            .map(|n| {
                let worker = Worker::new(
                    format!("worker-{}-{}", std::process::id(), n),
                    self.store.clone(),
                    self.runner.clone(),
                    self.settings,
                );
                let shutdown = shutdown.clone();
                tokio::spawn(async move { worker.run(shutdown).await })
            })
            .collect();

        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                error!(error = %e, "Worker task panicked");
            }
        }

        info!("Worker pool stopped");
    }
}
