//! Durable job metadata.
//!
//! The store keeps the queue's native run-state vocabulary
//! (`queued`, `started`, `finished`, `failed`, `stopped`) and maps it onto
//! the public [`JobStatus`] when read.

pub mod memory;
pub mod postgres;

pub use memory::MemoryJobStore;
pub use postgres::PgJobStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use tsdhn_core::{JobId, JobInfo, JobStatus, Result};

/// Detail of a job that has not been claimed yet.
pub const DETAIL_QUEUED: &str = "Waiting in queue";

/// Native run states of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Queued,
    Started,
    Finished,
    Failed,
    Stopped,
}

impl RunState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunState::Queued => "queued",
            RunState::Started => "started",
            RunState::Finished => "finished",
            RunState::Failed => "failed",
            RunState::Stopped => "stopped",
        }
    }

    pub fn status(&self) -> JobStatus {
        map_native_state(self.as_str())
    }
}

/// Map a native state string onto the public status. Anything unrecognised
/// is reported as queued.
pub fn map_native_state(state: &str) -> JobStatus {
    match state {
        "started" => JobStatus::Running,
        "finished" => JobStatus::Completed,
        "failed" | "stopped" => JobStatus::Failed,
        _ => JobStatus::Queued,
    }
}

/// Persisted metadata of one job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRecord {
    pub id: JobId,
    pub status: JobStatus,
    pub skip_steps: Vec<String>,
    pub detail: Option<String>,
    pub error: Option<String>,
    pub download_url: Option<String>,
    pub worker_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl JobRecord {
    /// Status document for callers.
    pub fn info(&self) -> JobInfo {
        JobInfo {
            status: self.status,
            details: self.detail.clone(),
            error: self.error.clone(),
            download_url: self.download_url.clone(),
            created_at: Some(self.created_at),
            started_at: self.started_at,
            ended_at: self.ended_at,
        }
    }
}

/// A job handed to a worker by [`JobStore::claim`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimedJob {
    pub id: JobId,
    pub skip_steps: Vec<String>,
}

/// Storage for job metadata and the queue of pending jobs.
///
/// Only the worker that claimed a job writes to it afterwards. Updates to a
/// job that is no longer running are rejected.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Record a new queued job.
    async fn insert(&self, id: &JobId, skip_steps: &[String]) -> Result<()>;

    /// Take the oldest queued job, marking it started. Each job is handed
    /// out at most once.
    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>>;

    async fn set_detail(&self, id: &JobId, detail: &str) -> Result<()>;

    /// Mark a running job finished. Metadata expires `ttl` after now.
    async fn complete(&self, id: &JobId, detail: &str, download_url: &str, ttl: Duration)
    -> Result<()>;

    /// Mark a running job failed. Metadata expires `ttl` after now.
    async fn fail(&self, id: &JobId, detail: &str, error: &str, ttl: Duration) -> Result<()>;

    /// Stop every running job that started at or before `started_before`.
    /// Stopped jobs report as failed with `error`, and a detail naming their
    /// last progress. Returns the ids of the stopped jobs.
    async fn stop_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        ttl: Duration,
    ) -> Result<Vec<JobId>>;

    async fn fetch(&self, id: &JobId) -> Result<Option<JobRecord>>;

    /// Check connectivity.
    async fn ping(&self) -> Result<()>;

    /// Delete metadata that expired before `now`. Returns the number of jobs removed.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

pub(crate) fn expiry(ttl: Duration) -> DateTime<Utc> {
    let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
    Utc::now()
        .checked_add_signed(ttl)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
