//! In-process job store for single-process deployments and tests.

use super::{expiry, ClaimedJob, JobRecord, JobStore, RunState, DETAIL_QUEUED};
use crate::handle::{failure_detail, DETAIL_INITIALIZING};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tsdhn_core::{Error, JobId, Result};

#[derive(Debug)]
struct Entry {
    state: RunState,
    record: JobRecord,
}

#[derive(Debug, Default)]
struct Inner {
    jobs: HashMap<JobId, Entry>,
    /// Insertion order, oldest first.
    order: Vec<JobId>,
}

/// Job store held in memory.
#[derive(Debug)]
pub struct MemoryJobStore {
    inner: Mutex<Inner>,
    available: AtomicBool,
}

impl Default for MemoryJobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate losing or regaining the connection to the store.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Inner>> {
        if !self.available.load(Ordering::SeqCst) {
            return Err(Error::Infrastructure("job store is unreachable".to_string()));
        }
        self.inner
            .lock()
            .map_err(|_| Error::Internal("job store lock poisoned".to_string()))
    }
}

fn running<'a>(inner: &'a mut Inner, id: &JobId) -> Result<&'a mut Entry> {
    let entry = inner
        .jobs
        .get_mut(id)
        .ok_or_else(|| Error::NotFound(format!("job {}", id)))?;
    if entry.state != RunState::Started {
        return Err(Error::Internal(format!("job {} is not running", id)));
    }
    Ok(entry)
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn insert(&self, id: &JobId, skip_steps: &[String]) -> Result<()> {
        let mut inner = self.lock()?;
        let record = JobRecord {
            id: *id,
            status: RunState::Queued.status(),
            skip_steps: skip_steps.to_vec(),
            detail: Some(DETAIL_QUEUED.to_string()),
            error: None,
            download_url: None,
            worker_id: None,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            expires_at: None,
        };
        inner.jobs.insert(
            *id,
            Entry {
                state: RunState::Queued,
                record,
            },
        );
        inner.order.push(*id);
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let mut inner = self.lock()?;
        let Inner { jobs, order } = &mut *inner;

        let Some(id) = order
            .iter()
            .find(|id| jobs.get(id).is_some_and(|e| e.state == RunState::Queued))
            .copied()
        else {
            return Ok(None);
        };

        let Some(entry) = jobs.get_mut(&id) else {
            return Ok(None);
        };
        entry.state = RunState::Started;
        entry.record.status = RunState::Started.status();
        entry.record.worker_id = Some(worker_id.to_string());
        entry.record.started_at = Some(Utc::now());
        entry.record.detail = Some(DETAIL_INITIALIZING.to_string());

        Ok(Some(ClaimedJob {
            id,
            skip_steps: entry.record.skip_steps.clone(),
        }))
    }

    async fn set_detail(&self, id: &JobId, detail: &str) -> Result<()> {
        let mut inner = self.lock()?;
        running(&mut inner, id)?.record.detail = Some(detail.to_string());
        Ok(())
    }

    async fn complete(
        &self,
        id: &JobId,
        detail: &str,
        download_url: &str,
        ttl: Duration,
    ) -> Result<()> {
        let mut inner = self.lock()?;
        let entry = running(&mut inner, id)?;
        entry.state = RunState::Finished;
        entry.record.status = RunState::Finished.status();
        entry.record.detail = Some(detail.to_string());
        entry.record.download_url = Some(download_url.to_string());
        entry.record.ended_at = Some(Utc::now());
        entry.record.expires_at = Some(expiry(ttl));
        Ok(())
    }

    async fn fail(&self, id: &JobId, detail: &str, error: &str, ttl: Duration) -> Result<()> {
        let mut inner = self.lock()?;
        let entry = running(&mut inner, id)?;
        entry.state = RunState::Failed;
        entry.record.status = RunState::Failed.status();
        entry.record.detail = Some(detail.to_string());
        entry.record.error = Some(error.to_string());
        entry.record.ended_at = Some(Utc::now());
        entry.record.expires_at = Some(expiry(ttl));
        Ok(())
    }

    async fn stop_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        ttl: Duration,
    ) -> Result<Vec<JobId>> {
        let mut inner = self.lock()?;
        let Inner { jobs, order } = &mut *inner;

        let mut stopped = Vec::new();
        for id in order.iter() {
            let Some(entry) = jobs.get_mut(id) else {
                continue;
            };
            let stale = entry.state == RunState::Started
                && entry.record.started_at.is_some_and(|at| at <= started_before);
            if !stale {
                continue;
            }
            entry.state = RunState::Stopped;
            entry.record.status = RunState::Stopped.status();
            entry.record.detail = Some(failure_detail(entry.record.detail.as_deref()));
            entry.record.error = Some(error.to_string());
            entry.record.ended_at = Some(Utc::now());
            entry.record.expires_at = Some(expiry(ttl));
            stopped.push(*id);
        }
        Ok(stopped)
    }

    async fn fetch(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let inner = self.lock()?;
        Ok(inner.jobs.get(id).map(|e| e.record.clone()))
    }

    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut inner = self.lock()?;
        let Inner { jobs, order } = &mut *inner;

        let before = jobs.len();
        jobs.retain(|_, e| e.record.expires_at.is_none_or(|at| at >= now));
        order.retain(|id| jobs.contains_key(id));
        Ok((before - jobs.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdhn_core::JobStatus;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_claim_order_and_exclusivity() {
        let store = MemoryJobStore::new();
        let first = JobId::new();
        let second = JobId::new();
        store.insert(&first, &[]).await.unwrap();
        store
            .insert(&second, &["tsunami".to_string()])
            .await
            .unwrap();

        let a = store.claim("worker-0").await.unwrap().unwrap();
        let b = store.claim("worker-1").await.unwrap().unwrap();
        assert_eq!(a.id, first);
        assert_eq!(b.id, second);
        assert_eq!(b.skip_steps, vec!["tsunami"]);
        assert!(store.claim("worker-2").await.unwrap().is_none());

        let record = store.fetch(&first).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Running);
        assert_eq!(record.worker_id.as_deref(), Some("worker-0"));
        assert_eq!(record.detail.as_deref(), Some("initializing"));
        assert!(record.started_at.is_some());
    }

    #[tokio::test]
    async fn test_terminal_states_are_final() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();
        store.claim("w").await.unwrap();
        store
            .complete(&id, "completed successfully", "/job-result/x", TTL)
            .await
            .unwrap();

        assert!(store.set_detail(&id, "processing `deform`").await.is_err());
        assert!(store.fail(&id, "failed", "boom", TTL).await.is_err());

        let record = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert_eq!(record.detail.as_deref(), Some("completed successfully"));
        assert!(record.expires_at.is_some());
    }

    #[tokio::test]
    async fn test_detail_requires_running_job() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();

        assert!(store.set_detail(&id, "initializing").await.is_err());
        assert!(matches!(
            store.set_detail(&JobId::new(), "x").await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_new_job_waits_in_queue() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();

        let record = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Queued);
        assert_eq!(record.detail.as_deref(), Some("Waiting in queue"));
    }

    #[tokio::test]
    async fn test_fail_requires_running_job() {
        let store = MemoryJobStore::new();
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();

        let err = store.fail(&id, "failed", "boom", TTL).await.unwrap_err();
        assert!(matches!(err, Error::Internal(_)));
        assert_eq!(
            store.fetch(&id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );
    }

    #[tokio::test]
    async fn test_stop_stale_jobs() {
        let store = MemoryJobStore::new();
        let stale = JobId::new();
        let queued = JobId::new();
        store.insert(&stale, &[]).await.unwrap();
        store.claim("w").await.unwrap();
        store.set_detail(&stale, "processing `tsunami`").await.unwrap();
        store.insert(&queued, &[]).await.unwrap();

        let earlier = Utc::now() - chrono::Duration::seconds(60);
        assert!(store.stop_stale(earlier, "TimeoutError: x", TTL).await.unwrap().is_empty());

        let stopped = store
            .stop_stale(Utc::now(), "TimeoutError: x", TTL)
            .await
            .unwrap();
        assert_eq!(stopped, vec![stale]);

        let record = store.fetch(&stale).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.detail.as_deref(), Some("failed at: processing `tsunami`"));
        assert_eq!(record.error.as_deref(), Some("TimeoutError: x"));
        assert!(record.expires_at.is_some());
        assert!(store.set_detail(&stale, "again").await.is_err());

        let record = store.fetch(&queued).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Queued);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let store = MemoryJobStore::new();
        let done = JobId::new();
        let queued = JobId::new();
        store.insert(&done, &[]).await.unwrap();
        store.insert(&queued, &[]).await.unwrap();
        store.claim("w").await.unwrap();
        store.fail(&done, "failed at: initializing", "x", TTL).await.unwrap();

        assert_eq!(store.purge_expired(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert_eq!(store.purge_expired(later).await.unwrap(), 1);
        assert!(store.fetch(&done).await.unwrap().is_none());
        assert!(store.fetch(&queued).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_unavailable_store() {
        let store = MemoryJobStore::new();
        store.set_available(false);

        let err = store.insert(&JobId::new(), &[]).await.unwrap_err();
        assert_eq!(err.kind(), "InfrastructureError");
        assert!(store.ping().await.is_err());

        store.set_available(true);
        assert!(store.ping().await.is_ok());
    }
}
