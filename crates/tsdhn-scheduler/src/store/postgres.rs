//! Job store backed by PostgreSQL.

use super::{map_native_state, ClaimedJob, JobRecord, JobStore, DETAIL_QUEUED};
use crate::handle::DETAIL_INITIALIZING;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tsdhn_core::{Error, JobId, Result};
use uuid::Uuid;

/// Database row for jobs.
#[derive(Debug, Clone, sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    state: String,
    skip_steps: Vec<String>,
    detail: Option<String>,
    error: Option<String>,
    download_url: Option<String>,
    worker_id: Option<String>,
    created_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    expires_at: Option<DateTime<Utc>>,
}

impl TryFrom<JobRow> for JobRecord {
    type Error = Error;

    fn try_from(row: JobRow) -> Result<Self> {
        Ok(JobRecord {
            id: JobId::try_from(row.id)?,
            status: map_native_state(&row.state),
            skip_steps: row.skip_steps,
            detail: row.detail,
            error: row.error,
            download_url: row.download_url,
            worker_id: row.worker_id,
            created_at: row.created_at,
            started_at: row.started_at,
            ended_at: row.ended_at,
            expires_at: row.expires_at,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct ClaimRow {
    id: Uuid,
    skip_steps: Vec<String>,
}

/// Convert a database error into the shared taxonomy.
fn db_err(e: sqlx::Error) -> Error {
    match e {
        sqlx::Error::RowNotFound => Error::NotFound("job".to_string()),
        other => Error::Infrastructure(other.to_string()),
    }
}

/// PostgreSQL job store. Claims use `SKIP LOCKED` so concurrent workers
/// never receive the same job.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to the database.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self::new(pool))
    }

    /// Run database migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| Error::Infrastructure(format!("migration failed: {}", e)))
    }

    fn ttl_secs(ttl: Duration) -> f64 {
        ttl.as_secs_f64()
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn insert(&self, id: &JobId, skip_steps: &[String]) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tsdhn_jobs (id, state, skip_steps, detail, created_at)
            VALUES ($1, 'queued', $2, $3, NOW())
            "#,
        )
        .bind(id.as_uuid())
        .bind(skip_steps)
        .bind(DETAIL_QUEUED)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn claim(&self, worker_id: &str) -> Result<Option<ClaimedJob>> {
        let row = sqlx::query_as::<_, ClaimRow>(
            r#"
            UPDATE tsdhn_jobs
            SET state = 'started', worker_id = $1, started_at = NOW(), detail = $2
            WHERE id = (
                SELECT id FROM tsdhn_jobs
                WHERE state = 'queued'
                ORDER BY created_at ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            RETURNING id, skip_steps
            "#,
        )
        .bind(worker_id)
        .bind(DETAIL_INITIALIZING)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.map(|row| {
            Ok(ClaimedJob {
                id: JobId::try_from(row.id)?,
                skip_steps: row.skip_steps,
            })
        })
        .transpose()
    }

    async fn set_detail(&self, id: &JobId, detail: &str) -> Result<()> {
        let result =
            sqlx::query("UPDATE tsdhn_jobs SET detail = $2 WHERE id = $1 AND state = 'started'")
                .bind(id.as_uuid())
                .bind(detail)
                .execute(&self.pool)
                .await
                .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::Internal(format!("job {} is not running", id)));
        }
        Ok(())
    }

    async fn complete(
        &self,
        id: &JobId,
        detail: &str,
        download_url: &str,
        ttl: Duration,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tsdhn_jobs
            SET state = 'finished', detail = $2, download_url = $3, ended_at = NOW(),
                expires_at = NOW() + make_interval(secs => $4)
            WHERE id = $1 AND state = 'started'
            "#,
        )
        .bind(id.as_uuid())
        .bind(detail)
        .bind(download_url)
        .bind(Self::ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::Internal(format!("job {} is not running", id)));
        }
        Ok(())
    }

    async fn fail(&self, id: &JobId, detail: &str, error: &str, ttl: Duration) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE tsdhn_jobs
            SET state = 'failed', detail = $2, error = $3, ended_at = NOW(),
                expires_at = NOW() + make_interval(secs => $4)
            WHERE id = $1 AND state = 'started'
            "#,
        )
        .bind(id.as_uuid())
        .bind(detail)
        .bind(error)
        .bind(Self::ttl_secs(ttl))
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(Error::Internal(format!("job {} is not running", id)));
        }
        Ok(())
    }

    async fn stop_stale(
        &self,
        started_before: DateTime<Utc>,
        error: &str,
        ttl: Duration,
    ) -> Result<Vec<JobId>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE tsdhn_jobs
            SET state = 'stopped', detail = 'failed at: ' || COALESCE(detail, $2),
                error = $3, ended_at = NOW(),
                expires_at = NOW() + make_interval(secs => $4)
            WHERE state = 'started' AND started_at <= $1
            RETURNING id
            "#,
        )
        .bind(started_before)
        .bind(DETAIL_INITIALIZING)
        .bind(error)
        .bind(Self::ttl_secs(ttl))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        ids.into_iter().map(JobId::try_from).collect()
    }

    async fn fetch(&self, id: &JobId) -> Result<Option<JobRecord>> {
        let row = sqlx::query_as::<_, JobRow>("SELECT * FROM tsdhn_jobs WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.map(JobRecord::try_from).transpose()
    }

    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM tsdhn_jobs WHERE expires_at IS NOT NULL AND expires_at < $1",
        )
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tsdhn_core::JobStatus;

    async fn store() -> PgJobStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgJobStore::connect(&url, 2).await.unwrap();
        store.migrate().await.unwrap();
        store
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_job_lifecycle() {
        let store = store().await;
        let id = JobId::new();
        store.insert(&id, &["tsunami".to_string()]).await.unwrap();
        assert_eq!(
            store.fetch(&id).await.unwrap().unwrap().status,
            JobStatus::Queued
        );

        // Other tests may have left queued jobs behind
        let mut claimed = None;
        while let Some(job) = store.claim("pg-test").await.unwrap() {
            if job.id == id {
                claimed = Some(job);
                break;
            }
        }
        assert_eq!(claimed.unwrap().skip_steps, vec!["tsunami"]);

        store.set_detail(&id, "processing `deform`").await.unwrap();
        store
            .complete(&id, "completed successfully", "/job-result/x", Duration::from_secs(60))
            .await
            .unwrap();

        let record = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Completed);
        assert!(record.expires_at.is_some());
        assert!(store.set_detail(&id, "again").await.is_err());
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_stop_stale() {
        let store = store().await;
        let id = JobId::new();
        store.insert(&id, &[]).await.unwrap();
        assert_eq!(
            store.fetch(&id).await.unwrap().unwrap().detail.as_deref(),
            Some("Waiting in queue")
        );
        while let Some(job) = store.claim("pg-test").await.unwrap() {
            if job.id == id {
                break;
            }
        }

        let stopped = store
            .stop_stale(Utc::now(), "TimeoutError: x", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(stopped.contains(&id));

        let record = store.fetch(&id).await.unwrap().unwrap();
        assert_eq!(record.status, JobStatus::Failed);
        assert_eq!(record.detail.as_deref(), Some("failed at: initializing"));
    }

    #[tokio::test]
    #[ignore = "requires a PostgreSQL database"]
    async fn test_ping() {
        store().await.ping().await.unwrap();
    }
}
