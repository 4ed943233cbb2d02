//! Job scheduling for the TSDHN pipeline.
//!
//! Jobs are queued in a durable store and claimed by workers with
//! PostgreSQL `SKIP LOCKED`. Each claimed job is executed by the
//! [`JobRunner`] inside its own workspace.

pub mod handle;
pub mod queue;
pub mod retention;
pub mod runner;
pub mod security;
pub mod store;
pub mod worker;

pub use handle::JobHandle;
pub use queue::{Health, JobQueue, ReportFile};
pub use retention::{Janitor, SweepReport};
pub use runner::JobRunner;
pub use security::{resolve_job_dir, validate_job_id};
pub use store::{ClaimedJob, JobRecord, JobStore, MemoryJobStore, PgJobStore};
pub use worker::{Worker, WorkerPool, WorkerSettings};
