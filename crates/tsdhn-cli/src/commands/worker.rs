//! The long-running worker process.

use super::{callbacks, connect};
use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::watch;
use tracing::{info, warn};
use tsdhn_config::SystemConfig;
use tsdhn_core::ProcessRunner;
use tsdhn_executor::{LocalProcessRunner, PathProbe, StepExecutor, WorkspaceManager};
use tsdhn_scheduler::{Janitor, JobRunner, JobStore, WorkerPool, WorkerSettings};

/// Extra time past the job timeout before a running job counts as abandoned.
const STALE_GRACE: Duration = Duration::from_secs(5 * 60);

pub async fn run(config: SystemConfig, workers: Option<usize>) -> Result<()> {
    let workers = workers.unwrap_or(config.workers).max(1);

    let runner: Arc<dyn ProcessRunner> = Arc::new(LocalProcessRunner::new());
    let registry = callbacks(&config, runner.clone());
    let pipeline = super::pipeline(&config, &registry)?;

    let store: Arc<dyn JobStore> = Arc::new(connect(&config, workers as u32 + 2).await?);
    let workspaces = WorkspaceManager::new(&config.jobs_root, &config.template_dir);

    let job_runner = JobRunner::new(
        pipeline,
        workspaces.clone(),
        StepExecutor::new(runner),
        Arc::new(PathProbe::from_env()),
    )
    .with_required_tools(config.required_tools.clone())
    .with_download_prefix(config.download_prefix.clone())
    .with_variables(config.variables.clone());

    let settings = WorkerSettings {
        job_timeout: config.job_timeout,
        result_ttl: config.result_ttl,
        poll_interval: config.poll_interval,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    });

    let janitor = Janitor::new(store.clone(), workspaces, config.workspace_retention)
        .with_stale_after(config.job_timeout + STALE_GRACE, config.result_ttl);
    let sweep_interval = config.sweep_interval;
    let janitor_shutdown = shutdown_rx.clone();
    let janitor_task =
        tokio::spawn(async move { janitor.run(sweep_interval, janitor_shutdown).await });

    info!(
        workers,
        jobs_root = %config.jobs_root.display(),
        template_dir = %config.template_dir.display(),
        "Worker process started"
    );
    WorkerPool::new(store, Arc::new(job_runner), settings, workers)
        .run(shutdown_rx)
        .await;

    janitor_task.await?;
    Ok(())
}

/// Resolves on SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, finishing running jobs"),
        _ = terminate => info!("Received SIGTERM, finishing running jobs"),
    }
}
