//! Job submission and lookup commands.

use super::{callbacks, connect};
use anyhow::Result;
use serde_json::json;
use std::sync::Arc;
use tsdhn_config::SystemConfig;
use tsdhn_executor::LocalProcessRunner;
use tsdhn_scheduler::JobQueue;

async fn queue(config: &SystemConfig) -> Result<JobQueue> {
    let registry = callbacks(config, Arc::new(LocalProcessRunner::new()));
    let pipeline = super::pipeline(config, &registry)?;
    let store = connect(config, 2).await?;
    Ok(JobQueue::new(Arc::new(store), pipeline, &config.jobs_root)
        .with_report_file(&config.report_file))
}

pub async fn submit(config: &SystemConfig, skip: &[String]) -> Result<()> {
    let receipt = queue(config).await?.enqueue(skip).await?;
    println!("{}", serde_json::to_string_pretty(&receipt)?);
    Ok(())
}

pub async fn status(config: &SystemConfig, id: &str) -> Result<()> {
    let info = queue(config).await?.status(id).await?;
    println!("{}", serde_json::to_string_pretty(&info)?);
    Ok(())
}

pub async fn result(config: &SystemConfig, id: &str) -> Result<()> {
    let report = queue(config).await?.report_path(id).await?;
    let body = json!({
        "path": report.path,
        "filename": report.filename,
    });
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

pub async fn health(config: &SystemConfig) -> Result<()> {
    let health = queue(config).await?.health().await;
    println!("{}", serde_json::to_string_pretty(&health)?);
    Ok(())
}

pub async fn migrate(config: &SystemConfig) -> Result<()> {
    connect(config, 1).await?.migrate().await?;
    println!("Migrations applied");
    Ok(())
}
