//! CLI command implementations.

pub mod jobs;
pub mod pipeline;
pub mod worker;

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use tsdhn_config::SystemConfig;
use tsdhn_config::pipeline::{default_pipeline, load_pipeline};
use tsdhn_config::system::load_system_config;
use tsdhn_core::{CallbackRegistry, PipelineDefinition, ProcessRunner};
use tsdhn_executor::{CommandCallback, ReportRenderer};
use tsdhn_scheduler::PgJobStore;

/// Name of the report rendering callback.
pub const REPORT_CALLBACK: &str = "report";

/// Load the system configuration, falling back to defaults when the file is absent.
pub fn load_config(path: &Path) -> Result<SystemConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "Configuration file not found, using defaults");
        return Ok(SystemConfig::default());
    }
    let config = load_system_config(path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    info!(path = %path.display(), "Loaded configuration");
    Ok(config)
}

/// Callbacks available to pipeline steps.
pub fn callbacks(config: &SystemConfig, runner: Arc<dyn ProcessRunner>) -> CallbackRegistry {
    let mut registry = CallbackRegistry::new();
    registry.register(
        REPORT_CALLBACK,
        Arc::new(ReportRenderer::new(
            config.report_renderer.clone(),
            runner.clone(),
        )),
    );
    for callback in &config.callbacks {
        registry.register(
            callback.name.clone(),
            Arc::new(CommandCallback::from_config(callback, runner.clone())),
        );
    }
    registry
}

/// The configured pipeline, or the embedded one.
pub fn pipeline(config: &SystemConfig, registry: &CallbackRegistry) -> Result<PipelineDefinition> {
    match &config.pipeline {
        Some(path) => load_pipeline(path, registry)
            .with_context(|| format!("failed to load pipeline from {}", path.display())),
        None => default_pipeline(registry).context("embedded pipeline is invalid"),
    }
}

pub async fn connect(config: &SystemConfig, max_connections: u32) -> Result<PgJobStore> {
    PgJobStore::connect(&config.database_url, max_connections)
        .await
        .context("failed to connect to the job store")
}
