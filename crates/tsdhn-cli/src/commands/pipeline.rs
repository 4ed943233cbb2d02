//! Pipeline inspection commands.

use super::callbacks;
use anyhow::Result;
use std::path::Path;
use std::sync::Arc;
use tsdhn_config::SystemConfig;
use tsdhn_config::pipeline::load_pipeline;
use tsdhn_core::StepAction;
use tsdhn_executor::LocalProcessRunner;

pub fn steps(config: &SystemConfig) -> Result<()> {
    let registry = callbacks(config, Arc::new(LocalProcessRunner::new()));
    let pipeline = super::pipeline(config, &registry)?;

    println!("Pipeline: {}", pipeline.name());
    for (index, step) in pipeline.steps().iter().enumerate() {
        let action = match &step.action {
            StepAction::Command(argv) => argv.join(" "),
            StepAction::Callback { name, .. } => format!("callback {}", name),
        };
        let dir = step.working_dir.as_deref().unwrap_or(".");
        println!("  {}. {} [{}] {}", index + 1, step.name, dir, action);
    }
    Ok(())
}

pub fn validate(config: &SystemConfig, path: Option<&Path>) -> Result<()> {
    let registry = callbacks(config, Arc::new(LocalProcessRunner::new()));
    let result = match path {
        Some(path) => load_pipeline(path, &registry).map_err(anyhow::Error::from),
        None => super::pipeline(config, &registry),
    };

    match result {
        Ok(pipeline) => {
            println!(
                "Pipeline '{}' is valid ({} steps)",
                pipeline.name(),
                pipeline.steps().len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    }
}
