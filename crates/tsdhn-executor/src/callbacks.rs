//! Built-in step callbacks.
//!
//! Physics, plotting and report templating live outside this crate. These
//! callbacks bind them to pipeline steps by running them as programs.

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};
use tsdhn_config::{CallbackConfig, ReportRendererConfig};
use tsdhn_core::{Error, Invocation, MissingFile, ProcessRunner, Result, StepCallback};

/// A named callback made of one or more program runs.
pub struct CommandCallback {
    name: String,
    commands: Vec<Vec<String>>,
    runner: Arc<dyn ProcessRunner>,
}

impl CommandCallback {
    pub fn new(name: impl Into<String>, commands: Vec<Vec<String>>, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            name: name.into(),
            commands,
            runner,
        }
    }

    pub fn from_config(config: &CallbackConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self::new(config.name.clone(), config.commands.clone(), runner)
    }
}

#[async_trait]
impl StepCallback for CommandCallback {
    async fn run(&self, working_dir: &Path) -> Result<()> {
        for argv in &self.commands {
            let invocation = Invocation::from_argv(argv, working_dir).ok_or_else(|| {
                Error::Callback(format!("callback '{}' has an empty command", self.name))
            })?;
            debug!(callback = %self.name, command = %invocation.display(), "Running callback command");
            run_checked(self.runner.as_ref(), &invocation).await?;
        }
        Ok(())
    }
}

/// Renders the final report: optional templating, then the document
/// renderer, then removal of intermediate files.
pub struct ReportRenderer {
    config: ReportRendererConfig,
    runner: Arc<dyn ProcessRunner>,
}

impl ReportRenderer {
    pub fn new(config: ReportRendererConfig, runner: Arc<dyn ProcessRunner>) -> Self {
        Self { config, runner }
    }

    fn document_file(&self, extension: &str) -> String {
        format!("{}.{}", self.config.document, extension)
    }
}

#[async_trait]
impl StepCallback for ReportRenderer {
    async fn run(&self, working_dir: &Path) -> Result<()> {
        if let Some(template) = &self.config.template {
            let invocation = Invocation::from_argv(template, working_dir)
                .ok_or_else(|| Error::Callback("empty report template command".to_string()))?;
            info!(command = %invocation.display(), "Generating report source");
            run_checked(self.runner.as_ref(), &invocation).await?;
        }

        let source = working_dir.join(self.document_file("tex"));
        if !tokio::fs::try_exists(&source).await.unwrap_or(false) {
            return Err(Error::MissingFiles(vec![MissingFile {
                path: source,
                message: "Report source not generated".to_string(),
            }]));
        }

        // Cross references need more than one pass
        for pass in 1..=self.config.passes {
            let invocation = Invocation::new(&self.config.renderer, working_dir)
                .arg("-interaction=nonstopmode")
                .arg(self.document_file("tex"));
            info!(pass, renderer = %self.config.renderer, "Rendering report");
            run_checked(self.runner.as_ref(), &invocation).await?;
        }

        for extension in ["aux", "out", "log", "tex"] {
            let path = working_dir.join(self.document_file(extension));
            if let Err(e) = tokio::fs::remove_file(&path).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    return Err(Error::workspace(path, e));
                }
            }
        }

        let pdf = working_dir.join(self.document_file("pdf"));
        let size = match tokio::fs::metadata(&pdf).await {
            Ok(metadata) => metadata.len(),
            Err(_) => {
                return Err(Error::MissingFiles(vec![MissingFile {
                    path: pdf,
                    message: "Report PDF not generated".to_string(),
                }]));
            }
        };
        if size < self.config.min_size {
            return Err(Error::Callback(format!(
                "{} is only {} bytes, expected at least {}",
                pdf.display(),
                size,
                self.config.min_size
            )));
        }

        info!(path = %pdf.display(), size, "Report rendered");
        Ok(())
    }
}

async fn run_checked(runner: &dyn ProcessRunner, invocation: &Invocation) -> Result<()> {
    let output = runner.run(invocation).await?;
    if !output.success() {
        return Err(Error::CommandFailed {
            program: invocation.display(),
            code: output.code,
            output: output.output,
        });
    }
    Ok(())
}
