//! Execution of a single processing step.

use crate::make_executable;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use tsdhn_config::VariableContext;
use tsdhn_core::{
    CompileRule, Error, FileCheck, Invocation, MissingFile, ProcessRunner, ProcessingStep, Result,
    StepAction,
};

/// Runs one step inside a working directory.
///
/// The executor only touches the filesystem and spawns processes. Job status
/// belongs to the caller.
#[derive(Clone)]
pub struct StepExecutor {
    runner: Arc<dyn ProcessRunner>,
}

impl StepExecutor {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    pub async fn run(
        &self,
        step: &ProcessingStep,
        working_dir: &Path,
        vars: &VariableContext,
    ) -> Result<()> {
        match &step.action {
            StepAction::Callback { name, callback } => {
                info!(step = %step.name, callback = %name, "Running callback");
                callback.run(working_dir).await?;
            }
            StepAction::Command(template) => {
                if let Some(rule) = &step.compile {
                    self.compile(rule, working_dir, vars).await?;
                }

                if !step.pre_checks.is_empty() {
                    let missing = missing_files(&step.pre_checks, working_dir).await;
                    if !missing.is_empty() {
                        return Err(Error::MissingFiles(missing));
                    }
                    for check in &step.pre_checks {
                        make_executable(&working_dir.join(&check.path)).await?;
                    }
                }

                for exe in &step.executables {
                    let path = working_dir.join(exe);
                    if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
                        return Err(Error::MissingFiles(vec![MissingFile {
                            path,
                            message: "auxiliary executable not found".to_string(),
                        }]));
                    }
                    make_executable(&path).await?;
                }

                let argv = vars.interpolate_vec(template);
                let invocation = Invocation::from_argv(&argv, working_dir).ok_or_else(|| {
                    Error::Validation(format!("step '{}' has an empty command", step.name))
                })?;

                if let Some(target) = local_program(&invocation.program, working_dir) {
                    if tokio::fs::try_exists(&target).await.unwrap_or(false) {
                        make_executable(&target).await?;
                    }
                }

                info!(step = %step.name, command = %invocation.display(), "Running command");
                let output = self.runner.run(&invocation).await?;
                if !output.success() {
                    return Err(Error::CommandFailed {
                        program: invocation.display(),
                        code: output.code,
                        output: output.output,
                    });
                }
                if !output.output.is_empty() {
                    debug!(step = %step.name, output = %output.output, "Command output");
                }
            }
        }

        let missing = missing_files(&step.file_checks, working_dir).await;
        if !missing.is_empty() {
            warn!(step = %step.name, missing = missing.len(), "Post-condition files missing");
            return Err(Error::MissingFiles(missing));
        }

        Ok(())
    }

    async fn compile(
        &self,
        rule: &CompileRule,
        working_dir: &Path,
        vars: &VariableContext,
    ) -> Result<()> {
        let argv = vars.interpolate_vec(&rule.argv());
        let invocation = Invocation::from_argv(&argv, working_dir)
            .ok_or_else(|| Error::Internal("empty compiler command".to_string()))?;

        info!(source = %rule.source, output = %rule.output, "Compiling");
        let output = self.runner.run(&invocation).await?;
        if !output.success() {
            return Err(Error::CommandFailed {
                program: invocation.display(),
                code: output.code,
                output: output.output,
            });
        }

        make_executable(&working_dir.join(&rule.output)).await
    }
}

/// The file a command resolves to when it names a path relative to the
/// working directory, like `./tsunami` or `bin/espejo`.
fn local_program(program: &str, working_dir: &Path) -> Option<PathBuf> {
    let path = Path::new(program);
    let is_relative_path = path.components().count() > 1
        || matches!(path.components().next(), Some(Component::CurDir));
    (path.is_relative() && is_relative_path).then(|| working_dir.join(path))
}

async fn missing_files(checks: &[FileCheck], working_dir: &Path) -> Vec<MissingFile> {
    let mut missing = Vec::new();
    for check in checks {
        let path = working_dir.join(&check.path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            missing.push(MissingFile {
                path,
                message: check.message.clone(),
            });
        }
    }
    missing
}
