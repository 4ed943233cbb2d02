//! Drives the pipeline for one job.

use crate::handle::{JobHandle, DETAIL_INITIALIZING};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tsdhn_config::VariableContextBuilder;
use tsdhn_core::{Error, PipelineDefinition, Result, SkipList, ToolProbe};
use tsdhn_executor::{StepExecutor, WorkspaceManager};

/// Runs every non-skipped step of the pipeline, in declared order, inside a
/// fresh workspace. On failure the workspace is deleted and the job marked
/// failed; on success the workspace is kept.
pub struct JobRunner {
    pipeline: PipelineDefinition,
    workspaces: WorkspaceManager,
    executor: StepExecutor,
    probe: Arc<dyn ToolProbe>,
    required_tools: Vec<String>,
    download_prefix: String,
    variables: BTreeMap<String, String>,
}

impl JobRunner {
    pub fn new(
        pipeline: PipelineDefinition,
        workspaces: WorkspaceManager,
        executor: StepExecutor,
        probe: Arc<dyn ToolProbe>,
    ) -> Self {
        Self {
            pipeline,
            workspaces,
            executor,
            probe,
            required_tools: Vec::new(),
            download_prefix: "/job-result".to_string(),
            variables: BTreeMap::new(),
        }
    }

    /// Host tools checked before the workspace is created.
    pub fn with_required_tools(mut self, tools: Vec<String>) -> Self {
        self.required_tools = tools;
        self
    }

    pub fn with_download_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.download_prefix = prefix.into();
        self
    }

    /// Custom variables for step command templates.
    pub fn with_variables(mut self, variables: BTreeMap<String, String>) -> Self {
        self.variables = variables;
        self
    }

    pub fn pipeline(&self) -> &PipelineDefinition {
        &self.pipeline
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Execute the job owned by `handle`. Returns the workspace on success.
    ///
    /// Invalid skip names are rejected before anything is written.
    pub async fn execute(&self, handle: &mut JobHandle, skip_steps: &[String]) -> Result<PathBuf> {
        let skip = self.pipeline.validate_skip(skip_steps)?;
        let job_id = *handle.id();

        let mut current_step = None;
        let outcome = match self.run_steps(handle, &skip, &mut current_step).await {
            Ok(workspace) => {
                let download_url = format!("{}/{}", self.download_prefix, job_id);
                handle.complete(&download_url).await.map(|()| workspace)
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok(workspace) => {
                info!(job_id = %job_id, "Job completed");
                Ok(workspace)
            }
            Err(e) => {
                error!(
                    job_id = %job_id,
                    step = current_step.as_deref().unwrap_or(DETAIL_INITIALIZING),
                    error = %e,
                    "Job failed"
                );
                // A failed metadata write must not mask the step error
                let _ = handle.fail(&e).await;
                self.workspaces
                    .teardown(&self.workspaces.path_for(&job_id))
                    .await;
                Err(Error::JobFailed {
                    step: current_step.unwrap_or_else(|| DETAIL_INITIALIZING.to_string()),
                    source: Box::new(e),
                })
            }
        }
    }

    async fn run_steps(
        &self,
        handle: &mut JobHandle,
        skip: &SkipList,
        current_step: &mut Option<String>,
    ) -> Result<PathBuf> {
        let job_id = *handle.id();
        handle.set_detail(DETAIL_INITIALIZING).await?;

        let missing = self.probe.missing(&self.required_tools);
        if !missing.is_empty() {
            return Err(Error::MissingDependencies(missing));
        }

        let workspace = self.workspaces.setup(&job_id).await?;

        let mut vars = self
            .variables
            .iter()
            .fold(VariableContextBuilder::new(), |builder, (name, value)| {
                builder.with_custom(name, value)
            })
            .with_job(job_id.to_string())
            .with_workspace(workspace.display().to_string())
            .build();
        vars.populate_env();

        for (index, step) in self.pipeline.plan(skip) {
            *current_step = Some(step.name.clone());

            let working_dir = match &step.working_dir {
                Some(dir) => {
                    let dir = workspace.join(dir);
                    tokio::fs::create_dir_all(&dir)
                        .await
                        .map_err(|e| Error::workspace(&dir, e))?;
                    dir
                }
                None => workspace.clone(),
            };

            handle
                .set_detail(format!("processing `{}`", step.name))
                .await?;
            info!(job_id = %job_id, step = %step.name, index, "Running step");

            let step_vars = vars.for_step(&step.name, index, &working_dir.display().to_string());
            self.executor.run(step, &working_dir, &step_vars).await?;
        }

        for name in skip.names() {
            info!(job_id = %job_id, step = %name, "Step skipped");
        }

        Ok(workspace)
    }
}
