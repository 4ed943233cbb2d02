//! Local process execution and host tool discovery.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};
use tsdhn_core::{Error, Invocation, ProcessOutput, ProcessRunner, Result, ToolProbe};

/// Runs programs as child processes of the worker.
///
/// Children are killed when the future awaiting them is dropped, so a job
/// timeout also stops the external program it was waiting on.
#[derive(Debug, Clone, Default)]
pub struct LocalProcessRunner;

impl LocalProcessRunner {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl ProcessRunner for LocalProcessRunner {
    async fn run(&self, invocation: &Invocation) -> Result<ProcessOutput> {
        debug!(
            command = %invocation.display(),
            dir = %invocation.working_dir.display(),
            "Spawning process"
        );

        let output = Command::new(&invocation.program)
            .args(&invocation.args)
            .envs(&invocation.env)
            .current_dir(&invocation.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| Error::Spawn {
                program: invocation.program.clone(),
                source,
            })?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = match (stdout.trim().is_empty(), stderr.trim().is_empty()) {
            (false, false) => format!("{}\n{}", stdout.trim_end(), stderr.trim_end()),
            (false, true) => stdout.trim_end().to_string(),
            (true, false) => stderr.trim_end().to_string(),
            (true, true) => String::new(),
        };

        if !output.status.success() {
            warn!(
                command = %invocation.display(),
                code = ?output.status.code(),
                "Process exited unsuccessfully"
            );
        }

        Ok(ProcessOutput {
            code: output.status.code(),
            output: combined,
        })
    }
}

/// Looks tools up on the `PATH` of the worker process.
#[derive(Debug, Clone)]
pub struct PathProbe {
    dirs: Vec<PathBuf>,
}

impl PathProbe {
    /// Probe using the current `PATH`.
    pub fn from_env() -> Self {
        let dirs = std::env::var_os("PATH")
            .map(|path| std::env::split_paths(&path).collect())
            .unwrap_or_default();
        Self { dirs }
    }

    /// Probe a fixed list of directories.
    pub fn with_dirs(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    fn is_executable(path: &Path) -> bool {
        match std::fs::metadata(path) {
            Ok(metadata) if metadata.is_file() => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    metadata.permissions().mode() & 0o111 != 0
                }
                #[cfg(not(unix))]
                {
                    true
                }
            }
            _ => false,
        }
    }
}

impl Default for PathProbe {
    fn default() -> Self {
        Self::from_env()
    }
}

impl ToolProbe for PathProbe {
    fn is_available(&self, tool: &str) -> bool {
        if tool.contains('/') {
            return Self::is_executable(Path::new(tool));
        }
        self.dirs.iter().any(|dir| Self::is_executable(&dir.join(tool)))
    }
}
