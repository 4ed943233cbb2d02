//! Step execution for the TSDHN job pipeline.
//!
//! Provides:
//! - Per-job workspaces seeded from the template model
//! - The step executor (compile, pre-checks, run, post-condition checks)
//! - Local process runner and host tool probe
//! - Built-in callbacks binding out-of-process collaborators

pub mod callbacks;
pub mod local;
pub mod step;
pub mod workspace;

pub use callbacks::{CommandCallback, ReportRenderer};
pub use local::{LocalProcessRunner, PathProbe};
pub use step::StepExecutor;
pub use workspace::WorkspaceManager;

use std::path::Path;
use tsdhn_core::{Error, Result};

/// Set the owner/group/other execute bits on `path`.
pub async fn make_executable(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;

        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| Error::workspace(path, e))?;
        let mut perms = metadata.permissions();
        perms.set_mode(perms.mode() | 0o111);
        tokio::fs::set_permissions(path, perms)
            .await
            .map_err(|e| Error::workspace(path, e))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
