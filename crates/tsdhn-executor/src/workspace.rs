//! Per-job workspaces.

use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use tsdhn_core::{Error, JobId, Result};

/// Creates and destroys `<jobs_root>/<job_id>` directories seeded from the
/// template model.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    jobs_root: PathBuf,
    template_dir: PathBuf,
}

impl WorkspaceManager {
    pub fn new(jobs_root: impl Into<PathBuf>, template_dir: impl Into<PathBuf>) -> Self {
        Self {
            jobs_root: jobs_root.into(),
            template_dir: template_dir.into(),
        }
    }

    pub fn jobs_root(&self) -> &Path {
        &self.jobs_root
    }

    pub fn template_dir(&self) -> &Path {
        &self.template_dir
    }

    /// Workspace location for a job. Does not touch the filesystem.
    pub fn path_for(&self, job_id: &JobId) -> PathBuf {
        self.jobs_root.join(job_id.to_string())
    }

    /// Create a fresh workspace for `job_id`.
    ///
    /// An existing workspace for the same job is deleted first, so the result
    /// is always a single clean copy of the template.
    pub async fn setup(&self, job_id: &JobId) -> Result<PathBuf> {
        let workspace = self.path_for(job_id);

        let template = tokio::fs::metadata(&self.template_dir)
            .await
            .map_err(|e| Error::workspace(&self.template_dir, e))?;
        if !template.is_dir() {
            return Err(Error::workspace(
                &self.template_dir,
                std::io::Error::new(
                    std::io::ErrorKind::NotADirectory,
                    "template model is not a directory",
                ),
            ));
        }

        tokio::fs::create_dir_all(&self.jobs_root)
            .await
            .map_err(|e| Error::workspace(&self.jobs_root, e))?;

        if tokio::fs::try_exists(&workspace).await.unwrap_or(false) {
            debug!(path = %workspace.display(), "Removing stale workspace");
            tokio::fs::remove_dir_all(&workspace)
                .await
                .map_err(|e| Error::workspace(&workspace, e))?;
        }

        copy_tree(&self.template_dir, &workspace).await?;

        info!(job_id = %job_id, path = %workspace.display(), "Workspace created");
        Ok(workspace)
    }

    /// Delete a workspace. Failures are logged and swallowed.
    pub async fn teardown(&self, workspace: &Path) {
        match tokio::fs::remove_dir_all(workspace).await {
            Ok(()) => info!(path = %workspace.display(), "Workspace removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %workspace.display(), error = %e, "Failed to remove workspace"),
        }
    }
}

/// Recursively copy `src` into a new directory `dst`.
#[async_recursion::async_recursion]
async fn copy_tree(src: &Path, dst: &Path) -> Result<()> {
    tokio::fs::create_dir(dst)
        .await
        .map_err(|e| Error::workspace(dst, e))?;

    let mut entries = tokio::fs::read_dir(src)
        .await
        .map_err(|e| Error::workspace(src, e))?;

    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| Error::workspace(src, e))?
    {
        let from = entry.path();
        let to = dst.join(entry.file_name());
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| Error::workspace(&from, e))?;

        if file_type.is_dir() {
            copy_tree(&from, &to).await?;
        } else if file_type.is_symlink() {
            copy_symlink(&from, &to).await?;
        } else {
            // Permission bits travel with the copy
            tokio::fs::copy(&from, &to)
                .await
                .map_err(|e| Error::workspace(&from, e))?;
        }
    }

    Ok(())
}

#[cfg(unix)]
async fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    let target = tokio::fs::read_link(from)
        .await
        .map_err(|e| Error::workspace(from, e))?;
    tokio::fs::symlink(&target, to)
        .await
        .map_err(|e| Error::workspace(to, e))
}

#[cfg(not(unix))]
async fn copy_symlink(from: &Path, to: &Path) -> Result<()> {
    tokio::fs::copy(from, to)
        .await
        .map(|_| ())
        .map_err(|e| Error::workspace(from, e))
}
