//! Guards for caller-supplied job identifiers and the paths derived from them.

use crate::store::{JobRecord, JobStore};
use std::path::{Component, Path, PathBuf};
use tsdhn_core::{Error, JobId, Result};

/// Parse `id` as a v4 UUID and require a job record for it.
///
/// Malformed identifiers are validation errors; well-formed but unknown ones
/// are not-found errors.
pub async fn validate_job_id(store: &dyn JobStore, id: &str) -> Result<(JobId, JobRecord)> {
    let job_id = JobId::parse(id)?;
    let record = store
        .fetch(&job_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("job {}", job_id)))?;
    Ok((job_id, record))
}

/// Resolve the workspace directory of `id` under `jobs_root`.
///
/// The result is always a descendant of `jobs_root`, after `..` components
/// and symlinks are resolved.
pub fn resolve_job_dir(jobs_root: &Path, id: &str) -> Result<PathBuf> {
    let lexical_root = normalize(
        &std::path::absolute(jobs_root).map_err(|e| Error::workspace(jobs_root, e))?,
    );
    let candidate = normalize(&lexical_root.join(id));
    let relative = contained(&lexical_root, &candidate, id)?.to_path_buf();

    // Nothing on disk yet, so no symlink can redirect the path
    let root = match lexical_root.canonicalize() {
        Ok(root) => root,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(candidate),
        Err(e) => return Err(Error::workspace(jobs_root, e)),
    };

    // Symlinks inside the jobs directory may still point elsewhere
    let candidate = root.join(relative);
    let resolved = match candidate.canonicalize() {
        Ok(path) => path,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => candidate,
        Err(e) => return Err(Error::workspace(&candidate, e)),
    };
    contained(&root, &resolved, id)?;

    Ok(resolved)
}

/// The part of `path` below `root`. A path equal to `root` is not contained.
fn contained<'a>(root: &Path, path: &'a Path, id: &str) -> Result<&'a Path> {
    match path.strip_prefix(root) {
        Ok(relative) if !relative.as_os_str().is_empty() => Ok(relative),
        _ => Err(Error::InvalidPath(format!("{id:?} escapes the jobs directory"))),
    }
}

/// Lexically resolve `.` and `..` components.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
