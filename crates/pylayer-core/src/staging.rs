use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;

use crate::error::{build_error, BuildError, BuildErrorKind};
use crate::fs::{remove_file_entry, remove_path, Removal};

/// Sibling paths derived from one output archive path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct OutputPaths {
    pub(crate) output: PathBuf,
    pub(crate) staging: PathBuf,
    pub(crate) partial: PathBuf,
    pub(crate) lock: PathBuf,
}

impl OutputPaths {
    pub(crate) fn for_output(output: &Path) -> Option<Self> {
        let name = output.file_name()?.to_str()?;
        if name.is_empty() || name == "." || name == ".." {
            return None;
        }
        let parent = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        Some(Self {
            output: parent.join(name),
            staging: parent.join(format!(".{name}.staging")),
            partial: parent.join(format!("{name}.partial")),
            lock: parent.join(format!(".{name}.lock")),
        })
    }

    pub(crate) fn parent(&self) -> &Path {
        self.output.parent().unwrap_or_else(|| Path::new("."))
    }
}

/// Remove a stale artifact before a build; anything but absence or removal is a conflict.
pub(crate) fn clear_stale(path: &Path, what: &str) -> Result<(), BuildError> {
    match remove_path(path) {
        Ok(Removal::Removed) => {
            tracing::debug!(path = %path.display(), what, "removed stale artifact");
            Ok(())
        }
        Ok(Removal::Absent) => Ok(()),
        Err(err) => Err(build_error(
            BuildErrorKind::StagingConflict,
            &format!("stale {what} cannot be removed"),
            json!({
                "path": path.display().to_string(),
                "error": err.to_string(),
                "reason": "stale_path_not_removable",
            }),
        )),
    }
}

/// Remove a stale archive at `path`. A directory there belongs to the user and
/// is reported as a conflict without being touched.
pub(crate) fn clear_stale_file(path: &Path, what: &str) -> Result<(), BuildError> {
    if fs::symlink_metadata(path).is_ok_and(|meta| meta.is_dir()) {
        return Err(build_error(
            BuildErrorKind::StagingConflict,
            &format!("{what} path is a directory"),
            json!({
                "path": path.display().to_string(),
                "reason": "output_is_directory",
                "hint": "pass an archive file path such as layers/<name>/python.zip",
            }),
        ));
    }
    match remove_file_entry(path) {
        Ok(Removal::Removed) => {
            tracing::debug!(path = %path.display(), what, "removed stale artifact");
            Ok(())
        }
        Ok(Removal::Absent) => Ok(()),
        Err(err) => Err(build_error(
            BuildErrorKind::StagingConflict,
            &format!("stale {what} cannot be removed"),
            json!({
                "path": path.display().to_string(),
                "error": err.to_string(),
                "reason": "stale_path_not_removable",
            }),
        )),
    }
}

/// Scratch directory owned by exactly one build.
///
/// `release` removes it and reports failures; dropping an unreleased guard
/// removes it best-effort.
#[derive(Debug)]
pub(crate) struct StagingDir {
    path: PathBuf,
    released: bool,
}

impl StagingDir {
    pub(crate) fn acquire(path: &Path) -> Result<Self, BuildError> {
        clear_stale(path, "staging directory")?;
        fs::create_dir_all(path).map_err(|err| {
            build_error(
                BuildErrorKind::StagingConflict,
                "failed to create staging directory",
                json!({
                    "path": path.display().to_string(),
                    "error": err.to_string(),
                    "reason": "staging_not_creatable",
                }),
            )
        })?;
        tracing::debug!(path = %path.display(), "acquired staging directory");
        Ok(Self {
            path: path.to_path_buf(),
            released: false,
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    pub(crate) fn release(mut self) -> Result<(), BuildError> {
        self.released = true;
        match remove_path(&self.path) {
            Ok(_) => {
                tracing::debug!(path = %self.path.display(), "released staging directory");
                Ok(())
            }
            Err(err) => Err(build_error(
                BuildErrorKind::CleanupFailure,
                "staging directory could not be removed",
                json!({
                    "path": self.path.display().to_string(),
                    "error": err.to_string(),
                }),
            )),
        }
    }
}

impl Drop for StagingDir {
    fn drop(&mut self) {
        if self.released {
            return;
        }
        if let Err(err) = remove_path(&self.path) {
            tracing::warn!(path = %self.path.display(), %err, "failed to remove staging directory");
        }
    }
}
