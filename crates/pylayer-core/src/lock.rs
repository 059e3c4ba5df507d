use std::fs::{self, File, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use fs4::FileExt;

/// Exclusive advisory lock guarding one output path.
///
/// The lock file stays on disk after release.
#[derive(Debug)]
pub(crate) struct BuildLock {
    _file: File,
    path: PathBuf,
}

impl BuildLock {
    pub(crate) fn try_acquire(path: &Path) -> Result<Option<Self>> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;

        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(Self {
                _file: file,
                path: path.to_path_buf(),
            })),
            Err(err) if err.kind() == ErrorKind::WouldBlock => Ok(None),
            #[cfg(windows)]
            Err(err) if matches!(err.raw_os_error(), Some(32 | 33)) => Ok(None),
            Err(err) => Err(err).with_context(|| format!("failed to lock {}", path.display())),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }
}
