use std::fs;
use std::io::{self, ErrorKind};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Removal {
    Absent,
    Removed,
}

/// Remove a file, symlink, or directory tree.
///
/// A path that does not exist (or vanishes mid-removal) is `Absent`; every
/// other failure is returned to the caller.
pub(crate) fn remove_path(path: &Path) -> io::Result<Removal> {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Removal::Absent),
        Err(err) => return Err(err),
    };
    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match result {
        Ok(()) => Ok(Removal::Removed),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Removal::Absent),
        Err(err) => Err(err),
    }
}

/// Remove a file or symlink; a directory at `path` is an error and is left intact.
pub(crate) fn remove_file_entry(path: &Path) -> io::Result<Removal> {
    match fs::remove_file(path) {
        Ok(()) => Ok(Removal::Removed),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(Removal::Absent),
        Err(err) => Err(err),
    }
}

/// `true` when the platform refuses writes into a read-only directory.
///
/// Privileged users bypass permission bits, which makes some failure modes
/// impossible to reproduce in tests.
#[cfg(all(test, unix))]
pub(crate) fn permissions_enforced(scratch: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;

    let probe = scratch.join("permission-probe");
    if fs::create_dir_all(&probe).is_err() {
        return false;
    }
    let _ = fs::set_permissions(&probe, fs::Permissions::from_mode(0o555));
    let enforced = fs::write(probe.join("file"), b"x").is_err();
    let _ = fs::set_permissions(&probe, fs::Permissions::from_mode(0o755));
    let _ = fs::remove_dir_all(&probe);
    enforced
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use tempfile::tempdir;

    #[test]
    fn missing_path_is_absent() -> Result<()> {
        let dir = tempdir()?;
        assert_eq!(remove_path(&dir.path().join("missing"))?, Removal::Absent);
        Ok(())
    }

    #[test]
    fn removes_files_and_trees() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("python.zip");
        fs::write(&file, b"stale")?;
        let tree = dir.path().join("staging");
        fs::create_dir_all(tree.join("python/lib"))?;
        fs::write(tree.join("python/lib/mod.py"), b"x = 1\n")?;
        assert_eq!(remove_path(&file)?, Removal::Removed);
        assert_eq!(remove_path(&tree)?, Removal::Removed);
        assert!(!file.exists());
        assert!(!tree.exists());
        Ok(())
    }

    #[test]
    fn file_removal_never_descends_into_directories() -> Result<()> {
        let dir = tempdir()?;
        let file = dir.path().join("python.zip");
        fs::write(&file, b"stale")?;
        assert_eq!(remove_file_entry(&file)?, Removal::Removed);
        assert_eq!(remove_file_entry(&file)?, Removal::Absent);

        let tree = dir.path().join("project");
        fs::create_dir_all(tree.join("src"))?;
        fs::write(tree.join("src/keep.py"), b"x")?;
        assert!(remove_file_entry(&tree).is_err());
        assert!(tree.join("src/keep.py").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn removes_symlink_without_touching_target() -> Result<()> {
        let dir = tempdir()?;
        let target = dir.path().join("target");
        fs::create_dir_all(&target)?;
        fs::write(target.join("keep.txt"), b"keep")?;
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&target, &link)?;
        assert_eq!(remove_path(&link)?, Removal::Removed);
        assert!(target.join("keep.txt").exists());
        Ok(())
    }

    #[cfg(unix)]
    #[test]
    fn permission_failures_are_reported() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempdir()?;
        if !permissions_enforced(dir.path()) {
            eprintln!("skipping permission test (permissions not enforced)");
            return Ok(());
        }
        let parent = dir.path().join("locked");
        fs::create_dir_all(parent.join("inner"))?;
        fs::write(parent.join("inner/file.txt"), b"x")?;
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o555))?;
        let result = remove_path(&parent.join("inner"));
        fs::set_permissions(&parent, fs::Permissions::from_mode(0o755))?;
        assert_eq!(
            result.map_err(|err| err.kind()),
            Err(ErrorKind::PermissionDenied)
        );
        Ok(())
    }
}
