//! Removal of staging directories.

use std::{fs, io::ErrorKind, path::Path};

use log::{debug, warn};

use crate::error::{IoContext, Result};

/// Recursively removes the staging directory at `path`.
///
/// Succeeds without touching anything when `path` is empty, doesn't exist, is relative starting
/// with `.` (its meaning depends on the working directory), or is the filesystem root.
pub fn delete_archive_directory(path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let text = path.as_os_str().to_string_lossy();

    if text.is_empty() {
        return Ok(());
    }
    if text.starts_with('.') || path == Path::new("/") {
        warn!("refusing to delete {path:?}");
        return Ok(());
    }

    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(err).with_path("stat", path),
    };

    debug!("removing {path:?}");
    if metadata.is_dir() {
        fs::remove_dir_all(path).with_path("remove directory", path)
    } else {
        fs::remove_file(path).with_path("remove", path)
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::test::tempdir;

    #[test]
    fn test_guarded_paths_are_kept() {
        delete_archive_directory("").unwrap();
        delete_archive_directory("/").unwrap();
        delete_archive_directory("./relative").unwrap();
        delete_archive_directory("..").unwrap();
        assert!(Path::new("/").exists());
    }

    #[test]
    fn test_removes_tree() {
        let dir = tempdir();
        let staging = dir.path().join("some/real/dir");
        fs::create_dir_all(staging.join("node1/journal")).unwrap();
        fs::write(staging.join("node1/journal/kubelet.log"), b"x").unwrap();
        fs::write(staging.join("node1.tar.gz"), b"x").unwrap();

        delete_archive_directory(&staging).unwrap();
        assert!(!staging.exists());
        assert!(dir.path().join("some/real").exists());
    }

    #[test]
    fn test_missing_is_success() {
        let dir = tempdir();
        delete_archive_directory(dir.path().join("gone")).unwrap();
        delete_archive_directory(dir.path().join("gone")).unwrap();
    }

    #[test]
    fn test_removes_plain_file() {
        let dir = tempdir();
        let file = dir.path().join("leftover.tar.gz");
        fs::write(&file, b"x").unwrap();
        delete_archive_directory(&file).unwrap();
        assert!(!file.exists());
    }
}
