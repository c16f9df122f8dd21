use crate::error::{PatchStackError, Result};
use std::fs;
use std::io::Write;
use std::path::Path;

/// Atomic file write: tempfile + fsync + rename.
///
/// The tempfile lives in the destination directory so the rename never
/// crosses filesystems. Missing parent directories are created.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<()> {
    let parent = path.parent().ok_or_else(|| {
        PatchStackError::io(
            path,
            std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "path has no parent directory",
            ),
        )
    })?;
    fs::create_dir_all(parent).map_err(|e| PatchStackError::io(parent, e))?;

    let mut temp = tempfile::NamedTempFile::new_in(parent).map_err(|e| PatchStackError::io(parent, e))?;
    temp.write_all(content)
        .map_err(|e| PatchStackError::io(path, e))?;
    temp.as_file()
        .sync_all()
        .map_err(|e| PatchStackError::io(path, e))?;
    temp.persist(path)
        .map_err(|e| PatchStackError::io(path, e.error))?;

    Ok(())
}

/// Write `content` only when it differs from what is on disk.
///
/// Returns `true` when the file was written. Unchanged files keep their
/// mtime, which keeps downstream up-to-date checks quiet.
pub fn write_if_changed(path: &Path, content: &[u8]) -> Result<bool> {
    match fs::read(path) {
        Ok(existing) if existing == content => return Ok(false),
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(PatchStackError::io(path, e)),
    }
    atomic_write(path, content)?;
    Ok(true)
}

/// Remove `root/rel` and any directories it leaves empty, stopping at `root`.
///
/// Returns `false` when the file did not exist.
pub fn remove_file_pruning(root: &Path, rel: &str) -> Result<bool> {
    let path = root.join(rel);
    match fs::remove_file(&path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(PatchStackError::io(&path, e)),
    }

    let mut dir = path.parent();
    while let Some(current) = dir {
        if current == root || !current.starts_with(root) {
            break;
        }
        // Non-empty directories refuse removal; that ends the walk.
        if fs::remove_dir(current).is_err() {
            break;
        }
        dir = current.parent();
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_write_creates_parents() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("a/b/c.txt");
        atomic_write(&file, b"content").unwrap();
        assert_eq!(fs::read_to_string(&file).unwrap(), "content");
    }

    #[test]
    fn test_write_if_changed_skips_identical_content() {
        let temp_dir = tempfile::tempdir().unwrap();
        let file = temp_dir.path().join("x.txt");
        assert!(write_if_changed(&file, b"one").unwrap());
        assert!(!write_if_changed(&file, b"one").unwrap());
        assert!(write_if_changed(&file, b"two").unwrap());
    }

    #[test]
    fn test_remove_file_pruning_stops_at_root() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        atomic_write(&root.join("a/b/c.txt"), b"x").unwrap();
        atomic_write(&root.join("a/keep.txt"), b"y").unwrap();

        assert!(remove_file_pruning(root, "a/b/c.txt").unwrap());
        assert!(!root.join("a/b").exists());
        assert!(root.join("a/keep.txt").exists());
        assert!(!remove_file_pruning(root, "a/b/c.txt").unwrap());
    }
}
