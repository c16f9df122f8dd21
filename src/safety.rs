use crate::tree::META_DIR;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Lexical form of a patch target, used to tell whether two targets name the
/// same file. `.` components and repeated separators are dropped; `..` and
/// root components are kept so that [`TreeGuard::resolve`] still rejects them.
pub fn lexical_target(target: &str) -> String {
    let mut parts = Vec::new();
    for component in Path::new(target).components() {
        match component {
            Component::CurDir => {}
            Component::RootDir => parts.push(""),
            other => parts.push(other.as_os_str().to_str().unwrap_or_default()),
        }
    }
    parts.join("/")
}

/// Containment checks for paths named inside patch files.
///
/// Patch headers are untrusted input: a target such as `../../etc/hosts`
/// must never resolve outside the tree being patched.
#[derive(Debug, Clone)]
pub struct TreeGuard {
    /// Tree root as given
    root: PathBuf,
    /// Canonical root, when the root exists
    canonical_root: Option<PathBuf>,
}

#[derive(Error, Debug)]
pub enum SafetyError {
    #[error("patch target is empty")]
    EmptyPath,

    #[error("patch target must be relative: {0}")]
    AbsolutePath(String),

    #[error("patch target escapes the tree: {path} (root: {root})")]
    OutsideTree { path: String, root: PathBuf },

    #[error("patch target is inside the reserved .patchstack directory: {0}")]
    Reserved(String),

    #[error("failed to canonicalize path: {0}")]
    Canonicalize(#[from] std::io::Error),
}

impl TreeGuard {
    /// Create a new guard for the given tree root.
    ///
    /// The root does not have to exist yet; symlink checks start once it does.
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref().to_path_buf();
        let canonical_root = root.canonicalize().ok();
        Self {
            root,
            canonical_root,
        }
    }

    /// Resolve a `/`-separated patch target to a path under the root.
    pub fn resolve(&self, target: &str) -> Result<PathBuf, SafetyError> {
        if target.trim().is_empty() {
            return Err(SafetyError::EmptyPath);
        }

        let rel = Path::new(target);
        let mut normal = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => normal.push(part),
                Component::CurDir => {}
                Component::ParentDir => {
                    return Err(SafetyError::OutsideTree {
                        path: target.to_string(),
                        root: self.root.clone(),
                    })
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(SafetyError::AbsolutePath(target.to_string()))
                }
            }
        }

        if normal.as_os_str().is_empty() {
            return Err(SafetyError::EmptyPath);
        }
        if normal.components().next() == Some(Component::Normal(META_DIR.as_ref())) {
            return Err(SafetyError::Reserved(target.to_string()));
        }

        let absolute = self.root.join(&normal);
        self.check_symlinks(target, &absolute)?;
        Ok(absolute)
    }

    /// Reject targets whose nearest existing ancestor resolves outside the root.
    fn check_symlinks(&self, target: &str, absolute: &Path) -> Result<(), SafetyError> {
        let Some(canonical_root) = &self.canonical_root else {
            return Ok(());
        };
        let Some(existing) = absolute.ancestors().find(|p| p.exists()) else {
            return Ok(());
        };

        let canonical = existing.canonicalize()?;
        if !canonical.starts_with(canonical_root) {
            return Err(SafetyError::OutsideTree {
                path: target.to_string(),
                root: self.root.clone(),
            });
        }
        Ok(())
    }

    /// Get the tree root.
    pub fn root(&self) -> &Path {
        &self.root
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lexical_target_drops_dot_components() {
        assert_eq!(lexical_target("./net//Foo.java"), "net/Foo.java");
        assert_eq!(lexical_target("net/./Foo.java"), "net/Foo.java");
        assert_eq!(lexical_target("../Foo.java"), "../Foo.java");
        assert_eq!(lexical_target("/etc/hosts"), "/etc/hosts");
    }
    use std::fs;

    #[test]
    fn test_resolve_relative_target() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TreeGuard::new(temp_dir.path());
        let resolved = guard.resolve("net/minecraft/Foo.java").unwrap();
        assert_eq!(resolved, temp_dir.path().join("net/minecraft/Foo.java"));
    }

    #[test]
    fn test_resolve_rejects_parent_components() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TreeGuard::new(temp_dir.path());
        let result = guard.resolve("net/../../outside.java");
        assert!(matches!(result, Err(SafetyError::OutsideTree { .. })));
    }

    #[test]
    fn test_resolve_rejects_absolute_and_reserved() {
        let temp_dir = tempfile::tempdir().unwrap();
        let guard = TreeGuard::new(temp_dir.path());
        assert!(matches!(
            guard.resolve("/etc/hosts"),
            Err(SafetyError::AbsolutePath(_))
        ));
        assert!(matches!(
            guard.resolve(".patchstack/history.json"),
            Err(SafetyError::Reserved(_))
        ));
        assert!(matches!(guard.resolve("  "), Err(SafetyError::EmptyPath)));
    }

    #[test]
    #[cfg(unix)]
    fn test_resolve_rejects_symlink_escape() {
        use std::os::unix::fs::symlink;

        let temp_dir = tempfile::tempdir().unwrap();
        let tree = temp_dir.path().join("tree");
        let outside = temp_dir.path().join("outside");
        fs::create_dir_all(&tree).unwrap();
        fs::create_dir_all(&outside).unwrap();
        symlink(&outside, tree.join("escape")).unwrap();

        let guard = TreeGuard::new(&tree);
        let result = guard.resolve("escape/Foo.java");
        assert!(matches!(result, Err(SafetyError::OutsideTree { .. })));
    }
}
