//! File patch layers on disk: one `<target>.patch` per patched file.

use crate::at::{self, AccessTransformEntry};
use crate::error::{PatchStackError, Result};
use crate::patch::{self, PatchFile};
use crate::safety::lexical_target;
use crate::tree::{self, SourceTree};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

pub const PATCH_EXTENSION: &str = ".patch";

/// Name of the patch file for `target` within a layer.
pub fn patch_name(target: &str) -> String {
    format!("{target}{PATCH_EXTENSION}")
}

#[derive(Debug, Clone)]
pub struct LayerEntry {
    /// Relative patch file name, `/`-separated
    pub name: String,
    /// Parsed patch, or why it could not be used
    pub parsed: std::result::Result<PatchFile, String>,
}

impl LayerEntry {
    pub fn target(&self) -> Option<&str> {
        self.parsed.as_ref().ok().map(|p| p.path.as_str())
    }
}

/// An ordered file patch layer.
#[derive(Debug, Clone)]
pub struct PatchLayer {
    pub dir: PathBuf,
    /// Sorted by patch file name
    pub entries: Vec<LayerEntry>,
}

impl PatchLayer {
    /// Read every `*.patch` file under `dir`. A missing directory is an empty
    /// layer. The target path comes from the patch header; a second patch for
    /// the same target is unusable.
    pub fn load(dir: &Path) -> Result<Self> {
        let files = SourceTree::new(dir).files()?;
        let mut entries = Vec::new();
        let mut seen: BTreeMap<String, String> = BTreeMap::new();

        for name in files.into_iter().filter(|n| n.ends_with(PATCH_EXTENSION)) {
            let path = dir.join(&name);
            let bytes =
                std::fs::read(&path).map_err(|source| PatchStackError::io(&path, source))?;
            let parsed = match patch::parse(&bytes) {
                Ok(mut parsed) => {
                    parsed.path = lexical_target(&parsed.path);
                    match seen.get(&parsed.path) {
                        Some(first) => Err(format!(
                            "duplicate patch for {} (already patched by {first})",
                            parsed.path
                        )),
                        None => {
                            seen.insert(parsed.path.clone(), name.clone());
                            Ok(parsed)
                        }
                    }
                }
                Err(e) => Err(e.to_string()),
            };
            entries.push(LayerEntry { name, parsed });
        }

        debug!("loaded {} patch files from {}", entries.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            entries,
        })
    }

    /// Usable patches keyed by target path.
    pub fn by_target(&self) -> BTreeMap<&str, (&str, &PatchFile)> {
        self.entries
            .iter()
            .filter_map(|entry| {
                let patch = entry.parsed.as_ref().ok()?;
                Some((patch.path.as_str(), (entry.name.as_str(), patch)))
            })
            .collect()
    }

    /// Access transforms declared in patch preambles, in layer order.
    pub fn access_transforms(&self) -> Result<Vec<AccessTransformEntry>> {
        let mut collected = Vec::new();
        for entry in &self.entries {
            let Ok(patch) = &entry.parsed else {
                continue;
            };
            let declared = at::declared_in(&patch.preamble, &entry.name).map_err(|source| {
                PatchStackError::AccessTransform {
                    source_name: entry.name.clone(),
                    source,
                }
            })?;
            collected.extend(declared);
        }
        Ok(collected)
    }
}

/// Write `patch` into the layer, returning whether the bytes changed.
pub(crate) fn write_patch(dir: &Path, patch: &PatchFile) -> Result<bool> {
    let bytes = patch::serialize(patch);
    tree::write_if_changed(&dir.join(patch_name(&patch.path)), bytes.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::atomic_write;

    const PATCH: &str = "== AT ==\npublic a.Foo bar\n\n--- a/a/Foo.java\n+++ b/a/Foo.java\n@@ -1 +1 @@\n-x\n+y\n";

    #[test]
    fn test_load_sorted_with_duplicates_and_garbage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        atomic_write(&dir.join("a/Foo.java.patch"), PATCH.as_bytes()).unwrap();
        atomic_write(&dir.join("z-copy.patch"), PATCH.as_bytes()).unwrap();
        atomic_write(&dir.join("b/Bad.java.patch"), b"not a patch\n").unwrap();
        atomic_write(&dir.join("notes.txt"), b"ignored").unwrap();

        let layer = PatchLayer::load(dir).unwrap();
        let names: Vec<&str> = layer.entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["a/Foo.java.patch", "b/Bad.java.patch", "z-copy.patch"]);
        assert!(layer.entries[0].parsed.is_ok());
        assert!(layer.entries[1].parsed.is_err());
        assert!(layer.entries[2]
            .parsed
            .as_ref()
            .unwrap_err()
            .contains("duplicate patch for a/Foo.java"));
        assert_eq!(layer.by_target().len(), 1);
    }

    #[test]
    fn test_dot_prefixed_target_is_a_duplicate() {
        let temp_dir = tempfile::tempdir().unwrap();
        let dir = temp_dir.path();
        let dotted = PATCH.replace("/a/Foo.java", "/./a/Foo.java");
        atomic_write(&dir.join("a/Foo.java.patch"), PATCH.as_bytes()).unwrap();
        atomic_write(&dir.join("dotted.patch"), dotted.as_bytes()).unwrap();

        let layer = PatchLayer::load(dir).unwrap();
        assert_eq!(layer.entries[0].target(), Some("a/Foo.java"));
        assert!(layer.entries[1]
            .parsed
            .as_ref()
            .unwrap_err()
            .contains("duplicate patch for a/Foo.java"));
    }

    #[test]
    fn test_access_transforms_from_preambles() {
        let temp_dir = tempfile::tempdir().unwrap();
        atomic_write(&temp_dir.path().join("a/Foo.java.patch"), PATCH.as_bytes()).unwrap();
        let layer = PatchLayer::load(temp_dir.path()).unwrap();
        let entries = layer.access_transforms().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].source, "a/Foo.java.patch");
    }

    #[test]
    fn test_missing_dir_is_empty_layer() {
        let temp_dir = tempfile::tempdir().unwrap();
        let layer = PatchLayer::load(&temp_dir.path().join("none")).unwrap();
        assert!(layer.entries.is_empty());
    }
}
