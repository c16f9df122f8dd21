//! Folding working-tree edits into the file patch layer.
//!
//! Unlike a full rebuild, fixup only rewrites patches for paths whose
//! working content differs from what the layer currently records.

use super::apply::apply_patch;
use super::layer::{self, patch_name, PatchLayer};
use super::rebuild::{declares_access, diff_path, FileDiff};
use super::report::FixupReport;
use super::EngineOptions;
use crate::error::Result;
use crate::patch::PatchFile;
use crate::pool::map_parallel;
use crate::tree::{self, SourceTree, TextFile};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

enum PathState {
    Untouched,
    Touched { broken: bool },
    Binary,
}

/// The content `patch` records on top of the snapshot, or why it can't.
fn recorded_state(
    snapshot: &TextFile,
    patch: Option<&PatchFile>,
    options: &EngineOptions,
) -> std::result::Result<Option<String>, String> {
    let base = snapshot.as_text();
    match patch {
        None => Ok(base.map(str::to_string)),
        Some(patch) => apply_patch(base, &options.prepare(patch), None)
            .map(|applied| applied.content)
            .map_err(|rejection| rejection.reason),
    }
}

fn classify(
    snapshot: &SourceTree,
    working: &SourceTree,
    rel: &str,
    patch: Option<&PatchFile>,
    options: &EngineOptions,
) -> Result<PathState> {
    let base = snapshot.read_text(rel, options.normalize)?;
    let current = working.read_text(rel, options.normalize)?;
    if base == TextFile::Binary || current == TextFile::Binary {
        return Ok(PathState::Binary);
    }

    match recorded_state(&base, patch, options) {
        Ok(recorded) if recorded.as_deref() == current.as_text() => Ok(PathState::Untouched),
        Ok(_) => Ok(PathState::Touched { broken: false }),
        Err(reason) => {
            warn!("recorded patch for {rel} no longer reproduces: {reason}");
            Ok(PathState::Touched { broken: true })
        }
    }
}

/// Replace the patches of touched paths with freshly diffed ones.
pub fn fixup_file_patches(
    snapshot: &SourceTree,
    working: &SourceTree,
    patches_dir: &Path,
    options: &EngineOptions,
) -> Result<FixupReport> {
    crate::materialize::verify_snapshot(snapshot)?;

    let existing = PatchLayer::load(patches_dir)?;
    let recorded = existing.by_target();

    let mut paths: BTreeSet<String> = tree::union_files(&[snapshot, working])?
        .into_iter()
        .collect();
    paths.extend(recorded.keys().map(|target| target.to_string()));
    let paths: Vec<String> = paths.into_iter().collect();

    let states = map_parallel(options.workers, &paths, |rel| {
        let patch = recorded.get(rel.as_str()).map(|(_, patch)| *patch);
        classify(snapshot, working, rel, patch, options)
    });

    let mut report = FixupReport::default();
    for (rel, state) in paths.iter().zip(states) {
        let broken = match state? {
            PathState::Untouched => {
                report.untouched += 1;
                continue;
            }
            PathState::Binary => {
                warn!("skipping non-text file {rel}");
                report.skipped_binary.push(rel.clone());
                continue;
            }
            PathState::Touched { broken } => broken,
        };
        if broken {
            report.broken.push(rel.clone());
        }

        let previous = recorded.get(rel.as_str());
        let canonical = patch_name(rel);
        match diff_path(snapshot, working, rel, options)? {
            FileDiff::Patch(mut patch) => {
                if let Some((_, old)) = previous {
                    patch.preamble = old.preamble.clone();
                }
                if layer::write_patch(patches_dir, &patch)? {
                    debug!("rewrote {canonical}");
                }
                report.rewritten.push(canonical.clone());
            }
            FileDiff::Clean | FileDiff::Binary => {
                if let Some((name, old)) = previous {
                    if declares_access(&old.preamble) {
                        warn!("{name} no longer changes {rel}; its access transforms are dropped");
                    }
                    if tree::remove_file_pruning(patches_dir, name)? {
                        report.removed.push(name.to_string());
                    }
                }
                continue;
            }
        }

        // A patch recorded under a non-canonical name is superseded.
        if let Some((name, _)) = previous {
            if *name != canonical && tree::remove_file_pruning(patches_dir, name)? {
                report.removed.push(name.to_string());
            }
        }
    }

    info!(
        "fixup rewrote {} patches, removed {}, left {} untouched",
        report.rewritten.len(),
        report.removed.len(),
        report.untouched
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const PATCH: &str = "--- a/A.txt\n+++ b/A.txt\n@@ -1,2 +1,2 @@\n one\n-two\n+TWO\n";

    fn setup(working_a: &str, patch: &str) -> (tempfile::TempDir, SourceTree, SourceTree) {
        let dir = tempfile::tempdir().unwrap();
        for tree in ["snapshot", "working"] {
            fs::create_dir_all(dir.path().join(tree)).unwrap();
            fs::write(dir.path().join(tree).join("B.txt"), "same\n").unwrap();
        }
        fs::write(dir.path().join("snapshot/A.txt"), "one\ntwo\n").unwrap();
        fs::write(dir.path().join("working/A.txt"), working_a).unwrap();
        fs::create_dir_all(dir.path().join("patches")).unwrap();
        fs::write(dir.path().join("patches/A.txt.patch"), patch).unwrap();
        let snapshot = SourceTree::new(dir.path().join("snapshot"));
        let working = SourceTree::new(dir.path().join("working"));
        (dir, snapshot, working)
    }

    #[test]
    fn test_reverted_path_drops_its_patch() {
        let (dir, snapshot, working) = setup("one\ntwo\n", PATCH);
        let patches = dir.path().join("patches");
        let report =
            fixup_file_patches(&snapshot, &working, &patches, &EngineOptions::default()).unwrap();
        assert_eq!(report.removed, vec!["A.txt.patch"]);
        assert!(report.rewritten.is_empty());
        assert_eq!(report.untouched, 1);
        assert!(!patches.join("A.txt.patch").exists());
    }

    #[test]
    fn test_unreproducible_patch_is_reported_and_replaced() {
        let stale = PATCH.replace("-two", "-zwei");
        let (dir, snapshot, working) = setup("one\nTWO\n", &stale);
        let patches = dir.path().join("patches");
        let report =
            fixup_file_patches(&snapshot, &working, &patches, &EngineOptions::default()).unwrap();
        assert_eq!(report.broken, vec!["A.txt"]);
        assert_eq!(report.rewritten, vec!["A.txt.patch"]);
        let text = fs::read_to_string(patches.join("A.txt.patch")).unwrap();
        assert!(text.contains("-two\n+TWO"));
    }
}
