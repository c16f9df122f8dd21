//! File patch engine.
//!
//! Applies a layer of single-file patches onto a snapshot tree, strictly or
//! with fuzzy matching, and regenerates that layer from an edited tree.
//! Per-file work fans out over the worker pool; each worker produces one
//! [`FileOutcome`] and the outcomes are collected in layer order.

mod apply;
mod fixup;
mod fuzzy;
mod layer;
mod rebuild;
mod report;

pub use apply::{apply_patch, Applied, Rejection};
pub use fixup::fixup_file_patches;
pub use fuzzy::{find_match, line_similarity, whitespace_equal, FuzzyOptions, Match};
pub use layer::{patch_name, LayerEntry, PatchLayer, PATCH_EXTENSION};
pub use rebuild::{diff_lines, diff_text, rebuild_file_patches};
pub use report::{
    write_json, ApplyReport, ApplyResult, FileOutcome, FixupReport, FuzzedHunk, RebuildReport,
    RejectedHunk,
};

use crate::error::{PatchStackError, Result};
use crate::patch::{self, PatchFile};
use crate::pool::map_parallel;
use crate::safety::TreeGuard;
use crate::tree::{self, atomic_write, remove_file_pruning, SourceTree, TextFile};
use std::borrow::Cow;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cooperative cancellation shared between a run and its caller.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Context lines per side of each rebuilt hunk
    pub context_lines: usize,
    /// Worker threads; 0 picks rayon's default
    pub workers: usize,
    /// Normalize line endings on every read
    pub normalize: bool,
    pub cancel: CancelToken,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            context_lines: 3,
            workers: 0,
            normalize: true,
            cancel: CancelToken::default(),
        }
    }
}

impl EngineOptions {
    /// `patch` as it applies to trees read with these options.
    pub(crate) fn prepare<'a>(&self, patch: &'a PatchFile) -> Cow<'a, PatchFile> {
        if self.normalize && !patch.has_normalized_endings() {
            let mut normalized = patch.clone();
            normalized.normalize_line_endings();
            Cow::Owned(normalized)
        } else {
            Cow::Borrowed(patch)
        }
    }
}

/// Reset `target` to `baseline`, then apply every patch in `patches_dir`
/// with exact matching. Rejected hunks land in `rejects_dir`.
pub fn apply_file_patches(
    baseline: &SourceTree,
    patches_dir: &Path,
    target: &SourceTree,
    rejects_dir: &Path,
    options: &EngineOptions,
) -> Result<ApplyReport> {
    run_apply(baseline, patches_dir, target, rejects_dir, options, None)
}

/// As [`apply_file_patches`], locating hunks that no longer match exactly
/// within the fuzzy search window.
pub fn apply_file_patches_fuzzy(
    baseline: &SourceTree,
    patches_dir: &Path,
    target: &SourceTree,
    rejects_dir: &Path,
    options: &EngineOptions,
    fuzzy: &FuzzyOptions,
) -> Result<ApplyReport> {
    run_apply(baseline, patches_dir, target, rejects_dir, options, Some(fuzzy))
}

fn run_apply(
    baseline: &SourceTree,
    patches_dir: &Path,
    target: &SourceTree,
    rejects_dir: &Path,
    options: &EngineOptions,
    fuzzy: Option<&FuzzyOptions>,
) -> Result<ApplyReport> {
    let stats = tree::sync_tree(baseline, target)?;
    debug!(
        "reset {} from baseline ({} written, {} removed)",
        target.root().display(),
        stats.written,
        stats.removed
    );

    let layer = PatchLayer::load(patches_dir)?;
    clear_dir(rejects_dir)?;

    let guard = TreeGuard::new(target.root());
    let results = map_parallel(options.workers, &layer.entries, |entry| {
        apply_entry(entry, target, &guard, rejects_dir, options, fuzzy)
    });

    let outcomes = results.into_iter().collect::<Result<Vec<_>>>()?;
    let cancelled = options.cancel.is_cancelled()
        && outcomes
            .iter()
            .any(|o| matches!(o.result, ApplyResult::Pending));
    let report = ApplyReport {
        outcomes,
        cancelled,
    };

    info!(
        "applied {} of {} patches ({} fuzzed, {} rejected, {} malformed)",
        report.applied(),
        report.outcomes.len(),
        report.fuzzed(),
        report.rejected(),
        report.malformed()
    );
    Ok(report)
}

fn apply_entry(
    entry: &LayerEntry,
    target: &SourceTree,
    guard: &TreeGuard,
    rejects_dir: &Path,
    options: &EngineOptions,
    fuzzy: Option<&FuzzyOptions>,
) -> Result<FileOutcome> {
    let outcome = |target: Option<&str>, result| FileOutcome {
        patch: entry.name.clone(),
        target: target.map(str::to_string),
        result,
    };

    if options.cancel.is_cancelled() {
        return Ok(outcome(entry.target(), ApplyResult::Pending));
    }

    let patch = match &entry.parsed {
        Ok(patch) => patch,
        Err(reason) => {
            warn!("{}: malformed patch: {reason}", entry.name);
            return Ok(outcome(
                None,
                ApplyResult::Malformed {
                    reason: reason.clone(),
                },
            ));
        }
    };
    let rel = patch.path.as_str();

    let path = match guard.resolve(rel) {
        Ok(path) => path,
        Err(e) => {
            warn!("{}: {e}", entry.name);
            return Ok(outcome(
                Some(rel),
                ApplyResult::Malformed {
                    reason: e.to_string(),
                },
            ));
        }
    };

    let current = match target.read_text(rel, options.normalize)? {
        TextFile::Binary => {
            let rejection = Rejection {
                reason: "target is not a text file".to_string(),
                hunks: Vec::new(),
            };
            return reject(entry, patch, rejection, rejects_dir)
                .map(|result| outcome(Some(rel), result));
        }
        other => other,
    };

    match apply_patch(current.as_text(), &options.prepare(patch), fuzzy) {
        Ok(applied) => {
            match &applied.content {
                Some(content) => atomic_write(&path, content.as_bytes())?,
                None => {
                    remove_file_pruning(target.root(), rel)?;
                }
            }
            for fuzzed in &applied.fuzzed {
                info!(
                    "{}: hunk #{} applied at offset {} (similarity {:.2})",
                    entry.name,
                    fuzzed.index + 1,
                    fuzzed.offset,
                    fuzzed.similarity
                );
            }
            Ok(outcome(
                Some(rel),
                ApplyResult::Applied {
                    fuzzed: applied.fuzzed,
                },
            ))
        }
        Err(rejection) => {
            reject(entry, patch, rejection, rejects_dir).map(|result| outcome(Some(rel), result))
        }
    }
}

/// Record a rejection and write its reject artifact.
fn reject(
    entry: &LayerEntry,
    patch: &PatchFile,
    rejection: Rejection,
    rejects_dir: &Path,
) -> Result<ApplyResult> {
    warn!("{}: rejected: {}", entry.name, rejection.reason);
    write_reject(rejects_dir, patch, &rejection)?;
    Ok(ApplyResult::Rejected {
        reason: rejection.reason,
        hunks: rejection.hunks,
    })
}

/// Write `<rejects>/<path>.rej`: the failed hunks in patch format, with the
/// failure reasons as preamble.
fn write_reject(rejects_dir: &Path, patch: &PatchFile, rejection: &Rejection) -> Result<()> {
    let mut rej = PatchFile::new(patch.path.clone(), patch.state);
    rej.preamble.push(format!("# {}", rejection.reason));
    for failed in &rejection.hunks {
        rej.preamble
            .push(format!("# hunk #{}: {}", failed.index + 1, failed.reason));
    }
    rej.hunks = rejection.hunks.iter().map(|h| h.hunk.clone()).collect();

    let text = if rej.hunks.is_empty() {
        let mut text = rej.preamble.join("\n");
        text.push('\n');
        text
    } else {
        patch::serialize(&rej)
    };
    let path = rejects_dir.join(format!("{}.rej", patch.path));
    atomic_write(&path, text.as_bytes())
}

fn clear_dir(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(PatchStackError::io(dir, e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_cancelled_run_leaves_patches_pending() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let baseline = SourceTree::new(root.join("baseline"));
        let target = SourceTree::new(root.join("patched"));
        atomic_write(&baseline.path_of("A.txt"), b"a\n").unwrap();
        atomic_write(
            &root.join("patches/A.txt.patch"),
            b"--- a/A.txt\n+++ b/A.txt\n@@ -1 +1 @@\n-a\n+b\n",
        )
        .unwrap();

        let options = EngineOptions::default();
        options.cancel.cancel();
        let report = apply_file_patches(
            &baseline,
            &root.join("patches"),
            &target,
            &root.join("rejects"),
            &options,
        )
        .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.pending(), 1);
        assert_eq!(fs::read_to_string(target.path_of("A.txt")).unwrap(), "a\n");
    }
}
