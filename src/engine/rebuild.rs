//! Regenerating patches from a snapshot and a working tree.

use super::layer::{self, patch_name, PatchLayer, PATCH_EXTENSION};
use super::report::RebuildReport;
use super::EngineOptions;
use crate::at::AT_MARKER;
use crate::error::Result;
use crate::patch::{FileState, Hunk, HunkLine, PatchFile};
use crate::pool::map_parallel;
use crate::tree::{self, split_lines, SourceTree, TextFile};
use similar::{Algorithm, DiffTag};
use std::collections::BTreeSet;
use std::path::Path;
use tracing::{debug, info, warn};

/// Diff two versions of `path`. `None` on either side means the file does
/// not exist there. Returns `None` when there is nothing to record.
pub fn diff_text(
    path: &str,
    old: Option<&str>,
    new: Option<&str>,
    context: usize,
) -> Option<PatchFile> {
    match (old, new) {
        (None, None) => None,
        (None, Some(new)) => {
            let mut patch = PatchFile::new(path, FileState::Created);
            let lines: Vec<HunkLine> = split_lines(new).into_iter().map(HunkLine::Add).collect();
            if !lines.is_empty() {
                patch.hunks.push(Hunk::at(0, 0, lines));
            }
            Some(patch)
        }
        (Some(old), None) => {
            let mut patch = PatchFile::new(path, FileState::Deleted);
            let lines: Vec<HunkLine> = split_lines(old).into_iter().map(HunkLine::Remove).collect();
            if !lines.is_empty() {
                patch.hunks.push(Hunk::at(0, 0, lines));
            }
            Some(patch)
        }
        (Some(old), Some(new)) => {
            if old == new {
                return None;
            }
            let hunks = diff_lines(&split_lines(old), &split_lines(new), context);
            if hunks.is_empty() {
                return None;
            }
            let mut patch = PatchFile::new(path, FileState::Modified);
            patch.hunks = hunks;
            Some(patch)
        }
    }
}

/// Myers diff grouped into hunks with `context` lines on each side.
pub fn diff_lines(old: &[String], new: &[String], context: usize) -> Vec<Hunk> {
    let ops = similar::capture_diff_slices(Algorithm::Myers, old, new);
    let mut hunks = Vec::new();

    for group in similar::group_diff_ops(ops, context) {
        let Some(first) = group.first() else {
            continue;
        };
        let old_index = first.old_range().start;
        let new_index = first.new_range().start;

        let mut lines = Vec::new();
        for op in &group {
            let (tag, old_range, new_range) = op.as_tag_tuple();
            match tag {
                DiffTag::Equal => {
                    lines.extend(old[old_range].iter().cloned().map(HunkLine::Context));
                }
                DiffTag::Delete => {
                    lines.extend(old[old_range].iter().cloned().map(HunkLine::Remove));
                }
                DiffTag::Insert => {
                    lines.extend(new[new_range].iter().cloned().map(HunkLine::Add));
                }
                DiffTag::Replace => {
                    lines.extend(old[old_range].iter().cloned().map(HunkLine::Remove));
                    lines.extend(new[new_range].iter().cloned().map(HunkLine::Add));
                }
            }
        }
        hunks.push(Hunk::at(old_index, new_index, lines));
    }

    hunks
}

/// Whether a preamble declares access transforms.
pub(crate) fn declares_access(preamble: &[String]) -> bool {
    preamble.iter().any(|line| line.trim() == AT_MARKER)
}

pub(crate) enum FileDiff {
    Patch(PatchFile),
    Clean,
    Binary,
}

/// Diff one path between two trees.
pub(crate) fn diff_path(
    snapshot: &SourceTree,
    working: &SourceTree,
    rel: &str,
    options: &EngineOptions,
) -> Result<FileDiff> {
    let old = snapshot.read_text(rel, options.normalize)?;
    let new = working.read_text(rel, options.normalize)?;
    if old == TextFile::Binary || new == TextFile::Binary {
        return Ok(FileDiff::Binary);
    }
    Ok(
        match diff_text(rel, old.as_text(), new.as_text(), options.context_lines) {
            Some(patch) => FileDiff::Patch(patch),
            None => FileDiff::Clean,
        },
    )
}

/// Regenerate the whole file patch layer in `patches_dir` from the
/// differences between `snapshot` and `working`.
pub fn rebuild_file_patches(
    snapshot: &SourceTree,
    working: &SourceTree,
    patches_dir: &Path,
    options: &EngineOptions,
) -> Result<RebuildReport> {
    crate::materialize::verify_snapshot(snapshot)?;

    let existing = PatchLayer::load(patches_dir)?;
    let previous = existing.by_target();
    for entry in existing.entries.iter().filter(|e| e.parsed.is_err()) {
        warn!(
            "existing patch {} is unreadable and will be replaced",
            entry.name
        );
    }

    let files = tree::union_files(&[snapshot, working])?;
    let diffs = map_parallel(options.workers, &files, |rel| {
        diff_path(snapshot, working, rel, options)
    });

    let mut report = RebuildReport::default();
    let mut kept = BTreeSet::new();
    for (rel, diff) in files.iter().zip(diffs) {
        match diff? {
            FileDiff::Binary => {
                warn!("skipping non-text file {rel}");
                report.skipped_binary.push(rel.clone());
            }
            FileDiff::Clean => {
                if let Some((name, patch)) = previous.get(rel.as_str()) {
                    if declares_access(&patch.preamble) {
                        warn!("{name} no longer changes {rel}; its access transforms are dropped");
                    }
                }
            }
            FileDiff::Patch(mut patch) => {
                if let Some((_, old)) = previous.get(rel.as_str()) {
                    patch.preamble = old.preamble.clone();
                }
                let name = patch_name(&patch.path);
                if layer::write_patch(patches_dir, &patch)? {
                    debug!("wrote {name}");
                    report.written.push(name.clone());
                } else {
                    report.unchanged += 1;
                }
                kept.insert(name);
            }
        }
    }

    for entry in &existing.entries {
        if !kept.contains(&entry.name)
            && entry.name.ends_with(PATCH_EXTENSION)
            && tree::remove_file_pruning(patches_dir, &entry.name)?
        {
            debug!("removed stale {}", entry.name);
            report.removed.push(entry.name.clone());
        }
    }

    info!(
        "rebuilt {} patches ({} written, {} unchanged, {} removed)",
        kept.len(),
        report.written.len(),
        report.unchanged,
        report.removed.len()
    );
    Ok(report)
}
