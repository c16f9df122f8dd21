//! Regenerating the commit layer from history, and recording new work.

use super::apply::{apply_feature_patches, CommitReport};
use super::format::{commit_file_name, serialize_commit, Commit, CommitMeta};
use super::history::{CommitRecord, FileStates, History, HistoryStore};
use super::CommitSeries;
use crate::engine::{diff_text, EngineOptions};
use crate::error::{PatchStackError, Result};
use crate::tree::{self, remove_file_pruning, write_if_changed, SourceTree, TextFile};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct FeatureRebuildReport {
    pub written: Vec<String>,
    pub unchanged: usize,
    pub removed: Vec<String>,
    /// Paths whose working content is not recorded in any commit
    pub uncommitted: Vec<String>,
}

/// What [`record_feature_commit`] and [`fixup_feature_commit`] did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RecordReport {
    /// Subject of the commit created or amended, if any
    pub commit: Option<String>,
    pub files: Vec<String>,
}

/// Build the commit at `index` from its recorded pre- and post-images.
fn build_commit(
    history: &History,
    store: &HistoryStore,
    index: usize,
    context: usize,
) -> Result<Commit> {
    let record = &history.commits[index];
    let before = history.state_before(index);

    let mut files = Vec::new();
    for (path, after) in &record.changes {
        let old = store.content(before.get(path).cloned().flatten().as_deref())?;
        let new = store.content(after.as_deref())?;
        if let Some(patch) = diff_text(path, old.as_deref(), new.as_deref(), context) {
            files.push(patch);
        }
    }

    Ok(Commit {
        meta: record.meta.clone(),
        files,
    })
}

fn load_complete(store: &HistoryStore) -> Result<History> {
    let history = store.load()?;
    if let Some(commit) = &history.broken_at {
        return Err(PatchStackError::history(
            store.dir(),
            format!(
                "the last apply stopped at {commit}; rebuilding now would drop the commits after it"
            ),
        ));
    }
    Ok(history)
}

/// Working-tree content differing from the history head, per path.
///
/// Paths no commit touches are compared against `base`.
pub fn pending_changes(
    history: &History,
    store: &HistoryStore,
    base: &SourceTree,
    target: &SourceTree,
    options: &EngineOptions,
) -> Result<BTreeMap<String, Option<String>>> {
    let head = history.head();
    let mut paths: BTreeSet<String> = tree::union_files(&[base, target])?.into_iter().collect();
    paths.extend(head.keys().cloned());

    let mut pending = BTreeMap::new();
    for rel in paths {
        let current = match target.read_text(&rel, options.normalize)? {
            TextFile::Binary => {
                warn!("skipping non-text file {rel}");
                continue;
            }
            TextFile::Missing => None,
            TextFile::Text(text) => Some(text),
        };
        let recorded = match head.get(&rel) {
            Some(id) => store.content(id.as_deref())?,
            None => match base.read_text(&rel, options.normalize)? {
                TextFile::Binary => continue,
                other => other.as_text().map(str::to_string),
            },
        };
        if current != recorded {
            pending.insert(rel, current);
        }
    }
    Ok(pending)
}

/// Regenerate one commit patch per history entry into `patches_dir`.
///
/// With `base`, working-tree changes not captured by any commit are
/// reported; they are never written into a patch.
pub fn rebuild_feature_patches(
    target: &SourceTree,
    patches_dir: &Path,
    base: Option<&SourceTree>,
    options: &EngineOptions,
) -> Result<FeatureRebuildReport> {
    let store = HistoryStore::new(target);
    let history = load_complete(&store)?;
    let mut report = FeatureRebuildReport::default();

    let mut kept = BTreeSet::new();
    for index in 0..history.commits.len() {
        let commit = build_commit(&history, &store, index, options.context_lines)?;
        let name = commit_file_name(index + 1, &commit.meta.subject);
        let text = serialize_commit(&commit);
        if write_if_changed(&patches_dir.join(&name), text.as_bytes())? {
            debug!("wrote {name}");
            report.written.push(name.clone());
        } else {
            report.unchanged += 1;
        }
        kept.insert(name);
    }

    for name in CommitSeries::load(patches_dir)?.names {
        if !kept.contains(&name) && remove_file_pruning(patches_dir, &name)? {
            debug!("removed stale {name}");
            report.removed.push(name);
        }
    }

    if let Some(base) = base {
        let pending = pending_changes(&history, &store, base, target, options)?;
        if !pending.is_empty() {
            warn!(
                "{} uncommitted changes are not part of any commit: {}",
                pending.len(),
                pending.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        report.uncommitted = pending.into_keys().collect();
    }

    info!(
        "rebuilt {} commits ({} written, {} unchanged, {} removed)",
        kept.len(),
        report.written.len(),
        report.unchanged,
        report.removed.len()
    );
    Ok(report)
}

/// Store a file state and remember the pre-image of newly touched paths.
fn record_path(
    history: &mut History,
    store: &HistoryStore,
    base: &SourceTree,
    rel: &str,
    content: Option<&str>,
    options: &EngineOptions,
) -> Result<Option<String>> {
    if !history.base.contains_key(rel) {
        let before = base.read_text(rel, options.normalize)?;
        let id = before
            .as_text()
            .map(|text| store.put(text.as_bytes()))
            .transpose()?;
        history.base.insert(rel.to_string(), id);
    }
    content.map(|text| store.put(text.as_bytes())).transpose()
}

/// Append the working tree's uncommitted changes as a new commit.
pub fn record_feature_commit(
    base: &SourceTree,
    target: &SourceTree,
    meta: CommitMeta,
    options: &EngineOptions,
) -> Result<RecordReport> {
    let store = HistoryStore::new(target);
    let mut history = load_complete(&store)?;
    let pending = pending_changes(&history, &store, base, target, options)?;
    if pending.is_empty() {
        info!("nothing to commit");
        return Ok(RecordReport::default());
    }

    let mut changes = FileStates::new();
    for (rel, content) in &pending {
        let id = record_path(&mut history, &store, base, rel, content.as_deref(), options)?;
        changes.insert(rel.clone(), id);
    }

    let report = RecordReport {
        commit: Some(meta.subject.clone()),
        files: pending.into_keys().collect(),
    };
    info!(
        "recorded commit {:?} touching {} files",
        meta.subject,
        report.files.len()
    );
    history.commits.push(CommitRecord { meta, changes });
    store.save(&history)?;
    Ok(report)
}

/// Fold uncommitted changes into the last commit.
///
/// A path edited back to its state before that commit drops out of it; a
/// commit left with no changes is removed.
pub fn fixup_feature_commit(
    base: &SourceTree,
    target: &SourceTree,
    options: &EngineOptions,
) -> Result<RecordReport> {
    let store = HistoryStore::new(target);
    let mut history = load_complete(&store)?;
    let Some(last) = history.commits.len().checked_sub(1) else {
        return Err(PatchStackError::history(
            store.dir(),
            "there is no commit to fix up",
        ));
    };

    let pending = pending_changes(&history, &store, base, target, options)?;
    if pending.is_empty() {
        info!("nothing to fix up");
        return Ok(RecordReport::default());
    }

    for (rel, content) in &pending {
        let id = record_path(&mut history, &store, base, rel, content.as_deref(), options)?;
        let before = history.state_before(last).get(rel).cloned().flatten();
        let changes = &mut history.commits[last].changes;
        if before == id {
            changes.remove(rel);
        } else {
            changes.insert(rel.clone(), id);
        }
    }

    let subject = history.commits[last].meta.subject.clone();
    if history.commits[last].changes.is_empty() {
        warn!("commit {subject:?} no longer changes anything and is dropped");
        history.commits.pop();
    }
    store.prune(&history)?;
    store.save(&history)?;

    info!("folded {} files into {subject:?}", pending.len());
    Ok(RecordReport {
        commit: Some(subject),
        files: pending.into_keys().collect(),
    })
}

/// Move the commit layer onto a new base: regenerate the commit patches from
/// history, then replay them onto `new_base`.
pub fn rebase_feature_patches(
    new_base: &SourceTree,
    patches_dir: &Path,
    target: &SourceTree,
    options: &EngineOptions,
) -> Result<(FeatureRebuildReport, CommitReport)> {
    let rebuilt = rebuild_feature_patches(target, patches_dir, None, options)?;
    let applied = apply_feature_patches(new_base, patches_dir, target, options)?;
    Ok((rebuilt, applied))
}
