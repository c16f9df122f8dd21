//! Replaying a commit series onto a base tree.

use super::format::{parse_commit, Commit};
use super::history::{CommitRecord, History, HistoryStore};
use super::CommitSeries;
use crate::engine::{apply_patch, EngineOptions};
use crate::error::{PatchStackError, Result};
use crate::safety::TreeGuard;
use crate::tree::{self, atomic_write, remove_file_pruning, SourceTree, TextFile};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommitStatus {
    Applied {
        files: usize,
    },
    Failed {
        #[serde(skip_serializing_if = "Option::is_none")]
        file: Option<String>,
        /// 1-based hunk number within the file patch
        #[serde(skip_serializing_if = "Option::is_none")]
        hunk: Option<usize>,
        reason: String,
    },
    /// An earlier commit failed or the run was cancelled
    NotAttempted,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitOutcome {
    /// Commit patch file name
    pub patch: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub status: CommitStatus,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CommitReport {
    pub outcomes: Vec<CommitOutcome>,
    pub cancelled: bool,
}

impl CommitReport {
    pub fn applied(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.status, CommitStatus::Applied { .. }))
            .count()
    }

    pub fn is_success(&self) -> bool {
        !self.cancelled && self.applied() == self.outcomes.len()
    }

    /// The failure that broke the sequence, if any.
    pub fn failure(&self) -> Option<PatchStackError> {
        self.outcomes.iter().find_map(|outcome| match &outcome.status {
            CommitStatus::Failed { file, hunk, reason } => Some(PatchStackError::SequenceBroken {
                commit: outcome.patch.clone(),
                file: file.clone(),
                hunk: *hunk,
                reason: reason.clone(),
            }),
            _ => None,
        })
    }

    /// `Err(SequenceBroken)` when a commit failed.
    pub fn into_result(self) -> Result<Self> {
        match self.failure() {
            Some(error) => Err(error),
            None => Ok(self),
        }
    }
}

/// Pre- and post-image per touched path.
type Staged = BTreeMap<String, (Option<String>, Option<String>)>;

struct Failure {
    file: Option<String>,
    hunk: Option<usize>,
    reason: String,
}

/// Compute every file a commit produces without touching the tree.
fn stage_commit(
    commit: &Commit,
    target: &SourceTree,
    guard: &TreeGuard,
    options: &EngineOptions,
) -> Result<std::result::Result<Staged, Failure>> {
    let mut staged = BTreeMap::new();
    for file in &commit.files {
        if let Err(e) = guard.resolve(&file.path) {
            return Ok(Err(Failure {
                file: Some(file.path.clone()),
                hunk: None,
                reason: e.to_string(),
            }));
        }
        let current = match target.read_text(&file.path, options.normalize)? {
            TextFile::Binary => {
                return Ok(Err(Failure {
                    file: Some(file.path.clone()),
                    hunk: None,
                    reason: "target is not a text file".to_string(),
                }))
            }
            TextFile::Missing => None,
            TextFile::Text(text) => Some(text),
        };
        match apply_patch(current.as_deref(), &options.prepare(file), None) {
            Ok(applied) => {
                staged.insert(file.path.clone(), (current, applied.content));
            }
            Err(rejection) => {
                let first = rejection.hunks.first();
                return Ok(Err(Failure {
                    file: Some(file.path.clone()),
                    hunk: first.map(|h| h.index + 1),
                    reason: first.map_or(rejection.reason.clone(), |h| h.reason.clone()),
                }));
            }
        }
    }
    Ok(Ok(staged))
}

/// Reset `target` to `base` and replay the commit series in `patches_dir`.
///
/// A commit is written only when every one of its files applies. The first
/// failing commit stops the sequence; later commits are not attempted.
pub fn apply_feature_patches(
    base: &SourceTree,
    patches_dir: &Path,
    target: &SourceTree,
    options: &EngineOptions,
) -> Result<CommitReport> {
    let series = CommitSeries::load(patches_dir)?;
    let store = HistoryStore::new(target);
    store.clear()?;
    let stats = tree::sync_tree(base, target)?;
    debug!(
        "reset {} from {} ({} written, {} removed)",
        target.root().display(),
        base.root().display(),
        stats.written,
        stats.removed
    );

    let guard = TreeGuard::new(target.root());
    let mut history = History::default();
    let mut report = CommitReport::default();
    let mut stopped = false;

    for name in &series.names {
        if stopped || options.cancel.is_cancelled() {
            report.cancelled |= !stopped;
            report.outcomes.push(CommitOutcome {
                patch: name.clone(),
                subject: None,
                status: CommitStatus::NotAttempted,
            });
            continue;
        }

        let path = patches_dir.join(name);
        let bytes = std::fs::read(&path).map_err(|e| PatchStackError::io(&path, e))?;
        let commit = match parse_commit(&bytes) {
            Ok(commit) => commit,
            Err(e) => {
                warn!("{name}: malformed commit: {e}");
                report.outcomes.push(CommitOutcome {
                    patch: name.clone(),
                    subject: None,
                    status: CommitStatus::Failed {
                        file: None,
                        hunk: None,
                        reason: format!("malformed commit: {e}"),
                    },
                });
                history.broken_at = Some(name.clone());
                stopped = true;
                continue;
            }
        };

        let staged = match stage_commit(&commit, target, &guard, options)? {
            Ok(staged) => staged,
            Err(failure) => {
                warn!(
                    "{name}: {} does not apply: {}",
                    failure.file.as_deref().unwrap_or("commit"),
                    failure.reason
                );
                report.outcomes.push(CommitOutcome {
                    patch: name.clone(),
                    subject: Some(commit.meta.subject.clone()),
                    status: CommitStatus::Failed {
                        file: failure.file,
                        hunk: failure.hunk,
                        reason: failure.reason,
                    },
                });
                history.broken_at = Some(name.clone());
                stopped = true;
                continue;
            }
        };

        let mut changes = BTreeMap::new();
        for (rel, (before, after)) in &staged {
            if !history.base.contains_key(rel) {
                let id = before
                    .as_deref()
                    .map(|text| store.put(text.as_bytes()))
                    .transpose()?;
                history.base.insert(rel.clone(), id);
            }
            match after {
                Some(content) => {
                    atomic_write(&target.path_of(rel), content.as_bytes())?;
                    changes.insert(rel.clone(), Some(store.put(content.as_bytes())?));
                }
                None => {
                    remove_file_pruning(target.root(), rel)?;
                    changes.insert(rel.clone(), None);
                }
            }
        }

        debug!("{name}: applied {} files", staged.len());
        report.outcomes.push(CommitOutcome {
            patch: name.clone(),
            subject: Some(commit.meta.subject.clone()),
            status: CommitStatus::Applied {
                files: staged.len(),
            },
        });
        history.commits.push(CommitRecord {
            meta: commit.meta,
            changes,
        });
    }

    store.save(&history)?;
    info!(
        "applied {} of {} commits onto {}",
        report.applied(),
        report.outcomes.len(),
        target.root().display()
    );
    Ok(report)
}
