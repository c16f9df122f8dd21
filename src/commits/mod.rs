//! Commit patch engine.
//!
//! The feature layer is an ordered series of commit patches. Applying it
//! replays every commit onto the file-patched tree and records a history in
//! the final tree, which rebuilding turns back into one patch per commit.

mod apply;
pub mod format;
pub mod history;
mod rebuild;

pub use apply::{apply_feature_patches, CommitOutcome, CommitReport, CommitStatus};
pub use format::{commit_file_name, parse_commit, serialize_commit, Author, Commit, CommitMeta};
pub use history::{History, HistoryStore};
pub use rebuild::{
    fixup_feature_commit, pending_changes, rebase_feature_patches, record_feature_commit,
    rebuild_feature_patches, FeatureRebuildReport, RecordReport,
};

use crate::at::{self, AccessTransformEntry};
use crate::engine::PATCH_EXTENSION;
use crate::error::{PatchStackError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Commit patch files of a feature layer, in application order.
#[derive(Debug, Clone)]
pub struct CommitSeries {
    pub dir: PathBuf,
    /// File names, sorted; the numeric prefix fixes the order
    pub names: Vec<String>,
}

impl CommitSeries {
    /// List `*.patch` files in `dir`. A missing directory is an empty series.
    pub fn load(dir: &Path) -> Result<Self> {
        let mut names = Vec::new();
        let read = match fs::read_dir(dir) {
            Ok(read) => read,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Self {
                    dir: dir.to_path_buf(),
                    names,
                })
            }
            Err(e) => return Err(PatchStackError::io(dir, e)),
        };
        for entry in read {
            let entry = entry.map_err(|e| PatchStackError::io(dir, e))?;
            if !entry.file_type().map_err(|e| PatchStackError::io(entry.path(), e))?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(PATCH_EXTENSION) {
                names.push(name);
            }
        }
        names.sort();
        Ok(Self {
            dir: dir.to_path_buf(),
            names,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Access transforms declared in commit messages, in series order.
    ///
    /// Commits that do not parse are skipped; applying them reports the error.
    pub fn access_transforms(&self) -> Result<Vec<AccessTransformEntry>> {
        let mut collected = Vec::new();
        for name in &self.names {
            let path = self.dir.join(name);
            let bytes = fs::read(&path).map_err(|e| PatchStackError::io(&path, e))?;
            let commit = match parse_commit(&bytes) {
                Ok(commit) => commit,
                Err(e) => {
                    warn!("{name}: skipping access transforms of malformed commit: {e}");
                    continue;
                }
            };
            let lines: Vec<&str> = commit.meta.body.lines().collect();
            let declared = at::declared_in(&lines, name).map_err(|source| {
                PatchStackError::AccessTransform {
                    source_name: name.clone(),
                    source,
                }
            })?;
            collected.extend(declared);
        }
        Ok(collected)
    }
}
