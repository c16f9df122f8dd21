//! Commit history kept inside the final tree.
//!
//! `.patchstack/history.json` lists every applied or recorded commit with the
//! post-image of each file it touched. Pre-images of touched files are kept
//! once, in `base`, so commit diffs can be regenerated without the base tree.
//! File contents live in `.patchstack/objects/` under their xxh3-128 id.

use super::format::CommitMeta;
use crate::error::{PatchStackError, Result};
use crate::tree::{atomic_write, SourceTree, META_DIR};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use xxhash_rust::xxh3::xxh3_128;

pub const HISTORY_FILE: &str = "history.json";
pub const OBJECTS_DIR: &str = "objects";
const FORMAT_VERSION: u32 = 1;

/// Object id per path; `None` means the file does not exist.
pub type FileStates = BTreeMap<String, Option<String>>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitRecord {
    #[serde(flatten)]
    pub meta: CommitMeta,
    /// Post-image of every file the commit touches
    pub changes: FileStates,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub version: u32,
    /// Pre-image of every path any commit touches
    pub base: FileStates,
    pub commits: Vec<CommitRecord>,
    /// Set when the last apply stopped at a failing commit
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at: Option<String>,
}

impl Default for History {
    fn default() -> Self {
        Self {
            version: FORMAT_VERSION,
            base: FileStates::new(),
            commits: Vec::new(),
            broken_at: None,
        }
    }
}

impl History {
    /// File states before commit `index` for every touched path.
    pub fn state_before(&self, index: usize) -> FileStates {
        let mut state = self.base.clone();
        for commit in self.commits.iter().take(index) {
            for (path, id) in &commit.changes {
                state.insert(path.clone(), id.clone());
            }
        }
        state
    }

    /// File states after the last commit.
    pub fn head(&self) -> FileStates {
        self.state_before(self.commits.len())
    }

    /// Ids referenced anywhere in the history.
    fn referenced(&self) -> BTreeSet<&str> {
        self.base
            .values()
            .chain(self.commits.iter().flat_map(|c| c.changes.values()))
            .filter_map(|id| id.as_deref())
            .collect()
    }
}

/// Content-addressed object id.
pub fn object_id(content: &[u8]) -> String {
    format!("{:032x}", xxh3_128(content))
}

/// The `.patchstack` directory of a final tree.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    dir: PathBuf,
}

impl HistoryStore {
    pub fn new(tree: &SourceTree) -> Self {
        Self {
            dir: tree.root().join(META_DIR),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn history_path(&self) -> PathBuf {
        self.dir.join(HISTORY_FILE)
    }

    fn object_path(&self, id: &str) -> PathBuf {
        let (fan, rest) = id.split_at(2.min(id.len()));
        self.dir.join(OBJECTS_DIR).join(fan).join(rest)
    }

    /// Load the history; a tree without one has an empty history.
    pub fn load(&self) -> Result<History> {
        let path = self.history_path();
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(History::default()),
            Err(e) => return Err(PatchStackError::io(path, e)),
        };
        let history: History = serde_json::from_slice(&bytes)
            .map_err(|e| PatchStackError::history(&path, e.to_string()))?;
        if history.version != FORMAT_VERSION {
            return Err(PatchStackError::history(
                &path,
                format!("unsupported history version {}", history.version),
            ));
        }
        Ok(history)
    }

    pub fn save(&self, history: &History) -> Result<()> {
        let path = self.history_path();
        let mut json = serde_json::to_vec_pretty(history)
            .map_err(|e| PatchStackError::history(&path, e.to_string()))?;
        json.push(b'\n');
        atomic_write(&path, &json)
    }

    /// Store `content`, returning its id. Existing objects are not rewritten.
    pub fn put(&self, content: &[u8]) -> Result<String> {
        let id = object_id(content);
        let path = self.object_path(&id);
        if !path.exists() {
            atomic_write(&path, content)?;
        }
        Ok(id)
    }

    /// Text of object `id`, verified against its id.
    pub fn get_text(&self, id: &str) -> Result<String> {
        let path = self.object_path(id);
        let bytes = fs::read(&path).map_err(|e| {
            PatchStackError::history(&path, format!("missing object {id}: {e}"))
        })?;
        if object_id(&bytes) != id {
            return Err(PatchStackError::history(&path, "object content does not match its id"));
        }
        String::from_utf8(bytes)
            .map_err(|_| PatchStackError::history(&path, "object is not valid UTF-8"))
    }

    /// Resolve a file state to its content.
    pub fn content(&self, id: Option<&str>) -> Result<Option<String>> {
        id.map(|id| self.get_text(id)).transpose()
    }

    /// Remove the history and every object.
    pub fn clear(&self) -> Result<()> {
        for path in [self.history_path(), self.dir.join(OBJECTS_DIR)] {
            let result = if path.is_dir() {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match result {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(PatchStackError::io(path, e)),
            }
        }
        Ok(())
    }

    /// Delete objects no longer referenced by `history`.
    pub fn prune(&self, history: &History) -> Result<usize> {
        let objects = self.dir.join(OBJECTS_DIR);
        if !objects.exists() {
            return Ok(0);
        }
        let referenced = history.referenced();
        let mut removed = 0;
        for entry in WalkDir::new(&objects).min_depth(2).max_depth(2) {
            let entry = entry.map_err(|e| {
                PatchStackError::io(&objects, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let fan = entry
                .path()
                .parent()
                .and_then(Path::file_name)
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let id = format!("{fan}{}", entry.file_name().to_string_lossy());
            if !referenced.contains(id.as_str()) {
                fs::remove_file(entry.path())
                    .map_err(|e| PatchStackError::io(entry.path(), e))?;
                removed += 1;
            }
        }
        debug!("pruned {removed} unreferenced objects");
        Ok(removed)
    }
}
