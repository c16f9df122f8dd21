//! Source trees on disk.
//!
//! Text read for diffing goes through [`normalize`] unless normalization is
//! switched off, in which case line splitting keeps every byte.

mod write;

pub use write::{atomic_write, remove_file_pruning, write_if_changed};

use crate::error::{PatchStackError, Result};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use xxhash_rust::xxh3::Xxh3;

/// Per-tree metadata directory; never listed as tree content.
pub const META_DIR: &str = ".patchstack";

/// A directory of files addressed by `/`-separated relative paths.
#[derive(Debug, Clone)]
pub struct SourceTree {
    root: PathBuf,
}

/// Content of a tree file as seen by the diff engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextFile {
    Missing,
    Text(String),
    Binary,
}

impl TextFile {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TextFile::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl SourceTree {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }

    /// All file paths in the tree, sorted. A missing root is an empty tree.
    pub fn files(&self) -> Result<Vec<String>> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }

        let mut files = Vec::new();
        let walker = WalkDir::new(&self.root)
            .into_iter()
            .filter_entry(|entry| entry.depth() != 1 || entry.file_name() != META_DIR);
        for entry in walker {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(&self.root).to_path_buf();
                PatchStackError::io(path, std::io::Error::other(e.to_string()))
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&self.root) {
                files.push(relative_string(rel));
            }
        }
        files.sort();
        Ok(files)
    }

    /// Raw bytes of a file, `None` when it does not exist.
    pub fn read(&self, rel: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_of(rel);
        match fs::read(&path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PatchStackError::io(path, e)),
        }
    }

    /// Read a file as text, optionally normalized.
    pub fn read_text(&self, rel: &str, normalize_text: bool) -> Result<TextFile> {
        Ok(match self.read(rel)? {
            None => TextFile::Missing,
            Some(bytes) => match String::from_utf8(bytes) {
                Ok(text) if normalize_text => TextFile::Text(normalize(&text)),
                Ok(text) => TextFile::Text(text),
                Err(_) => TextFile::Binary,
            },
        })
    }
}

/// Union of the file sets of several trees, sorted.
pub fn union_files(trees: &[&SourceTree]) -> Result<Vec<String>> {
    let mut all = BTreeSet::new();
    for tree in trees {
        all.extend(tree.files()?);
    }
    Ok(all.into_iter().collect())
}

/// Counts from [`sync_tree`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStats {
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
}

/// Make `to` contain exactly the files of `from`, byte for byte.
///
/// Only differing files are rewritten. The metadata directory of `to` is
/// left alone.
pub fn sync_tree(from: &SourceTree, to: &SourceTree) -> Result<SyncStats> {
    let mut stats = SyncStats::default();
    let source_files = from.files()?;
    let wanted: BTreeSet<&str> = source_files.iter().map(String::as_str).collect();

    for rel in to.files()? {
        if !wanted.contains(rel.as_str()) && remove_file_pruning(to.root(), &rel)? {
            stats.removed += 1;
        }
    }

    for rel in &source_files {
        let bytes = from
            .read(rel)?
            .ok_or_else(|| PatchStackError::io(from.path_of(rel), not_found()))?;
        if write_if_changed(&to.path_of(rel), &bytes)? {
            stats.written += 1;
        } else {
            stats.unchanged += 1;
        }
    }

    Ok(stats)
}

/// xxh3-128 fingerprint over every path and raw byte content in the tree.
pub fn fingerprint(tree: &SourceTree) -> Result<String> {
    let mut hasher = Xxh3::new();
    for rel in tree.files()? {
        let bytes = tree.read(&rel)?.unwrap_or_default();
        hasher.update(rel.as_bytes());
        hasher.update(&[0]);
        hasher.update(&(bytes.len() as u64).to_le_bytes());
        hasher.update(&bytes);
    }
    Ok(format!("{:032x}", hasher.digest128()))
}

/// Normalize line endings: CRLF and lone CR become LF, and non-empty text
/// ends with exactly one LF.
pub fn normalize(text: &str) -> String {
    let mut out = text.replace("\r\n", "\n").replace('\r', "\n");
    let trimmed_len = out.trim_end_matches('\n').len();
    out.truncate(trimmed_len);
    if !out.is_empty() {
        out.push('\n');
    }
    out
}

/// Marker kept at the end of a final line that has no terminator, so that
/// `"x"` at end of file never compares equal to a terminated `"x"`.
pub const MISSING_NEWLINE: char = '\n';

/// Split text into lines without their `\n` terminators.
///
/// Splitting is lossless: a `\r` before the terminator stays part of the
/// line, and an unterminated final line carries [`MISSING_NEWLINE`].
pub fn split_lines(text: &str) -> Vec<String> {
    text.split_inclusive('\n')
        .map(|line| match line.strip_suffix('\n') {
            Some(line) => line.to_string(),
            None => format!("{line}{MISSING_NEWLINE}"),
        })
        .collect()
}

/// Inverse of [`split_lines`].
pub fn join_lines<S: AsRef<str>>(lines: &[S]) -> String {
    let mut out = String::new();
    for (index, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        match line.strip_suffix(MISSING_NEWLINE) {
            Some(last) if index + 1 == lines.len() => out.push_str(last),
            // A marked line that is no longer last ends where its marker is.
            Some(_) => out.push_str(line),
            None => {
                out.push_str(line);
                out.push('\n');
            }
        }
    }
    out
}

pub(crate) fn relative_string(rel: &Path) -> String {
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn not_found() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, "file vanished during sync")
}
