use crate::at::AtParseError;
use crate::config::{ConfigError, VersionError};
use crate::patch::ParseError;
use crate::safety::SafetyError;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by patch-stack operations.
///
/// Per-file outcomes (rejected hunks, malformed patches inside a layer) are
/// recorded in the run reports instead; an `Err` from an operation means the
/// run itself could not proceed.
#[derive(Error, Debug)]
pub enum PatchStackError {
    #[error("malformed patch {path}: {source}")]
    MalformedPatch {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("commit sequence broken at {commit}: {reason}")]
    SequenceBroken {
        commit: String,
        file: Option<String>,
        hunk: Option<usize>,
        reason: String,
    },

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error("baseline {version} does not satisfy patch layer version_range {requirement}")]
    BaselineVersion {
        version: String,
        requirement: String,
    },

    #[error(
        "snapshot {root} changed since it was materialized (expected {expected}, found {found})"
    )]
    SnapshotDrift {
        root: PathBuf,
        expected: String,
        found: String,
    },

    #[error(transparent)]
    Safety(#[from] SafetyError),

    #[error("access transformer {source_name}: {source}")]
    AccessTransform {
        source_name: String,
        #[source]
        source: AtParseError,
    },

    #[error("history store {path}: {message}")]
    History { path: PathBuf, message: String },

    #[error("invalid glob pattern {pattern:?}: {message}")]
    Pattern { pattern: String, message: String },
}

impl PatchStackError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PatchStackError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn history(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        PatchStackError::History {
            path: path.into(),
            message: message.into(),
        }
    }
}

pub type Result<T, E = PatchStackError> = std::result::Result<T, E>;
