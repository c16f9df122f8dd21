//! Patchstack: a replayable patch stack for maintaining a fork of a
//! decompiled source tree.
//!
//! The fork is described by two ordered layers of edits over a materialized
//! baseline:
//!
//! - a **file patch layer**, one unified diff per modified file, applied
//!   strictly or with fuzzy offset matching and regenerated from an edited
//!   working tree ([`engine`])
//! - a **commit layer**, an ordered series of self-contained commit patches
//!   replayed one at a time and regenerated from the recorded history
//!   ([`commits`])
//!
//! Access transforms declared in both layers are merged into one list and
//! applied while the baseline is materialized ([`at`], [`materialize`]).
//!
//! # Safety
//!
//! - Every write is atomic (tempfile + fsync + rename)
//! - Patch targets are confined to the tree they are applied to
//! - A file is written only after all of its hunks matched
//! - Files whose bytes do not change are never rewritten
//!
//! # Example
//!
//! ```no_run
//! use patchstack::engine::{apply_file_patches, EngineOptions};
//! use patchstack::tree::SourceTree;
//! use std::path::Path;
//!
//! let report = apply_file_patches(
//!     &SourceTree::new("work/baseline"),
//!     Path::new("patches/sources"),
//!     &SourceTree::new("work/patched"),
//!     Path::new("work/rejects"),
//!     &EngineOptions::default(),
//! )?;
//! println!("{} patches applied", report.applied());
//! # Ok::<(), patchstack::PatchStackError>(())
//! ```

pub mod at;
pub mod commits;
pub mod config;
pub mod engine;
pub mod error;
pub mod materialize;
pub mod patch;
pub mod pipeline;
pub mod pool;
pub mod safety;
pub mod tree;

// Re-exports
pub use config::{load_from_path, load_from_str, load_or_default, Config, ConfigError};
pub use engine::{
    apply_file_patches, apply_file_patches_fuzzy, fixup_file_patches, rebuild_file_patches,
    ApplyReport, CancelToken, EngineOptions, FuzzyOptions,
};
pub use commits::{apply_feature_patches, rebuild_feature_patches, CommitReport};
pub use error::{PatchStackError, Result};
pub use pipeline::Pipeline;
pub use safety::{SafetyError, TreeGuard};
pub use tree::SourceTree;
