//! Unified-diff codec for single-file patches.
//!
//! A [`PatchFile`] covers exactly one target path. Hunk lengths are always
//! derived from hunk bodies, so [`serialize`] emits consistent headers even
//! after hunks were edited in memory.

mod model;
mod parse;
mod serialize;

pub use model::{FileState, Hunk, HunkLine, PatchFile, NO_NEWLINE_MARKER};
pub use parse::{parse, parse_str, ParseError};
pub use serialize::serialize;

pub(crate) use parse::{parse_section, parse_section_until, split_patch_lines};
pub(crate) use serialize::write_section;
