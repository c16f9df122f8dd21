//! Access transformers: declarations that widen the visibility of classes
//! and members in the decompiled baseline.
//!
//! Declarations are collected from patch preambles, commit bodies and an
//! optional override file, merged into one sorted list, and applied to the
//! baseline sources by the materializer.

mod apply;
mod merge;
mod model;
mod parse;

pub use apply::{class_file, SourceTransform, SourceTransformReport};
pub use merge::{merge, MergeReport, Override};
pub use model::{AccessLevel, AccessTransformEntry, Descriptor, Finality, Visibility};
pub use parse::{declared_in, parse_entries, parse_line, render, AtParseError, AT_MARKER};
