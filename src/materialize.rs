//! Baseline materialization.
//!
//! Copies the selected files of a decompiled tree into the baseline,
//! normalizes text, applies the merged access transforms and stamps the
//! result so later diffs can detect a changed snapshot.

use crate::at::{SourceTransform, SourceTransformReport};
use crate::error::{PatchStackError, Result};
use crate::pool::map_parallel;
use crate::tree::{
    self, atomic_write, remove_file_pruning, write_if_changed, SourceTree, META_DIR,
};
use glob::{MatchOptions, Pattern};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fs;
use tracing::{debug, info, warn};

/// Stamp file inside the materialized tree.
pub const STAMP_FILE: &str = "baseline.json";

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// Include/exclude glob predicate over relative paths.
#[derive(Debug, Clone, Default)]
pub struct FileFilter {
    include: Vec<Pattern>,
    exclude: Vec<Pattern>,
}

impl FileFilter {
    pub fn new(include: &[String], exclude: &[String]) -> Result<Self> {
        let compile = |patterns: &[String]| -> Result<Vec<Pattern>> {
            patterns
                .iter()
                .map(|p| {
                    Pattern::new(p).map_err(|e| PatchStackError::Pattern {
                        pattern: p.clone(),
                        message: e.to_string(),
                    })
                })
                .collect()
        };
        Ok(Self {
            include: compile(include)?,
            exclude: compile(exclude)?,
        })
    }

    /// An empty include list selects every file.
    pub fn matches(&self, rel: &str) -> bool {
        let included = self.include.is_empty()
            || self
                .include
                .iter()
                .any(|p| p.matches_with(rel, MATCH_OPTIONS));
        included
            && !self
                .exclude
                .iter()
                .any(|p| p.matches_with(rel, MATCH_OPTIONS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Text sources: normalized and access-transformed
    #[default]
    Sources,
    /// Arbitrary files copied byte for byte
    Resources,
}

#[derive(Debug, Clone, Default)]
pub struct MaterializeOptions {
    pub filter: FileFilter,
    pub transforms: SourceTransform,
    pub normalize: bool,
    pub mode: Mode,
    /// Vanilla version recorded in the stamp
    pub version: Option<String>,
    pub workers: usize,
}

/// Identity of a materialized baseline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStamp {
    pub version: Option<String>,
    pub fingerprint: String,
    pub files: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaterializeReport {
    pub files: usize,
    pub written: usize,
    pub unchanged: usize,
    pub removed: usize,
    pub fingerprint: String,
    pub transforms: SourceTransformReport,
}

/// Materialize `input` into `output`.
///
/// Identical inputs always produce identical output contents; only files
/// whose bytes change are rewritten.
pub fn materialize(
    input: &SourceTree,
    output: &SourceTree,
    options: &MaterializeOptions,
) -> Result<MaterializeReport> {
    let selected: Vec<String> = input
        .files()?
        .into_iter()
        .filter(|rel| options.filter.matches(rel))
        .collect();
    info!(
        "materializing {} of {} into {}",
        selected.len(),
        input.root().display(),
        output.root().display()
    );

    let produced = map_parallel(options.workers, &selected, |rel| {
        produce(input, rel, options)
    });

    let mut report = MaterializeReport {
        files: selected.len(),
        ..Default::default()
    };
    for (rel, result) in selected.iter().zip(produced) {
        let (bytes, unresolved) = result?;
        if write_if_changed(&output.path_of(rel), &bytes)? {
            report.written += 1;
        } else {
            report.unchanged += 1;
        }
        for descriptor in unresolved {
            warn!("access transform not applied, declaration not found: {descriptor}");
            report.transforms.unresolved.push((descriptor, rel.clone()));
        }
    }

    if options.mode == Mode::Sources {
        let present: BTreeSet<&str> = selected.iter().map(String::as_str).collect();
        for file in options.transforms.files() {
            if !present.contains(file) {
                warn!("access transforms target {file}, which is not in the baseline");
                let missing = options.transforms.entries(file).iter();
                report
                    .transforms
                    .unresolved
                    .extend(missing.map(|(descriptor, _)| (descriptor.clone(), file.to_string())));
            }
        }
        report.transforms.applied = options
            .transforms
            .len()
            .saturating_sub(report.transforms.unresolved.len());
    }

    let wanted: BTreeSet<&str> = selected.iter().map(String::as_str).collect();
    for rel in output.files()? {
        if !wanted.contains(rel.as_str()) && remove_file_pruning(output.root(), &rel)? {
            debug!("removed stale {rel}");
            report.removed += 1;
        }
    }

    report.fingerprint = tree::fingerprint(output)?;
    let stamp = SnapshotStamp {
        version: options.version.clone(),
        fingerprint: report.fingerprint.clone(),
        files: report.files,
    };
    write_stamp(output, &stamp)?;

    info!(
        "materialized {} files ({} written, {} unchanged, {} removed)",
        report.files, report.written, report.unchanged, report.removed
    );
    Ok(report)
}

type Produced = (Vec<u8>, Vec<crate::at::Descriptor>);

fn produce(input: &SourceTree, rel: &str, options: &MaterializeOptions) -> Result<Produced> {
    let bytes = input
        .read(rel)?
        .ok_or_else(|| PatchStackError::io(input.path_of(rel), vanished()))?;
    if options.mode == Mode::Resources {
        return Ok((bytes, Vec::new()));
    }

    let text = match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(e) => return Ok((e.into_bytes(), Vec::new())),
    };
    let text = if options.normalize {
        tree::normalize(&text)
    } else {
        text
    };
    let (text, unresolved) = options.transforms.apply(rel, &text);
    Ok((text.into_bytes(), unresolved))
}

fn stamp_path(tree: &SourceTree) -> std::path::PathBuf {
    tree.root().join(META_DIR).join(STAMP_FILE)
}

fn write_stamp(tree: &SourceTree, stamp: &SnapshotStamp) -> Result<()> {
    let path = stamp_path(tree);
    let json = serde_json::to_vec_pretty(stamp)
        .map_err(|e| PatchStackError::io(&path, std::io::Error::other(e)))?;
    atomic_write(&path, &json)
}

/// The stamp written by [`materialize`], if any.
pub fn read_stamp(tree: &SourceTree) -> Result<Option<SnapshotStamp>> {
    let path = stamp_path(tree);
    let bytes = match fs::read(&path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PatchStackError::io(path, e)),
    };
    let stamp = serde_json::from_slice(&bytes).map_err(|e| {
        PatchStackError::io(
            &path,
            std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        )
    })?;
    Ok(Some(stamp))
}

/// Check that a stamped snapshot still has the content it was stamped with.
///
/// Unstamped trees pass unchecked.
pub fn verify_snapshot(tree: &SourceTree) -> Result<Option<SnapshotStamp>> {
    let Some(stamp) = read_stamp(tree)? else {
        debug!("{} carries no stamp; not verified", tree.root().display());
        return Ok(None);
    };
    let found = tree::fingerprint(tree)?;
    if found != stamp.fingerprint {
        return Err(PatchStackError::SnapshotDrift {
            root: tree.root().to_path_buf(),
            expected: stamp.fingerprint,
            found,
        });
    }
    Ok(Some(stamp))
}

fn vanished() -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::NotFound, "file vanished while materializing")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::{AccessLevel, Descriptor, Visibility};

    fn write(tree: &SourceTree, rel: &str, content: &str) {
        atomic_write(&tree.path_of(rel), content.as_bytes()).unwrap();
    }

    #[test]
    fn test_filter_include_exclude() {
        let filter = FileFilter::new(
            &["net/**/*.java".to_string()],
            &["net/**/generated/*".to_string()],
        )
        .unwrap();
        assert!(filter.matches("net/minecraft/Foo.java"));
        assert!(!filter.matches("net/minecraft/generated/Gen.java"));
        assert!(!filter.matches("com/other/Bar.java"));
        assert!(FileFilter::default().matches("anything"));
        assert!(FileFilter::new(&["[".to_string()], &[]).is_err());
    }

    #[test]
    fn test_materialize_normalizes_and_transforms() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = SourceTree::new(temp_dir.path().join("vanilla"));
        let output = SourceTree::new(temp_dir.path().join("baseline"));
        write(&input, "a/Foo.java", "class Foo {\r\n    private int x;\r\n}");
        write(&input, "a/skip.txt", "x");

        let entries = vec![(
            Descriptor::member("a.Foo", "x"),
            AccessLevel::new(Visibility::Public),
        )];
        let options = MaterializeOptions {
            filter: FileFilter::new(&["**/*.java".to_string()], &[]).unwrap(),
            transforms: SourceTransform::new(entries.iter().map(|(d, a)| (d, a))),
            normalize: true,
            version: Some("1.21".to_string()),
            ..Default::default()
        };

        let report = materialize(&input, &output, &options).unwrap();
        assert_eq!(report.files, 1);
        assert_eq!(report.transforms.applied, 1);
        assert_eq!(
            fs::read_to_string(output.path_of("a/Foo.java")).unwrap(),
            "class Foo {\n    public int x;\n}\n"
        );
        assert_eq!(output.files().unwrap(), vec!["a/Foo.java"]);

        let stamp = verify_snapshot(&output).unwrap().unwrap();
        assert_eq!(stamp.version.as_deref(), Some("1.21"));
        assert_eq!(stamp.fingerprint, report.fingerprint);
    }

    #[test]
    fn test_materialize_twice_is_stable_and_prunes() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = SourceTree::new(temp_dir.path().join("vanilla"));
        let output = SourceTree::new(temp_dir.path().join("baseline"));
        write(&input, "A.java", "a\n");
        write(&output, "Stale.java", "old\n");

        let options = MaterializeOptions {
            normalize: true,
            ..Default::default()
        };
        let first = materialize(&input, &output, &options).unwrap();
        assert_eq!(first.removed, 1);
        let second = materialize(&input, &output, &options).unwrap();
        assert_eq!(second.written, 0);
        assert_eq!(second.unchanged, 1);
        assert_eq!(first.fingerprint, second.fingerprint);
    }

    #[test]
    fn test_verify_snapshot_detects_drift() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = SourceTree::new(temp_dir.path().join("vanilla"));
        let output = SourceTree::new(temp_dir.path().join("baseline"));
        write(&input, "A.java", "a\n");
        materialize(&input, &output, &MaterializeOptions::default()).unwrap();

        write(&output, "A.java", "edited\n");
        let err = verify_snapshot(&output).unwrap_err();
        assert!(matches!(err, PatchStackError::SnapshotDrift { .. }));
    }

    #[test]
    fn test_resources_copied_verbatim() {
        let temp_dir = tempfile::tempdir().unwrap();
        let input = SourceTree::new(temp_dir.path().join("res"));
        let output = SourceTree::new(temp_dir.path().join("out"));
        atomic_write(&input.path_of("icon.png"), &[0x89, 0x50, 0x00, 0xff]).unwrap();
        write(&input, "lang.json", "{}\r\n");

        let options = MaterializeOptions {
            mode: Mode::Resources,
            normalize: true,
            ..Default::default()
        };
        materialize(&input, &output, &options).unwrap();
        assert_eq!(
            fs::read(output.path_of("icon.png")).unwrap(),
            vec![0x89, 0x50, 0x00, 0xff]
        );
        assert_eq!(fs::read(output.path_of("lang.json")).unwrap(), b"{}\r\n");
    }
}
