//! Operations bound to a loaded `patchstack.toml`.
//!
//! Every step of the stack (materialize, apply, rebuild, fixup and their
//! commit-layer counterparts) is a free function over explicit trees and
//! options; [`Pipeline`] resolves those inputs from the configuration.

use crate::at::{self, AccessTransformEntry, MergeReport, SourceTransform};
use crate::commits::{
    self, CommitMeta, CommitReport, CommitSeries, FeatureRebuildReport, RecordReport,
};
use crate::config::{matches_requirement, Config, ConfigError, ValidationError, ValidationIssue};
use crate::engine::{
    self, ApplyReport, CancelToken, EngineOptions, FixupReport, FuzzyOptions, PatchLayer,
    RebuildReport,
};
use crate::error::{PatchStackError, Result};
use crate::materialize::{self, FileFilter, MaterializeOptions, MaterializeReport, Mode};
use crate::tree::{write_if_changed, SourceTree};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct Pipeline {
    pub config: Config,
    pub options: EngineOptions,
    pub fuzzy: FuzzyOptions,
}

impl Pipeline {
    pub fn new(config: Config) -> Self {
        let options = EngineOptions {
            context_lines: config.engine.context_lines,
            workers: config.engine.workers,
            normalize: config.engine.normalize,
            cancel: CancelToken::default(),
        };
        let fuzzy = FuzzyOptions {
            radius: config.fuzzy.radius,
            max_mismatches: config.fuzzy.max_mismatches,
            min_similarity: config.fuzzy.min_similarity,
        };
        Self {
            config,
            options,
            fuzzy,
        }
    }

    pub fn with_cancel(mut self, cancel: CancelToken) -> Self {
        self.options.cancel = cancel;
        self
    }

    pub fn baseline(&self) -> SourceTree {
        SourceTree::new(&self.config.paths.baseline)
    }

    pub fn file_patched(&self) -> SourceTree {
        SourceTree::new(&self.config.paths.file_patched)
    }

    pub fn target(&self) -> SourceTree {
        SourceTree::new(&self.config.paths.target)
    }

    /// Access transforms declared by both patch layers, file layer first.
    pub fn collect_access_transforms(&self) -> Result<Vec<AccessTransformEntry>> {
        let mut collected = PatchLayer::load(&self.config.paths.file_patches)?.access_transforms()?;
        collected.extend(CommitSeries::load(&self.config.paths.feature_patches)?.access_transforms()?);
        debug!("collected {} access transform declarations", collected.len());
        Ok(collected)
    }

    /// Merge every declaration with the override file and write the
    /// consolidated list.
    pub fn merge_access_transforms(&self) -> Result<MergeReport> {
        let collected = self.collect_access_transforms()?;
        let overrides = match &self.config.paths.access_transforms {
            Some(path) => Some(read_access_transforms(path)?),
            None => None,
        };
        let report = at::merge(&collected, overrides.as_deref());

        let rendered = at::render(report.entries.iter().map(|(d, a)| (d, a)));
        let out = &self.config.paths.merged_access_transforms;
        if write_if_changed(out, rendered.as_bytes())? {
            info!(
                "wrote {} access transforms to {}",
                report.entries.len(),
                out.display()
            );
        }
        Ok(report)
    }

    /// Materialize the vanilla sources into the baseline with the merged
    /// access transforms applied.
    pub fn materialize(&self) -> Result<MaterializeReport> {
        let vanilla = required(self.config.paths.vanilla.as_deref(), "paths.vanilla")?;
        let merged = self.merge_access_transforms()?;
        let options = MaterializeOptions {
            filter: FileFilter::new(&self.config.baseline.include, &self.config.baseline.exclude)?,
            transforms: SourceTransform::new(merged.entries.iter().map(|(d, a)| (d, a))),
            normalize: self.options.normalize,
            mode: Mode::Sources,
            version: self.config.baseline.version.clone(),
            workers: self.options.workers,
        };
        materialize::materialize(&SourceTree::new(vanilla), &self.baseline(), &options)
    }

    /// Copy the resource tree verbatim. Only `baseline.exclude` applies.
    pub fn materialize_resources(&self) -> Result<MaterializeReport> {
        let resources = required(self.config.paths.resources.as_deref(), "paths.resources")?;
        let out = required(
            self.config.paths.resources_out.as_deref(),
            "paths.resources_out",
        )?;
        let options = MaterializeOptions {
            filter: FileFilter::new(&[], &self.config.baseline.exclude)?,
            mode: Mode::Resources,
            version: self.config.baseline.version.clone(),
            workers: self.options.workers,
            ..MaterializeOptions::default()
        };
        materialize::materialize(&SourceTree::new(resources), &SourceTree::new(out), &options)
    }

    /// Check the baseline's version against `patches.version_range`.
    ///
    /// The stamped version wins over `baseline.version`; an unknown version
    /// is not checked.
    pub fn check_version(&self) -> Result<()> {
        let Some(range) = self.config.patches.version_range.as_deref() else {
            return Ok(());
        };
        let stamped = materialize::read_stamp(&self.baseline())?.and_then(|s| s.version);
        let Some(version) = stamped.or_else(|| self.config.baseline.version.clone()) else {
            debug!("baseline version unknown; skipping version_range check");
            return Ok(());
        };
        if matches_requirement(&version, Some(range))? {
            Ok(())
        } else {
            Err(PatchStackError::BaselineVersion {
                version,
                requirement: range.to_string(),
            })
        }
    }

    pub fn apply(&self, fuzzy: bool) -> Result<ApplyReport> {
        self.check_version()?;
        let paths = &self.config.paths;
        if fuzzy {
            engine::apply_file_patches_fuzzy(
                &self.baseline(),
                &paths.file_patches,
                &self.file_patched(),
                &paths.rejects,
                &self.options,
                &self.fuzzy,
            )
        } else {
            engine::apply_file_patches(
                &self.baseline(),
                &paths.file_patches,
                &self.file_patched(),
                &paths.rejects,
                &self.options,
            )
        }
    }

    pub fn rebuild(&self) -> Result<RebuildReport> {
        engine::rebuild_file_patches(
            &self.baseline(),
            &self.file_patched(),
            &self.config.paths.file_patches,
            &self.options,
        )
    }

    pub fn fixup(&self) -> Result<FixupReport> {
        engine::fixup_file_patches(
            &self.baseline(),
            &self.file_patched(),
            &self.config.paths.file_patches,
            &self.options,
        )
    }

    pub fn apply_features(&self) -> Result<CommitReport> {
        commits::apply_feature_patches(
            &self.file_patched(),
            &self.config.paths.feature_patches,
            &self.target(),
            &self.options,
        )
    }

    pub fn rebuild_features(&self) -> Result<FeatureRebuildReport> {
        commits::rebuild_feature_patches(
            &self.target(),
            &self.config.paths.feature_patches,
            Some(&self.file_patched()),
            &self.options,
        )
    }

    pub fn commit(&self, meta: CommitMeta) -> Result<RecordReport> {
        commits::record_feature_commit(&self.file_patched(), &self.target(), meta, &self.options)
    }

    pub fn fixup_features(&self) -> Result<RecordReport> {
        commits::fixup_feature_commit(&self.file_patched(), &self.target(), &self.options)
    }

    pub fn rebase_features(&self) -> Result<(FeatureRebuildReport, CommitReport)> {
        commits::rebase_feature_patches(
            &self.file_patched(),
            &self.config.paths.feature_patches,
            &self.target(),
            &self.options,
        )
    }
}

fn required<'a>(path: Option<&'a Path>, field: &'static str) -> Result<&'a Path> {
    path.ok_or_else(|| {
        PatchStackError::Config(ConfigError::Validation {
            path: None,
            source: ValidationError {
                issues: vec![ValidationIssue::MissingField { field }],
            },
        })
    })
}

fn read_access_transforms(path: &Path) -> Result<Vec<AccessTransformEntry>> {
    let text = fs::read_to_string(path).map_err(|e| PatchStackError::io(path, e))?;
    let source = path.display().to_string();
    at::parse_entries(&text, &source).map_err(|e| PatchStackError::AccessTransform {
        source_name: source.clone(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;
    use crate::tree::atomic_write;

    fn pipeline(root: &Path, extra: &str) -> Pipeline {
        let mut config = load_from_str(&format!(
            "[paths]\nvanilla = \"vanilla\"\naccess_transforms = \"project.at\"\n{extra}"
        ))
        .unwrap();
        config.paths.resolve(root);
        Pipeline::new(config)
    }

    #[test]
    fn test_engine_options_follow_config() {
        let temp_dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(
            temp_dir.path(),
            "[engine]\ncontext_lines = 5\n[fuzzy]\nradius = 8\n",
        );
        assert_eq!(pipeline.options.context_lines, 5);
        assert_eq!(pipeline.fuzzy.radius, 8);
        assert_eq!(pipeline.fuzzy.max_mismatches, 2);
    }

    #[test]
    fn test_override_file_wins_and_merged_list_is_written() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let pipeline = pipeline(root, "");
        atomic_write(
            &root.join("patches/sources/a/Foo.java.patch"),
            b"== AT ==\nprotected a.Foo bar\n\n--- a/a/Foo.java\n+++ b/a/Foo.java\n@@ -1 +1 @@\n-x\n+y\n",
        )
        .unwrap();
        atomic_write(&root.join("project.at"), b"public a.Foo bar\n").unwrap();

        let report = pipeline.merge_access_transforms().unwrap();
        assert_eq!(report.overrides.len(), 1);
        let merged = fs::read_to_string(root.join("work/merged.at")).unwrap();
        assert!(merged.ends_with("public a.Foo bar\n"));
    }

    #[test]
    fn test_materialize_applies_merged_transforms() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let pipeline = pipeline(root, "[baseline]\nversion = \"1.21\"\n");
        atomic_write(
            &root.join("vanilla/a/Foo.java"),
            b"package a;\n\npublic class Foo {\n    private int bar;\n}\n",
        )
        .unwrap();
        atomic_write(&root.join("project.at"), b"public a.Foo bar\n").unwrap();

        let report = pipeline.materialize().unwrap();
        assert_eq!(report.transforms.applied, 1);
        let text = fs::read_to_string(root.join("work/baseline/a/Foo.java")).unwrap();
        assert!(text.contains("    public int bar;"));
    }

    #[test]
    fn test_version_range_is_checked_before_apply() {
        let temp_dir = tempfile::tempdir().unwrap();
        let root = temp_dir.path();
        let pipeline = pipeline(
            root,
            "[baseline]\nversion = \"1.20.4\"\n[patches]\nversion_range = \">=1.21\"\n",
        );
        let err = pipeline.apply(false).unwrap_err();
        assert!(matches!(err, PatchStackError::BaselineVersion { .. }));
    }

    #[test]
    fn test_missing_vanilla_is_a_config_error() {
        let mut config = Config::default();
        config.paths.resolve(Path::new("/nonexistent"));
        let err = Pipeline::new(config).materialize().unwrap_err();
        assert!(err.to_string().contains("paths.vanilla"));
    }
}
