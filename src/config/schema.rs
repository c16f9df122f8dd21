use crate::config::version::{parse_version, VersionError};
use semver::VersionReq;
use serde::Deserialize;
use std::fmt;
use std::path::{Path, PathBuf};

/// Contents of `patchstack.toml`. Every key has a default.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub paths: Paths,
    pub baseline: BaselineSection,
    pub patches: PatchesSection,
    pub engine: EngineSection,
    pub fuzzy: FuzzySection,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct Paths {
    /// Decompiled vanilla sources
    pub vanilla: Option<PathBuf>,
    /// Vanilla resource tree, copied verbatim
    pub resources: Option<PathBuf>,
    /// Materialized baseline, the snapshot file patches diff against
    pub baseline: PathBuf,
    pub resources_out: Option<PathBuf>,
    /// File patch layer directory
    pub file_patches: PathBuf,
    /// Baseline with file patches applied
    pub file_patched: PathBuf,
    /// Commit patch layer directory
    pub feature_patches: PathBuf,
    /// File-patched tree with commits applied
    pub target: PathBuf,
    pub rejects: PathBuf,
    /// Project-level access transform override file
    pub access_transforms: Option<PathBuf>,
    /// Where the consolidated AT list is written
    pub merged_access_transforms: PathBuf,
}

impl Default for Paths {
    fn default() -> Self {
        Self {
            vanilla: None,
            resources: None,
            baseline: PathBuf::from("work/baseline"),
            resources_out: None,
            file_patches: PathBuf::from("patches/sources"),
            file_patched: PathBuf::from("work/patched"),
            feature_patches: PathBuf::from("patches/features"),
            target: PathBuf::from("work/final"),
            rejects: PathBuf::from("work/rejects"),
            access_transforms: None,
            merged_access_transforms: PathBuf::from("work/merged.at"),
        }
    }
}

impl Paths {
    /// Resolve relative paths against `base`.
    pub fn resolve(&mut self, base: &Path) {
        let join = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        for path in [
            &mut self.baseline,
            &mut self.file_patches,
            &mut self.file_patched,
            &mut self.feature_patches,
            &mut self.target,
            &mut self.rejects,
            &mut self.merged_access_transforms,
        ] {
            join(path);
        }
        for path in [
            &mut self.vanilla,
            &mut self.resources,
            &mut self.resources_out,
            &mut self.access_transforms,
        ]
        .into_iter()
        .flatten()
        {
            join(path);
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct BaselineSection {
    /// Vanilla version the baseline is materialized from
    pub version: Option<String>,
    /// Glob patterns selecting files; empty selects everything
    pub include: Vec<String>,
    pub exclude: Vec<String>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct PatchesSection {
    /// Baseline versions the patch layers were written for, e.g. `>=1.21, <1.22`
    pub version_range: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSection {
    pub context_lines: usize,
    /// Worker threads; 0 picks the number of CPUs
    pub workers: usize,
    pub normalize: bool,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            context_lines: 3,
            workers: 0,
            normalize: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default, deny_unknown_fields)]
pub struct FuzzySection {
    pub radius: usize,
    pub max_mismatches: usize,
    pub min_similarity: f64,
}

impl Default for FuzzySection {
    fn default() -> Self {
        Self {
            radius: 64,
            max_mismatches: 2,
            min_similarity: 0.75,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();

        let required = [
            ("paths.baseline", &self.paths.baseline),
            ("paths.file_patches", &self.paths.file_patches),
            ("paths.file_patched", &self.paths.file_patched),
            ("paths.feature_patches", &self.paths.feature_patches),
            ("paths.target", &self.paths.target),
            ("paths.rejects", &self.paths.rejects),
            (
                "paths.merged_access_transforms",
                &self.paths.merged_access_transforms,
            ),
        ];
        for (field, path) in required {
            if path.as_os_str().is_empty() {
                issues.push(ValidationIssue::MissingField { field });
            }
        }

        let trees = [
            ("paths.baseline", &self.paths.baseline),
            ("paths.file_patched", &self.paths.file_patched),
            ("paths.target", &self.paths.target),
        ];
        for (idx, (left, left_path)) in trees.iter().enumerate() {
            for (right, right_path) in &trees[idx + 1..] {
                if left_path == right_path && !left_path.as_os_str().is_empty() {
                    issues.push(ValidationIssue::InvalidCombo {
                        message: format!("{left} and {right} must be different directories"),
                    });
                }
            }
        }
        if self.paths.vanilla.as_ref() == Some(&self.paths.baseline) {
            issues.push(ValidationIssue::InvalidCombo {
                message: "paths.vanilla and paths.baseline must be different directories"
                    .to_string(),
            });
        }

        for pattern in self.baseline.include.iter().chain(&self.baseline.exclude) {
            if let Err(e) = glob::Pattern::new(pattern) {
                issues.push(ValidationIssue::InvalidValue {
                    field: "baseline.include/exclude",
                    message: format!("{pattern:?}: {e}"),
                });
            }
        }

        if let Some(version) = &self.baseline.version {
            if let Err(e) = parse_version(version) {
                issues.push(ValidationIssue::InvalidValue {
                    field: "baseline.version",
                    message: e.to_string(),
                });
            }
        }

        if let Some(range) = &self.patches.version_range {
            if let Err(e) = VersionReq::parse(range.trim()) {
                let error = VersionError::InvalidRequirement {
                    value: range.clone(),
                    source: e.to_string(),
                };
                issues.push(ValidationIssue::InvalidValue {
                    field: "patches.version_range",
                    message: error.to_string(),
                });
            }
        }

        let similarity = self.fuzzy.min_similarity;
        if !(similarity > 0.0 && similarity <= 1.0) {
            issues.push(ValidationIssue::InvalidValue {
                field: "fuzzy.min_similarity",
                message: format!("{similarity} is outside (0, 1]"),
            });
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone)]
pub enum ValidationIssue {
    MissingField {
        field: &'static str,
    },
    InvalidValue {
        field: &'static str,
        message: String,
    },
    InvalidCombo {
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { field } => {
                write!(f, "missing required field '{field}'")
            }
            ValidationIssue::InvalidValue { field, message } => {
                write!(f, "invalid value for '{field}': {message}")
            }
            ValidationIssue::InvalidCombo { message } => {
                write!(f, "invalid configuration: {message}")
            }
        }
    }
}
