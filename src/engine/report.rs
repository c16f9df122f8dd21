//! Run reports for the file patch engine.

use crate::error::{PatchStackError, Result};
use crate::patch::Hunk;
use crate::tree::atomic_write;
use serde::Serialize;
use std::path::Path;

/// A hunk that applied away from its recorded position or with drifted context.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FuzzedHunk {
    pub index: usize,
    /// Lines between the expected and the actual position
    pub offset: isize,
    pub similarity: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RejectedHunk {
    pub index: usize,
    pub reason: String,
    pub hunk: Hunk,
}

/// Outcome of one patch file.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ApplyResult {
    Applied {
        #[serde(skip_serializing_if = "Vec::is_empty")]
        fuzzed: Vec<FuzzedHunk>,
    },
    Rejected {
        reason: String,
        hunks: Vec<RejectedHunk>,
    },
    Malformed {
        reason: String,
    },
    /// The run was cancelled before this patch was reached
    Pending,
}

impl ApplyResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyResult::Applied { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileOutcome {
    /// Patch file name within the layer
    pub patch: String,
    /// Target path, when the patch could be parsed
    pub target: Option<String>,
    pub result: ApplyResult,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ApplyReport {
    pub outcomes: Vec<FileOutcome>,
    pub cancelled: bool,
}

impl ApplyReport {
    fn count(&self, pred: impl Fn(&ApplyResult) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.result)).count()
    }

    pub fn applied(&self) -> usize {
        self.count(ApplyResult::is_applied)
    }

    pub fn fuzzed(&self) -> usize {
        self.count(|r| matches!(r, ApplyResult::Applied { fuzzed } if !fuzzed.is_empty()))
    }

    pub fn rejected(&self) -> usize {
        self.count(|r| matches!(r, ApplyResult::Rejected { .. }))
    }

    pub fn malformed(&self) -> usize {
        self.count(|r| matches!(r, ApplyResult::Malformed { .. }))
    }

    pub fn pending(&self) -> usize {
        self.count(|r| matches!(r, ApplyResult::Pending))
    }

    /// Every patch applied and the run was not cancelled.
    pub fn is_success(&self) -> bool {
        !self.cancelled && self.applied() == self.outcomes.len()
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RebuildReport {
    /// Patch files whose bytes changed
    pub written: Vec<String>,
    pub unchanged: usize,
    /// Stale patch files deleted
    pub removed: Vec<String>,
    /// Non-text files left out of the layer
    pub skipped_binary: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct FixupReport {
    pub rewritten: Vec<String>,
    pub removed: Vec<String>,
    pub untouched: usize,
    /// Recorded patches that no longer reproduced their recorded state
    pub broken: Vec<String>,
    pub skipped_binary: Vec<String>,
}

/// Write any report as pretty JSON.
pub fn write_json<T: Serialize>(report: &T, path: &Path) -> Result<()> {
    let mut json = serde_json::to_vec_pretty(report)
        .map_err(|e| PatchStackError::io(path, std::io::Error::other(e)))?;
    json.push(b'\n');
    atomic_write(path, &json)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(result: ApplyResult) -> FileOutcome {
        FileOutcome {
            patch: "A.java.patch".to_string(),
            target: Some("A.java".to_string()),
            result,
        }
    }

    #[test]
    fn test_counts_and_success() {
        let report = ApplyReport {
            outcomes: vec![
                outcome(ApplyResult::Applied { fuzzed: vec![] }),
                outcome(ApplyResult::Malformed {
                    reason: "bad".to_string(),
                }),
                outcome(ApplyResult::Pending),
            ],
            cancelled: true,
        };
        assert_eq!(report.applied(), 1);
        assert_eq!(report.malformed(), 1);
        assert_eq!(report.pending(), 1);
        assert!(!report.is_success());
        assert!(ApplyReport::default().is_success());
    }

    #[test]
    fn test_json_uses_status_tag() {
        let json = serde_json::to_string(&outcome(ApplyResult::Pending)).unwrap();
        assert!(json.contains(r#""status":"pending""#));

        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("report.json");
        write_json(&ApplyReport::default(), &path).unwrap();
        let value: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(value["cancelled"], false);
    }
}
