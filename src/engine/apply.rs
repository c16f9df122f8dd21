//! Applying one patch to one file's content.
//!
//! Hunks are applied to a single buffer in order, so each hunk's expected
//! position is its recorded original position plus the displacement that
//! earlier hunks introduced.

use super::fuzzy::{self, FuzzyOptions};
use super::report::{FuzzedHunk, RejectedHunk};
use crate::patch::{FileState, Hunk, HunkLine, PatchFile};
use crate::tree::{join_lines, split_lines};

/// A successfully applied patch.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    /// New content; `None` when the patch deletes the file
    pub content: Option<String>,
    pub fuzzed: Vec<FuzzedHunk>,
}

/// Why a patch did not apply. Nothing was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Rejection {
    pub reason: String,
    pub hunks: Vec<RejectedHunk>,
}

impl Rejection {
    /// A failure of the file as a whole; every hunk is carried into the reject.
    fn whole_file(patch: &PatchFile, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Rejection {
            hunks: patch
                .hunks
                .iter()
                .enumerate()
                .map(|(index, hunk)| RejectedHunk {
                    index,
                    reason: reason.clone(),
                    hunk: hunk.clone(),
                })
                .collect(),
            reason,
        }
    }
}

/// Apply `patch` to `current` (`None` when the target does not exist).
///
/// Without `fuzzy` every hunk must match exactly at its expected offset.
/// All hunks are checked even after a failure so the rejection lists each
/// one that did not match.
pub fn apply_patch(
    current: Option<&str>,
    patch: &PatchFile,
    fuzzy: Option<&FuzzyOptions>,
) -> Result<Applied, Rejection> {
    let mut buffer = match (patch.state, current) {
        (FileState::Created, Some(_)) => {
            return Err(Rejection::whole_file(patch, "target already exists"));
        }
        (FileState::Created, None) => Vec::new(),
        (_, None) => return Err(Rejection::whole_file(patch, "target does not exist")),
        (_, Some(text)) => split_lines(text),
    };

    let mut delta: isize = 0;
    let mut floor = 0usize;
    let mut failures = Vec::new();
    let mut fuzzed = Vec::new();

    for (index, hunk) in patch.hunks.iter().enumerate() {
        let expected_signed = hunk.old_index() as isize + delta;
        let located = if expected_signed < 0 {
            Err("hunk starts before the beginning of the file".to_string())
        } else {
            let expected = expected_signed as usize;
            let exact = match_exact(&buffer, hunk, expected).map(|()| (expected, 1.0, false));
            match fuzzy {
                Some(options) if exact.is_err() => {
                    fuzzy::find_match(&buffer, hunk, expected, floor, options)
                        .map(|m| (m.at, m.similarity, true))
                        .ok_or_else(|| {
                            format!(
                                "no match within {} lines of line {}",
                                options.radius,
                                expected + 1
                            )
                        })
                }
                _ => exact,
            }
        };

        match located {
            Ok((at, similarity, was_fuzzed)) => {
                let offset = at as isize - expected_signed;
                if was_fuzzed {
                    fuzzed.push(FuzzedHunk {
                        index,
                        offset,
                        similarity,
                    });
                }
                splice(&mut buffer, at, hunk);
                let new_len = hunk.new_len();
                delta = (at + new_len) as isize - (hunk.old_index() + hunk.old_len()) as isize;
                floor = at + new_len;
            }
            Err(reason) => failures.push(RejectedHunk {
                index,
                reason,
                hunk: hunk.clone(),
            }),
        }
    }

    if !failures.is_empty() {
        return Err(Rejection {
            reason: format!(
                "{} of {} hunks failed",
                failures.len(),
                patch.hunks.len()
            ),
            hunks: failures,
        });
    }

    if patch.state == FileState::Deleted {
        if !buffer.is_empty() {
            return Err(Rejection::whole_file(
                patch,
                format!(
                    "deletion leaves {} unmatched lines",
                    buffer.len()
                ),
            ));
        }
        return Ok(Applied {
            content: None,
            fuzzed,
        });
    }

    Ok(Applied {
        content: Some(join_lines(&buffer)),
        fuzzed,
    })
}

fn match_exact(buffer: &[String], hunk: &Hunk, at: usize) -> Result<(), String> {
    let old_len = hunk.old_len();
    if at + old_len > buffer.len() {
        return Err(format!(
            "hunk needs lines {}..{} but the file has {}",
            at + 1,
            at + old_len,
            buffer.len()
        ));
    }
    for (offset, expected) in hunk.old_lines().enumerate() {
        let actual = &buffer[at + offset];
        if actual != expected {
            return Err(format!(
                "line {}: expected {:?}, found {:?}",
                at + offset + 1,
                expected,
                actual
            ));
        }
    }
    Ok(())
}

/// Replace the hunk's original side at `at`, keeping the buffer's own
/// context lines.
fn splice(buffer: &mut Vec<String>, at: usize, hunk: &Hunk) {
    let old_len = hunk.old_len();
    let mut replacement = Vec::with_capacity(hunk.new_len());
    let mut cursor = at;
    for line in &hunk.lines {
        match line {
            HunkLine::Context(_) => {
                replacement.push(buffer[cursor].clone());
                cursor += 1;
            }
            HunkLine::Remove(_) => cursor += 1,
            HunkLine::Add(text) => replacement.push(text.clone()),
        }
    }
    buffer.splice(at..at + old_len, replacement);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::parse_str;

    const BASE: &str = "one\ntwo\nthree\nfour\nfive\nsix\nseven\neight\nnine\nten\n";

    #[test]
    fn test_strict_apply_multiple_hunks() {
        let patch = parse_str(
            "--- a/f.txt\n+++ b/f.txt\n@@ -1,2 +1,3 @@\n one\n+one and a half\n two\n@@ -9,2 +10,1 @@\n nine\n-ten\n",
        )
        .unwrap();
        let applied = apply_patch(Some(BASE), &patch, None).unwrap();
        let content = applied.content.unwrap();
        assert!(content.starts_with("one\none and a half\ntwo\n"));
        assert!(content.ends_with("nine\n"));
        assert!(applied.fuzzed.is_empty());
    }

    #[test]
    fn test_strict_reports_every_failing_hunk() {
        let patch = parse_str(
            "--- a/f.txt\n+++ b/f.txt\n@@ -2 +2 @@\n-TWO\n+2\n@@ -4 +4 @@\n-four\n+4\n@@ -6 +6 @@\n-SIX\n+6\n",
        )
        .unwrap();
        let rejection = apply_patch(Some(BASE), &patch, None).unwrap_err();
        let indices: Vec<usize> = rejection.hunks.iter().map(|h| h.index).collect();
        assert_eq!(indices, vec![0, 2]);
        assert_eq!(rejection.reason, "2 of 3 hunks failed");
    }

    #[test]
    fn test_fuzzy_applies_shifted_hunk() {
        let shifted = format!("header\nheader\n{BASE}");
        let patch =
            parse_str("--- a/f.txt\n+++ b/f.txt\n@@ -3,3 +3,3 @@\n three\n-four\n+FOUR\n five\n")
                .unwrap();
        assert!(apply_patch(Some(&shifted), &patch, None).is_err());

        let applied = apply_patch(Some(&shifted), &patch, Some(&FuzzyOptions::default())).unwrap();
        assert!(applied.content.unwrap().contains("three\nFOUR\nfive\n"));
        assert_eq!(applied.fuzzed.len(), 1);
        assert_eq!(applied.fuzzed[0].offset, 2);
    }

    #[test]
    fn test_fuzzy_keeps_file_context_lines() {
        let drifted = BASE.replace("three", "three // note");
        let patch =
            parse_str("--- a/f.txt\n+++ b/f.txt\n@@ -3,3 +3,3 @@\n three\n-four\n+FOUR\n five\n")
                .unwrap();
        let options = FuzzyOptions {
            min_similarity: 0.5,
            ..Default::default()
        };
        let applied = apply_patch(Some(&drifted), &patch, Some(&options)).unwrap();
        assert!(applied
            .content
            .unwrap()
            .contains("three // note\nFOUR\nfive\n"));
        assert!(applied.fuzzed[0].similarity < 1.0);
    }

    #[test]
    fn test_created_and_deleted_states() {
        let create = parse_str("--- /dev/null\n+++ b/new.txt\n@@ -0,0 +1,2 @@\n+a\n+b\n").unwrap();
        assert_eq!(
            apply_patch(None, &create, None).unwrap().content.as_deref(),
            Some("a\nb\n")
        );
        let existing = apply_patch(Some("x\n"), &create, None).unwrap_err();
        assert_eq!(existing.reason, "target already exists");
        assert_eq!(existing.hunks.len(), 1);

        let delete = parse_str("--- a/old.txt\n+++ /dev/null\n@@ -1,2 +0,0 @@\n-a\n-b\n").unwrap();
        assert_eq!(apply_patch(Some("a\nb\n"), &delete, None).unwrap().content, None);
        assert!(apply_patch(Some("a\nb\nc\n"), &delete, None).is_err());
        assert!(apply_patch(None, &delete, None).is_err());
    }
}
