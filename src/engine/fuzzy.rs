//! Offset-tolerant hunk location.

use crate::patch::{Hunk, HunkLine};
use serde::Serialize;

/// Tuning for fuzzy application.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FuzzyOptions {
    /// Lines searched on each side of the expected offset
    pub radius: usize,
    /// Context lines allowed to differ
    pub max_mismatches: usize,
    /// Minimum mean line similarity of an accepted candidate
    pub min_similarity: f64,
}

impl Default for FuzzyOptions {
    fn default() -> Self {
        Self {
            radius: 64,
            max_mismatches: 2,
            min_similarity: 0.75,
        }
    }
}

/// Where a hunk matched and how well.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Match {
    pub at: usize,
    pub similarity: f64,
}

/// Equal once leading and trailing whitespace is trimmed and inner runs of
/// whitespace are collapsed. Tokens are never merged: `int x` and `intx`
/// differ.
pub fn whitespace_equal(a: &str, b: &str) -> bool {
    a.split_whitespace().eq(b.split_whitespace())
}

fn collapse_whitespace(line: &str) -> String {
    line.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 1.0 for whitespace-equal lines, otherwise normalized Levenshtein
/// similarity of the whitespace-collapsed lines.
pub fn line_similarity(a: &str, b: &str) -> f64 {
    if whitespace_equal(a, b) {
        return 1.0;
    }
    strsim::normalized_levenshtein(&collapse_whitespace(a), &collapse_whitespace(b))
}

/// Score the hunk's original side against `buffer` starting at `at`.
fn score_at(buffer: &[String], hunk: &Hunk, at: usize, options: &FuzzyOptions) -> Option<f64> {
    let mut total = 0.0;
    let mut mismatches = 0;
    let mut count = 0usize;

    for (offset, line) in hunk.lines.iter().filter(|l| l.in_old()).enumerate() {
        let actual = buffer.get(at + offset)?;
        match line {
            HunkLine::Remove(expected) => {
                if !whitespace_equal(expected, actual) {
                    return None;
                }
                total += 1.0;
            }
            HunkLine::Context(expected) => {
                let similarity = line_similarity(expected, actual);
                if similarity < 1.0 {
                    mismatches += 1;
                    if mismatches > options.max_mismatches {
                        return None;
                    }
                }
                total += similarity;
            }
            HunkLine::Add(_) => {}
        }
        count += 1;
    }

    if count == 0 {
        return Some(1.0);
    }
    Some(total / count as f64)
}

/// Best position for `hunk` within `radius` of `expected`, never before `floor`.
///
/// The best candidate has the highest score, then the smallest distance to
/// `expected`, then the earliest offset.
pub fn find_match(
    buffer: &[String],
    hunk: &Hunk,
    expected: usize,
    floor: usize,
    options: &FuzzyOptions,
) -> Option<Match> {
    let old_len = hunk.old_len();
    if buffer.len() < old_len {
        return None;
    }
    let last = buffer.len() - old_len;

    if old_len == 0 {
        let at = expected.clamp(floor.min(last), last);
        return Some(Match {
            at,
            similarity: 1.0,
        });
    }

    let lo = expected.saturating_sub(options.radius).max(floor);
    let hi = expected.saturating_add(options.radius).min(last);
    if lo > hi {
        return None;
    }

    let mut best: Option<(Match, usize)> = None;
    for at in lo..=hi {
        let Some(score) = score_at(buffer, hunk, at, options) else {
            continue;
        };
        if score < options.min_similarity {
            continue;
        }
        let distance = at.abs_diff(expected);
        let better = match &best {
            None => true,
            Some((current, current_distance)) => {
                score > current.similarity
                    || (score == current.similarity && distance < *current_distance)
            }
        };
        if better {
            best = Some((
                Match {
                    at,
                    similarity: score,
                },
                distance,
            ));
        }
    }
    best.map(|(m, _)| m)
}
