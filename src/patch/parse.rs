use super::model::{FileState, Hunk, HunkLine, PatchFile};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Malformed { line: usize, message: String },

    #[error("patch is not valid UTF-8")]
    NotUtf8,
}

impl ParseError {
    pub(crate) fn at(line: usize, message: impl Into<String>) -> Self {
        ParseError::Malformed {
            line,
            message: message.into(),
        }
    }
}

/// Parse a single-file patch.
pub fn parse(bytes: &[u8]) -> Result<PatchFile, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    parse_str(text)
}

/// Parse a single-file patch from text.
///
/// Lines before the `---` header become the preamble.
pub fn parse_str(text: &str) -> Result<PatchFile, ParseError> {
    let lines = split_patch_lines(text);
    let Some(start) = lines.iter().position(|line| line.starts_with("--- ")) else {
        return Err(ParseError::at(lines.len().max(1), "missing '---' header"));
    };

    let mut patch = parse_section(&lines[start..], start + 1)?;
    patch.preamble = lines[..start].iter().map(|line| line.to_string()).collect();
    Ok(patch)
}

/// Split on `\n` only; a `\r` before it belongs to the line's content.
pub(crate) fn split_patch_lines(text: &str) -> Vec<&str> {
    text.split_inclusive('\n')
        .map(|line| line.strip_suffix('\n').unwrap_or(line))
        .collect()
}

/// Parse one file section: `---`/`+++` headers followed by hunks.
///
/// `first_line` is the 1-based number of `lines[0]` in the enclosing
/// document, used for error positions.
pub(crate) fn parse_section(lines: &[&str], first_line: usize) -> Result<PatchFile, ParseError> {
    parse_section_until(lines, first_line, |_| false).map(|(patch, _)| patch)
}

/// Like [`parse_section`], but stops at the first line between hunks for
/// which `is_trailer` holds. Also returns how many lines were consumed.
///
/// Trailers are only recognized between hunks, so a body line that happens
/// to look like one is still read as part of its hunk.
pub(crate) fn parse_section_until(
    lines: &[&str],
    first_line: usize,
    is_trailer: impl Fn(&str) -> bool,
) -> Result<(PatchFile, usize), ParseError> {
    let line_no = |idx: usize| first_line + idx;

    let old_header = lines
        .first()
        .and_then(|line| line.strip_prefix("--- "))
        .ok_or_else(|| ParseError::at(line_no(0), "expected '---' header"))?;
    let new_header = lines
        .get(1)
        .and_then(|line| line.strip_prefix("+++ "))
        .ok_or_else(|| ParseError::at(line_no(1), "expected '+++' header"))?;

    let old_path = header_path(old_header, "a/");
    let new_path = header_path(new_header, "b/");
    let (path, state) = match (old_path, new_path) {
        (None, Some(new)) => (new, FileState::Created),
        (Some(old), None) => (old, FileState::Deleted),
        (Some(old), Some(new)) if old == new => (new, FileState::Modified),
        (Some(old), Some(new)) => {
            return Err(ParseError::at(
                line_no(1),
                format!("renames are not supported ({old} -> {new})"),
            ))
        }
        (None, None) => {
            return Err(ParseError::at(
                line_no(1),
                "both headers point at /dev/null",
            ))
        }
    };

    let mut patch = PatchFile::new(path, state);
    let mut idx = 2;
    let mut prev_old_end = 0usize;

    while idx < lines.len() {
        if lines[idx..].iter().all(|line| line.trim().is_empty()) {
            break;
        }
        if is_trailer(lines[idx]) {
            break;
        }

        let header_line = lines[idx];
        let Some(header) = parse_hunk_header(header_line) else {
            if is_body_line(header_line) {
                return Err(ParseError::at(
                    line_no(idx),
                    "hunk body is longer than its header declares",
                ));
            }
            return Err(ParseError::at(
                line_no(idx),
                format!("expected hunk header, found {header_line:?}"),
            ));
        };
        let header_no = line_no(idx);
        idx += 1;

        let mut body: Vec<HunkLine> = Vec::new();
        let (mut old_seen, mut new_seen) = (0usize, 0usize);
        while old_seen < header.old_len || new_seen < header.new_len {
            let Some(&line) = lines.get(idx) else {
                return Err(short_body(header_no, &header, old_seen, new_seen));
            };
            if line.starts_with("@@") {
                return Err(short_body(header_no, &header, old_seen, new_seen));
            }
            idx += 1;
            if line.starts_with('\\') {
                if let Some(last) = body.last_mut() {
                    last.mark_missing_newline();
                }
                continue;
            }

            let parsed = match line.chars().next() {
                None => HunkLine::Context(String::new()),
                Some(' ') => HunkLine::Context(line[1..].to_string()),
                Some('-') => HunkLine::Remove(line[1..].to_string()),
                Some('+') => HunkLine::Add(line[1..].to_string()),
                Some(other) => {
                    return Err(ParseError::at(
                        line_no(idx - 1),
                        format!("invalid hunk line prefix {other:?}"),
                    ))
                }
            };
            if parsed.in_old() {
                old_seen += 1;
            }
            if parsed.in_new() {
                new_seen += 1;
            }
            if old_seen > header.old_len || new_seen > header.new_len {
                return Err(ParseError::at(
                    line_no(idx - 1),
                    format!(
                        "hunk body is longer than its header declares (-{} +{})",
                        header.old_len, header.new_len
                    ),
                ));
            }
            body.push(parsed);
        }
        while lines.get(idx).is_some_and(|line| line.starts_with('\\')) {
            if let Some(last) = body.last_mut() {
                last.mark_missing_newline();
            }
            idx += 1;
        }

        if body.is_empty() {
            return Err(ParseError::at(header_no, "empty hunk"));
        }

        let hunk = Hunk {
            old_start: header.old_start,
            new_start: header.new_start,
            section: header.section,
            lines: body,
        };

        match state {
            FileState::Created if hunk.old_len() > 0 => {
                return Err(ParseError::at(
                    header_no,
                    "created file hunk references original lines",
                ))
            }
            FileState::Deleted if hunk.new_len() > 0 => {
                return Err(ParseError::at(
                    header_no,
                    "deleted file hunk produces new lines",
                ))
            }
            _ => {}
        }

        if hunk.old_index() < prev_old_end {
            return Err(ParseError::at(
                header_no,
                "hunks overlap or are out of order",
            ));
        }
        prev_old_end = hunk.old_index() + hunk.old_len();
        patch.hunks.push(hunk);
    }

    Ok((patch, idx))
}

struct HunkHeader {
    old_start: usize,
    old_len: usize,
    new_start: usize,
    new_len: usize,
    section: Option<String>,
}

fn short_body(header_no: usize, header: &HunkHeader, old_seen: usize, new_seen: usize) -> ParseError {
    ParseError::at(
        header_no,
        format!(
            "hunk body is shorter than its header declares (-{} +{}, found -{} +{})",
            header.old_len, header.new_len, old_seen, new_seen
        ),
    )
}

fn is_body_line(line: &str) -> bool {
    line.starts_with(' ') || line.starts_with('+') || line.starts_with('-')
}

/// `@@ -a[,b] +c[,d] @@[ section]`
fn parse_hunk_header(line: &str) -> Option<HunkHeader> {
    let rest = line.strip_prefix("@@ -")?;
    let (ranges, tail) = rest.split_once(" @@")?;
    let (old, new) = ranges.split_once(" +")?;
    let (old_start, old_len) = parse_range(old)?;
    let (new_start, new_len) = parse_range(new)?;
    let section = match tail.trim_end_matches('\r') {
        "" => None,
        tail => Some(tail.strip_prefix(' ').unwrap_or(tail).to_string()),
    };
    Some(HunkHeader {
        old_start,
        old_len,
        new_start,
        new_len,
        section,
    })
}

fn parse_range(range: &str) -> Option<(usize, usize)> {
    match range.split_once(',') {
        Some((start, len)) => Some((start.parse().ok()?, len.parse().ok()?)),
        None => Some((range.parse().ok()?, 1)),
    }
}

/// Header path with an optional trailing timestamp and `a/`/`b/` prefix removed.
fn header_path(header: &str, prefix: &str) -> Option<String> {
    let path = header.split('\t').next().unwrap_or(header).trim_end();
    if path == "/dev/null" {
        return None;
    }
    Some(path.strip_prefix(prefix).unwrap_or(path).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_modified_file() {
        let text = "--- a/net/Foo.java\n+++ b/net/Foo.java\n@@ -1,3 +1,3 @@ class Foo\n A\n-B\n+B2\n C\n";
        let patch = parse_str(text).unwrap();
        assert_eq!(patch.path, "net/Foo.java");
        assert_eq!(patch.state, FileState::Modified);
        assert_eq!(patch.hunks.len(), 1);
        assert_eq!(patch.hunks[0].section.as_deref(), Some("class Foo"));
        assert_eq!(patch.hunks[0].old_len(), 3);
        assert_eq!(patch.hunks[0].new_len(), 3);
    }

    #[test]
    fn test_parse_created_and_deleted() {
        let created = parse_str("--- /dev/null\n+++ b/New.java\n@@ -0,0 +1,2 @@\n+a\n+b\n").unwrap();
        assert_eq!(created.state, FileState::Created);
        assert_eq!(created.path, "New.java");

        let deleted = parse_str("--- a/Old.java\n+++ /dev/null\n@@ -1 +0,0 @@\n-a\n").unwrap();
        assert_eq!(deleted.state, FileState::Deleted);
        assert_eq!(deleted.hunks[0].old_len(), 1);
    }

    #[test]
    fn test_parse_keeps_preamble() {
        let text = "== AT ==\npublic net.Foo bar\n\n--- a/net/Foo.java\n+++ b/net/Foo.java\n@@ -1 +1 @@\n-x\n+y\n";
        let patch = parse_str(text).unwrap();
        assert_eq!(patch.preamble, vec!["== AT ==", "public net.Foo bar", ""]);
    }

    #[test]
    fn test_short_body_is_malformed() {
        let text = "--- a/F\n+++ b/F\n@@ -1,3 +1,3 @@\n A\n-B\n+B2\n";
        let err = parse_str(text).unwrap_err();
        assert!(matches!(err, ParseError::Malformed { line: 3, .. }), "{err}");
    }

    #[test]
    fn test_long_body_is_malformed() {
        let text = "--- a/F\n+++ b/F\n@@ -1 +1 @@\n-B\n+B2\n C\n";
        let err = parse_str(text).unwrap_err();
        assert!(err.to_string().contains("longer"), "{err}");
    }

    #[test]
    fn test_out_of_order_hunks_are_malformed() {
        let text = "--- a/F\n+++ b/F\n@@ -5 +5 @@\n-x\n+y\n@@ -2 +2 @@\n-a\n+b\n";
        let err = parse_str(text).unwrap_err();
        assert!(err.to_string().contains("out of order"), "{err}");
    }

    #[test]
    fn test_blank_body_line_is_empty_context() {
        let text = "--- a/F\n+++ b/F\n@@ -1,3 +1,3 @@\n a\n\n-b\n+c\n";
        let patch = parse_str(text).unwrap();
        assert_eq!(patch.hunks[0].lines[1], HunkLine::Context(String::new()));
    }

    #[test]
    fn test_no_newline_marker_flags_the_line_before_it() {
        let text = "--- a/F\n+++ b/F\n@@ -1 +1 @@\n-a\n\\ No newline at end of file\n+b\n";
        let patch = parse_str(text).unwrap();
        assert_eq!(patch.hunks[0].lines.len(), 2);
        assert!(patch.hunks[0].lines[0].missing_newline());
        assert!(!patch.hunks[0].lines[1].missing_newline());
        assert_eq!(patch.hunks[0].lines[0].text(), "a\n");
    }

    #[test]
    fn test_carriage_returns_stay_in_body_lines() {
        let text = "--- a/F\r\n+++ b/F\r\n@@ -1 +1 @@\r\n-a\r\n+b\r\n";
        let patch = parse_str(text).unwrap();
        assert_eq!(patch.path, "F");
        assert_eq!(patch.hunks[0].section, None);
        assert_eq!(patch.hunks[0].lines[0], HunkLine::Remove("a\r".to_string()));
    }

    #[test]
    fn test_missing_header() {
        assert!(matches!(
            parse_str("just text\n"),
            Err(ParseError::Malformed { .. })
        ));
        assert_eq!(parse(&[0xff, 0xfe]), Err(ParseError::NotUtf8));
    }
}
