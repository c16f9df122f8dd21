use crate::tree::MISSING_NEWLINE;
use serde::Serialize;

/// Intended existence state of the target once the patch is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileState {
    Created,
    Modified,
    Deleted,
}

/// Written after a body line that ends the file without a terminator.
pub const NO_NEWLINE_MARKER: &str = "\\ No newline at end of file";

/// One body line of a hunk, without its prefix character or line terminator.
///
/// A line that ends its file without a terminator keeps
/// [`MISSING_NEWLINE`](crate::tree::MISSING_NEWLINE) at the end of its text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "text", rename_all = "snake_case")]
pub enum HunkLine {
    Context(String),
    Add(String),
    Remove(String),
}

impl HunkLine {
    pub fn text(&self) -> &str {
        match self {
            HunkLine::Context(text) | HunkLine::Add(text) | HunkLine::Remove(text) => text,
        }
    }

    pub fn missing_newline(&self) -> bool {
        self.text().ends_with(MISSING_NEWLINE)
    }

    fn text_mut(&mut self) -> &mut String {
        match self {
            HunkLine::Context(text) | HunkLine::Add(text) | HunkLine::Remove(text) => text,
        }
    }

    pub(crate) fn mark_missing_newline(&mut self) {
        let text = self.text_mut();
        if !text.ends_with(MISSING_NEWLINE) {
            text.push(MISSING_NEWLINE);
        }
    }

    fn is_normalized(&self) -> bool {
        !self.text().ends_with(['\r', MISSING_NEWLINE])
    }

    fn normalize_ending(&mut self) {
        let text = self.text_mut();
        if text.ends_with(MISSING_NEWLINE) {
            text.pop();
        }
        if text.ends_with('\r') {
            text.pop();
        }
    }

    /// Whether the line exists in the original file.
    pub fn in_old(&self) -> bool {
        !matches!(self, HunkLine::Add(_))
    }

    /// Whether the line exists in the patched file.
    pub fn in_new(&self) -> bool {
        !matches!(self, HunkLine::Remove(_))
    }

    pub(crate) fn prefix(&self) -> char {
        match self {
            HunkLine::Context(_) => ' ',
            HunkLine::Add(_) => '+',
            HunkLine::Remove(_) => '-',
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Hunk {
    /// Start in the original file as written in the header: 1-based, or the
    /// line before the position when the original range is empty.
    pub old_start: usize,
    /// Start in the patched file. Recomputed on serialization.
    pub new_start: usize,
    /// Text after the closing `@@`, if any.
    pub section: Option<String>,
    pub lines: Vec<HunkLine>,
}

impl Hunk {
    /// Build a hunk from zero-based positions in the original and patched files.
    pub fn at(old_index: usize, new_index: usize, lines: Vec<HunkLine>) -> Self {
        let old_len = lines.iter().filter(|line| line.in_old()).count();
        let new_len = lines.iter().filter(|line| line.in_new()).count();
        Self {
            old_start: header_start(old_index, old_len),
            new_start: header_start(new_index, new_len),
            section: None,
            lines,
        }
    }

    pub fn old_len(&self) -> usize {
        self.lines.iter().filter(|line| line.in_old()).count()
    }

    pub fn new_len(&self) -> usize {
        self.lines.iter().filter(|line| line.in_new()).count()
    }

    /// Zero-based index of the first original line this hunk covers.
    pub fn old_index(&self) -> usize {
        if self.old_len() == 0 {
            self.old_start
        } else {
            self.old_start.saturating_sub(1)
        }
    }

    /// Lines the hunk expects in the original file (context and removed).
    pub fn old_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|line| line.in_old())
            .map(HunkLine::text)
    }

    /// Lines the hunk produces (context and added).
    pub fn new_lines(&self) -> impl Iterator<Item = &str> {
        self.lines
            .iter()
            .filter(|line| line.in_new())
            .map(HunkLine::text)
    }

    /// Net change in line count caused by this hunk.
    pub fn delta(&self) -> isize {
        self.new_len() as isize - self.old_len() as isize
    }
}

/// Converts a zero-based position into the unified-diff header convention.
pub(crate) fn header_start(index: usize, len: usize) -> usize {
    if len == 0 {
        index
    } else {
        index + 1
    }
}

/// Hunks for one target file plus the state the target ends up in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PatchFile {
    /// Target path relative to the tree root, `/`-separated.
    pub path: String,
    pub state: FileState,
    /// Free-form lines preceding the `---` header.
    pub preamble: Vec<String>,
    pub hunks: Vec<Hunk>,
}

impl PatchFile {
    pub fn new(path: impl Into<String>, state: FileState) -> Self {
        Self {
            path: path.into(),
            state,
            preamble: Vec::new(),
            hunks: Vec::new(),
        }
    }

    /// Whether no body line carries a `\r` or an end-of-file marker.
    pub fn has_normalized_endings(&self) -> bool {
        self.hunks
            .iter()
            .flat_map(|hunk| &hunk.lines)
            .all(HunkLine::is_normalized)
    }

    /// Strip `\r` and end-of-file markers from every body line, matching
    /// [`normalize`](crate::tree::normalize)d text.
    pub fn normalize_line_endings(&mut self) {
        for line in self.hunks.iter_mut().flat_map(|hunk| &mut hunk.lines) {
            line.normalize_ending();
        }
    }

    /// Recompute every hunk's `new_start` from its original position and the
    /// net delta of the hunks before it.
    pub fn recompute_new_starts(&mut self) {
        let mut delta: isize = 0;
        for hunk in &mut self.hunks {
            let new_index = (hunk.old_index() as isize + delta).max(0) as usize;
            hunk.new_start = header_start(new_index, hunk.new_len());
            delta += hunk.delta();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hunk_at_uses_header_convention() {
        let hunk = Hunk::at(
            0,
            0,
            vec![HunkLine::Add("a".to_string()), HunkLine::Add("b".to_string())],
        );
        assert_eq!(hunk.old_start, 0);
        assert_eq!(hunk.new_start, 1);
        assert_eq!(hunk.old_index(), 0);
        assert_eq!(hunk.delta(), 2);
    }

    #[test]
    fn test_normalize_line_endings() {
        let mut patch = PatchFile::new("F", FileState::Modified);
        patch.hunks.push(Hunk::at(
            0,
            0,
            vec![
                HunkLine::Remove("a\r".to_string()),
                HunkLine::Add("b\n".to_string()),
            ],
        ));
        assert!(!patch.has_normalized_endings());
        patch.normalize_line_endings();
        assert!(patch.has_normalized_endings());
        assert_eq!(patch.hunks[0].lines[0].text(), "a");
        assert_eq!(patch.hunks[0].lines[1].text(), "b");
    }

    #[test]
    fn test_recompute_new_starts_accumulates_delta() {
        let mut patch = PatchFile::new("Foo.java", FileState::Modified);
        patch.hunks.push(Hunk::at(
            1,
            1,
            vec![
                HunkLine::Context("a".to_string()),
                HunkLine::Add("x".to_string()),
                HunkLine::Add("y".to_string()),
            ],
        ));
        let mut second = Hunk::at(
            10,
            10,
            vec![
                HunkLine::Context("k".to_string()),
                HunkLine::Remove("l".to_string()),
            ],
        );
        second.new_start = 999;
        patch.hunks.push(second);

        patch.recompute_new_starts();
        assert_eq!(patch.hunks[0].new_start, 2);
        assert_eq!(patch.hunks[1].new_start, 13);
    }
}
