use super::model::{header_start, FileState, PatchFile, NO_NEWLINE_MARKER};
use crate::tree::MISSING_NEWLINE;

/// Serialize a patch, recomputing every hunk header from the hunk bodies.
pub fn serialize(patch: &PatchFile) -> String {
    let mut out = String::new();
    for line in &patch.preamble {
        out.push_str(line);
        out.push('\n');
    }
    write_section(&mut out, patch);
    out
}

/// Append the `---`/`+++` headers and hunks of `patch` (no preamble).
pub(crate) fn write_section(out: &mut String, patch: &PatchFile) {
    let old = match patch.state {
        FileState::Created => "/dev/null".to_string(),
        _ => format!("a/{}", patch.path),
    };
    let new = match patch.state {
        FileState::Deleted => "/dev/null".to_string(),
        _ => format!("b/{}", patch.path),
    };
    out.push_str(&format!("--- {old}\n+++ {new}\n"));

    let mut delta: isize = 0;
    for hunk in &patch.hunks {
        let old_len = hunk.old_len();
        let new_len = hunk.new_len();
        let new_index = (hunk.old_index() as isize + delta).max(0) as usize;
        let new_start = header_start(new_index, new_len);

        out.push_str(&format!(
            "@@ -{} +{} @@",
            range(hunk.old_start, old_len),
            range(new_start, new_len)
        ));
        if let Some(section) = &hunk.section {
            out.push(' ');
            out.push_str(section);
        }
        out.push('\n');

        for line in &hunk.lines {
            out.push(line.prefix());
            match line.text().strip_suffix(MISSING_NEWLINE) {
                Some(text) => {
                    out.push_str(text);
                    out.push('\n');
                    out.push_str(NO_NEWLINE_MARKER);
                }
                None => out.push_str(line.text()),
            }
            out.push('\n');
        }
        delta += new_len as isize - old_len as isize;
    }
}

fn range(start: usize, len: usize) -> String {
    if len == 1 {
        start.to_string()
    } else {
        format!("{start},{len}")
    }
}
