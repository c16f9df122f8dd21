//! Commit patch files in `git format-patch` layout.

use crate::patch::{parse_section_until, split_patch_lines, write_section, ParseError, PatchFile};
use crate::safety::lexical_target;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

const FROM_LINE: &str = "From 0000000000000000000000000000000000000000 Mon Sep 17 00:00:00 2001";
const DIFF_PREFIX: &str = "diff --git ";
const SIGNATURE: &str = "-- ";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl Author {
    /// Parse `Name <email>`; text without an address is all name.
    pub fn parse(text: &str) -> Self {
        let text = text.trim();
        match (text.rfind('<'), text.rfind('>')) {
            (Some(open), Some(close)) if open < close => Author {
                name: text[..open].trim().to_string(),
                email: text[open + 1..close].trim().to_string(),
            },
            _ => Author {
                name: text.to_string(),
                email: String::new(),
            },
        }
    }
}

impl fmt::Display for Author {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Everything about a commit except its diffs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMeta {
    pub author: Author,
    /// RFC 2822 date, kept verbatim
    pub date: String,
    pub subject: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub body: String,
}

impl CommitMeta {
    /// Metadata stamped with the current local time.
    pub fn now(author: Author, subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            author,
            date: chrono::Local::now().to_rfc2822(),
            subject: subject.into(),
            body: body.into(),
        }
    }

    pub fn timestamp(&self) -> Option<chrono::DateTime<chrono::FixedOffset>> {
        chrono::DateTime::parse_from_rfc2822(&self.date).ok()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub meta: CommitMeta,
    pub files: Vec<PatchFile>,
}

/// Lowercase, dash-separated subject for file names.
pub fn slug(subject: &str) -> String {
    let mut out = String::new();
    for c in subject.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
        if out.len() >= 52 {
            break;
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "commit".to_string()
    } else {
        trimmed.to_string()
    }
}

/// `NNNN-<slug>.patch` for the 1-based position in the series.
pub fn commit_file_name(position: usize, subject: &str) -> String {
    format!("{position:04}-{}.patch", slug(subject))
}

pub fn serialize_commit(commit: &Commit) -> String {
    let mut out = String::new();
    out.push_str(FROM_LINE);
    out.push('\n');
    out.push_str(&format!("From: {}\n", commit.meta.author));
    out.push_str(&format!("Date: {}\n", commit.meta.date));
    out.push_str(&format!("Subject: [PATCH] {}\n", commit.meta.subject));
    out.push('\n');

    let body = commit.meta.body.trim();
    if !body.is_empty() {
        out.push_str(body);
        out.push_str("\n\n");
    }

    for file in &commit.files {
        out.push_str(&format!("{DIFF_PREFIX}a/{0} b/{0}\n", file.path));
        write_section(&mut out, file);
    }
    out
}

pub fn parse_commit(bytes: &[u8]) -> Result<Commit, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::NotUtf8)?;
    parse_commit_str(text)
}

pub fn parse_commit_str(text: &str) -> Result<Commit, ParseError> {
    let lines = split_patch_lines(text);
    if !lines.first().is_some_and(|line| line.starts_with("From ")) {
        return Err(ParseError::at(1, "expected 'From <hash> <date>' line"));
    }

    let mut author = None;
    let mut date = None;
    let mut subject: Option<String> = None;
    let mut idx = 1;
    while idx < lines.len() && !lines[idx].trim().is_empty() {
        let line = lines[idx].trim_end_matches('\r');
        if let Some(value) = line.strip_prefix("From: ") {
            author = Some(Author::parse(value));
        } else if let Some(value) = line.strip_prefix("Date: ") {
            date = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("Subject: ") {
            subject = Some(strip_patch_tag(value).to_string());
        } else if line.starts_with([' ', '\t']) {
            // Folded header continuation; only the subject is ever folded.
            if let Some(subject) = subject.as_mut() {
                subject.push(' ');
                subject.push_str(line.trim());
            }
        }
        idx += 1;
    }

    let author = author.ok_or_else(|| ParseError::at(idx, "missing 'From:' header"))?;
    let date = date.ok_or_else(|| ParseError::at(idx, "missing 'Date:' header"))?;
    let subject = subject.ok_or_else(|| ParseError::at(idx, "missing 'Subject:' header"))?;

    let first_diff = lines[idx..]
        .iter()
        .position(|line| line.starts_with(DIFF_PREFIX))
        .map(|pos| idx + pos);
    let body_end = first_diff.unwrap_or(lines.len());
    let body_lines: Vec<&str> = lines[idx..body_end]
        .iter()
        .map(|line| line.trim_end_matches('\r'))
        .collect();
    let body_lines = match diffstat_start(&body_lines) {
        Some(stat) => &body_lines[..stat],
        None => &body_lines[..],
    };
    let body = body_lines.join("\n").trim().to_string();

    let mut files = Vec::new();
    let mut seen = BTreeSet::new();
    let mut start = first_diff;
    while let Some(section_start) = start {
        let next = lines[section_start + 1..]
            .iter()
            .position(|line| line.starts_with(DIFF_PREFIX))
            .map(|pos| section_start + 1 + pos);
        let section_end = next.unwrap_or(lines.len());

        let header = lines[section_start + 1..section_end]
            .iter()
            .position(|line| line.starts_with("--- "))
            .map(|pos| section_start + 1 + pos)
            .ok_or_else(|| {
                ParseError::at(section_start + 1, "diff section without a unified diff")
            })?;
        let (mut file, consumed) =
            parse_section_until(&lines[header..section_end], header + 1, is_trailer)?;
        file.path = lexical_target(&file.path);
        if !seen.insert(file.path.clone()) {
            return Err(ParseError::at(
                section_start + 1,
                format!("{} appears twice in one commit", file.path),
            ));
        }
        files.push(file);

        let rest = &lines[header + consumed..section_end];
        match rest.iter().position(|line| !line.trim().is_empty()) {
            // Everything from the signature on is the trailer.
            Some(pos) if rest[pos].trim_end_matches('\r') == SIGNATURE => break,
            Some(pos) => {
                return Err(ParseError::at(
                    header + consumed + pos + 1,
                    format!("expected hunk header, found {:?}", rest[pos]),
                ))
            }
            None => start = next,
        }
    }

    Ok(Commit {
        meta: CommitMeta {
            author,
            date,
            subject,
            body,
        },
        files,
    })
}

/// Blank lines and the signature end the hunks of a section.
fn is_trailer(line: &str) -> bool {
    let line = line.trim_end_matches('\r');
    line.trim().is_empty() || line == SIGNATURE
}

/// Index of a `---` line that introduces a diffstat, so that a `---` rule
/// inside the message itself stays part of the body.
fn diffstat_start(body: &[&str]) -> Option<usize> {
    body.iter().enumerate().find_map(|(pos, line)| {
        let stat: Vec<&str> = body[pos + 1..]
            .iter()
            .copied()
            .filter(|line| !line.trim().is_empty())
            .collect();
        let recognized = *line == "---"
            && stat.iter().all(|line| is_diffstat_line(line))
            && stat.iter().any(|line| is_diffstat_summary(line));
        recognized.then_some(pos)
    })
}

fn is_diffstat_line(line: &str) -> bool {
    let Some(entry) = line.strip_prefix(' ') else {
        return false;
    };
    let entry = entry.trim_start();
    is_diffstat_summary(line)
        || entry.starts_with("create mode ")
        || entry.starts_with("delete mode ")
        || entry.starts_with("rename ")
        || entry.starts_with("mode change ")
        || entry.split_once(" | ").is_some_and(|(path, change)| {
            !path.trim().is_empty()
                && (change.starts_with("Bin")
                    || change
                        .split_whitespace()
                        .next()
                        .is_some_and(|count| count.parse::<usize>().is_ok()))
        })
}

/// ` 2 files changed, 5 insertions(+), 1 deletion(-)`
fn is_diffstat_summary(line: &str) -> bool {
    let mut words = line.split_whitespace();
    words.next().is_some_and(|count| count.parse::<usize>().is_ok())
        && matches!(words.next(), Some("file" | "files"))
        && matches!(words.next(), Some("changed" | "changed,"))
}

fn strip_patch_tag(subject: &str) -> &str {
    let subject = subject.trim();
    if subject.starts_with("[PATCH") {
        if let Some(end) = subject.find(']') {
            return subject[end + 1..].trim_start();
        }
    }
    subject
}
