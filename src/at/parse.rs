use super::model::{AccessLevel, AccessTransformEntry, Descriptor};
use thiserror::Error;

/// Marker line opening an access transform block in a patch preamble or
/// commit message.
pub const AT_MARKER: &str = "== AT ==";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("line {line}: {message}")]
pub struct AtParseError {
    pub line: usize,
    pub message: String,
}

/// Parse one AT line. Comments and blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<(Descriptor, AccessLevel)>, String> {
    let content = line.split('#').next().unwrap_or("").trim();
    if content.is_empty() {
        return Ok(None);
    }

    let mut parts = content.split_whitespace();
    let access: AccessLevel = parts.next().unwrap_or_default().parse()?;
    let class = parts
        .next()
        .ok_or_else(|| "missing class name".to_string())?;
    let member = parts.next();
    if let Some(extra) = parts.next() {
        return Err(format!("unexpected trailing token {extra:?}"));
    }

    let descriptor = match member {
        Some(member) if member.starts_with('(') => {
            return Err(format!("member {member:?} has no name"));
        }
        Some(member) => Descriptor::member(class, member),
        None => Descriptor::class(class),
    };
    Ok(Some((descriptor, access)))
}

/// Parse a whole AT file.
pub fn parse_entries(text: &str, source: &str) -> Result<Vec<AccessTransformEntry>, AtParseError> {
    let mut entries = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        match parse_line(line) {
            Ok(Some((descriptor, access))) => entries.push(AccessTransformEntry {
                descriptor,
                access,
                source: source.to_string(),
            }),
            Ok(None) => {}
            Err(message) => {
                return Err(AtParseError {
                    line: idx + 1,
                    message,
                })
            }
        }
    }
    Ok(entries)
}

/// Entries declared in `== AT ==` blocks.
///
/// A block runs from the marker to the next blank line or the end of
/// `lines`. Line numbers in errors are 1-based within `lines`.
pub fn declared_in<S: AsRef<str>>(
    lines: &[S],
    source: &str,
) -> Result<Vec<AccessTransformEntry>, AtParseError> {
    let mut entries = Vec::new();
    let mut in_block = false;

    for (idx, line) in lines.iter().enumerate() {
        let line = line.as_ref();
        if line.trim() == AT_MARKER {
            in_block = true;
            continue;
        }
        if !in_block {
            continue;
        }
        if line.trim().is_empty() {
            in_block = false;
            continue;
        }
        match parse_line(line) {
            Ok(Some((descriptor, access))) => entries.push(AccessTransformEntry {
                descriptor,
                access,
                source: source.to_string(),
            }),
            Ok(None) => {}
            Err(message) => {
                return Err(AtParseError {
                    line: idx + 1,
                    message,
                })
            }
        }
    }

    Ok(entries)
}

/// Render a resolved list as an AT file.
pub fn render<'a>(entries: impl IntoIterator<Item = (&'a Descriptor, &'a AccessLevel)>) -> String {
    let mut out = String::from("# Generated by patchstack; edit the patch declarations instead.\n");
    for (descriptor, access) in entries {
        out.push_str(&format!("{access} {descriptor}\n"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::model::{Finality, Visibility};

    #[test]
    fn test_parse_line_forms() {
        let (descriptor, access) = parse_line("public-f net/minecraft/Foo bar # why")
            .unwrap()
            .unwrap();
        assert_eq!(descriptor, Descriptor::member("net.minecraft.Foo", "bar"));
        assert_eq!(access.visibility, Visibility::Public);
        assert_eq!(access.finality, Finality::Remove);

        assert_eq!(parse_line("   # only a comment").unwrap(), None);
        assert!(parse_line("public").is_err());
        assert!(parse_line("public a.Foo b c").is_err());
    }

    #[test]
    fn test_method_descriptor_without_name_is_rejected() {
        let err = parse_line("public a.Foo (I)V").unwrap_err();
        assert!(err.contains("no name"), "{err}");
        assert!(parse_line("public a.Foo <init>(I)V").unwrap().is_some());
    }

    #[test]
    fn test_parse_entries_reports_line_number() {
        let err = parse_entries("public a.Foo\nwide a.Bar\n", "project.at").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn test_declared_in_reads_marker_blocks() {
        let preamble = vec![
            "Some notes",
            "== AT ==",
            "public net.minecraft.Foo",
            "protected net.minecraft.Foo bar(I)V",
            "",
            "public not.an.Entry",
        ];
        let entries = declared_in(&preamble, "Foo.java.patch").unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].descriptor.member.as_deref(), Some("bar(I)V"));
        assert_eq!(entries[1].source, "Foo.java.patch");
    }

    #[test]
    fn test_render_sorted_output() {
        let foo = Descriptor::class("a.Foo");
        let level = AccessLevel::new(Visibility::Public);
        let text = render([(&foo, &level)]);
        assert!(text.ends_with("public a.Foo\n"));
    }
}
