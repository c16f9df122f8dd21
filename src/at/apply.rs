//! Applying resolved access transforms to Java-like sources.
//!
//! This is a line-level rewrite, not a parser: a declaration is located by
//! its name and the leading modifiers of that line are replaced. Anything
//! that cannot be located is reported back as unresolved.

use super::model::{AccessLevel, Descriptor, Finality};
use crate::tree::{join_lines, split_lines};
use serde::Serialize;
use std::collections::BTreeMap;

const VISIBILITY_KEYWORDS: &[&str] = &["public", "protected", "private"];

const MODIFIERS: &[&str] = &[
    "public",
    "protected",
    "private",
    "static",
    "final",
    "abstract",
    "synchronized",
    "native",
    "transient",
    "volatile",
    "strictfp",
    "sealed",
    "non-sealed",
];

const TYPE_KEYWORDS: &[&str] = &["class", "interface", "enum", "record", "@interface"];

/// Source file holding `class`: `a.b.Outer$Inner` lives in `a/b/Outer.java`.
pub fn class_file(class: &str) -> String {
    let outer = class.split('$').next().unwrap_or(class);
    format!("{}.java", outer.replace('.', "/"))
}

/// Result of applying transforms to one tree.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceTransformReport {
    /// Declarations rewritten
    pub applied: usize,
    /// Declarations that could not be located, with their file
    pub unresolved: Vec<(Descriptor, String)>,
}

/// Resolved transforms grouped by the file they target.
#[derive(Debug, Clone, Default)]
pub struct SourceTransform {
    by_file: BTreeMap<String, Vec<(Descriptor, AccessLevel)>>,
}

impl SourceTransform {
    pub fn new<'a>(entries: impl IntoIterator<Item = (&'a Descriptor, &'a AccessLevel)>) -> Self {
        let mut by_file: BTreeMap<String, Vec<(Descriptor, AccessLevel)>> = BTreeMap::new();
        for (descriptor, access) in entries {
            by_file
                .entry(class_file(&descriptor.class))
                .or_default()
                .push((descriptor.clone(), *access));
        }
        Self { by_file }
    }

    pub fn is_empty(&self) -> bool {
        self.by_file.is_empty()
    }

    /// Number of transforms across all files.
    pub fn len(&self) -> usize {
        self.by_file.values().map(Vec::len).sum()
    }

    pub fn entries(&self, rel: &str) -> &[(Descriptor, AccessLevel)] {
        self.by_file.get(rel).map_or(&[], Vec::as_slice)
    }

    /// Files with at least one transform.
    pub fn files(&self) -> impl Iterator<Item = &str> {
        self.by_file.keys().map(String::as_str)
    }

    /// Rewrite `text` (the content of `rel`), returning the new text and the
    /// descriptors that could not be located in it.
    pub fn apply(&self, rel: &str, text: &str) -> (String, Vec<Descriptor>) {
        let Some(entries) = self.by_file.get(rel) else {
            return (text.to_string(), Vec::new());
        };

        let mut lines = split_lines(text);
        let mut unresolved = Vec::new();
        for (descriptor, access) in entries {
            match locate(&lines, descriptor) {
                Some(idx) => lines[idx] = rewrite_modifiers(&lines[idx], *access),
                None => unresolved.push(descriptor.clone()),
            }
        }

        (join_lines(&lines), unresolved)
    }
}

fn simple_name(class: &str) -> &str {
    let last = class.rsplit('.').next().unwrap_or(class);
    last.rsplit('$').next().unwrap_or(last)
}

/// Line index of the declaration named by `descriptor`.
fn locate(lines: &[String], descriptor: &Descriptor) -> Option<usize> {
    let class_name = simple_name(&descriptor.class);
    let class_line = find_type_declaration(lines, class_name, 0);

    let Some(member) = descriptor.member_name() else {
        return class_line;
    };

    // Members of inner classes are searched after the inner declaration.
    let from = if descriptor.class.contains('$') {
        class_line?
    } else {
        class_line.unwrap_or(0)
    };

    if descriptor.is_method() {
        let name = if member == "<init>" { class_name } else { member };
        let arity = descriptor
            .member
            .as_deref()
            .and_then(|m| m.find('(').map(|idx| &m[idx..]))
            .and_then(descriptor_arity);
        find_method_declaration(lines, name, arity, member == "<init>", from)
    } else {
        find_field_declaration(lines, member, from)
    }
}

fn find_type_declaration(lines: &[String], name: &str, from: usize) -> Option<usize> {
    lines.iter().enumerate().skip(from).find_map(|(idx, line)| {
        let code = code_part(line)?;
        let words: Vec<&str> = code.split_whitespace().collect();
        let declares = words.windows(2).any(|pair| {
            TYPE_KEYWORDS.contains(&pair[0]) && identifier_prefix(pair[1]) == name
        });
        declares.then_some(idx)
    })
}

fn find_method_declaration(
    lines: &[String],
    name: &str,
    arity: Option<usize>,
    constructor: bool,
    from: usize,
) -> Option<usize> {
    lines.iter().enumerate().skip(from).find_map(|(idx, line)| {
        let code = code_part(line)?;
        let pos = find_identifier(code, name, |rest| rest.trim_start().starts_with('('))?;
        let prefix = code[..pos].trim();
        if !is_declaration_prefix(prefix) || (prefix.is_empty() && !constructor) {
            return None;
        }
        if let (Some(expected), Some(found)) = (arity, source_arity(&code[pos..])) {
            if expected != found {
                return None;
            }
        }
        Some(idx)
    })
}

fn find_field_declaration(lines: &[String], name: &str, from: usize) -> Option<usize> {
    lines.iter().enumerate().skip(from).find_map(|(idx, line)| {
        let code = code_part(line)?;
        let pos = find_identifier(code, name, |rest| {
            let rest = rest.trim_start();
            rest.starts_with(';') || rest.starts_with('=') || rest.starts_with(',')
        })?;
        let prefix = code[..pos].trim();
        (!prefix.is_empty() && is_declaration_prefix(prefix)).then_some(idx)
    })
}

/// Line content with comment lines filtered out.
fn code_part(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    if trimmed.starts_with("//") || trimmed.starts_with('*') || trimmed.starts_with("/*") {
        return None;
    }
    Some(line)
}

/// Declaration prefixes hold only annotations, modifiers and a type.
fn is_declaration_prefix(prefix: &str) -> bool {
    if prefix.contains('=') || prefix.contains('(') || (prefix.contains('.') && !prefix.contains('<'))
    {
        return false;
    }
    !prefix
        .split_whitespace()
        .any(|word| matches!(word, "return" | "new" | "throw" | "else" | "case"))
}

/// Byte offset of `name` as a whole identifier followed by text matching `follows`.
fn find_identifier(code: &str, name: &str, follows: impl Fn(&str) -> bool) -> Option<usize> {
    if name.is_empty() {
        return None;
    }
    let mut search = 0;
    while let Some(found) = code[search..].find(name) {
        let start = search + found;
        let end = start + name.len();
        let before_ok = code[..start]
            .chars()
            .next_back()
            .is_none_or(|c| !is_identifier_char(c));
        let after_ok = code[end..]
            .chars()
            .next()
            .is_none_or(|c| !is_identifier_char(c));
        if before_ok && after_ok && follows(&code[end..]) {
            return Some(start);
        }
        search = end;
    }
    None
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '$'
}

fn identifier_prefix(word: &str) -> &str {
    let end = word
        .char_indices()
        .find(|(_, c)| !is_identifier_char(*c))
        .map_or(word.len(), |(idx, _)| idx);
    &word[..end]
}

/// Parameter count of a JVM method descriptor such as `(ILjava/lang/String;)V`.
fn descriptor_arity(descriptor: &str) -> Option<usize> {
    let params = descriptor.strip_prefix('(')?.split(')').next()?;
    let mut count = 0;
    let mut chars = params.chars();
    while let Some(c) = chars.next() {
        match c {
            '[' => continue,
            'L' => {
                for c in chars.by_ref() {
                    if c == ';' {
                        break;
                    }
                }
                count += 1;
            }
            _ => count += 1,
        }
    }
    Some(count)
}

/// Parameter count of a source parameter list starting at the method name,
/// when the list closes on the same line.
fn source_arity(from_name: &str) -> Option<usize> {
    let open = from_name.find('(')?;
    let mut depth = 0usize;
    let mut commas = 0;
    let mut any = false;
    for c in from_name[open + 1..].chars() {
        match c {
            '<' | '(' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            ')' if depth == 0 => return Some(if any { commas + 1 } else { 0 }),
            ')' => depth -= 1,
            ',' if depth == 0 => commas += 1,
            c if !c.is_whitespace() => any = true,
            _ => {}
        }
    }
    None
}

/// Replace the visibility keyword and adjust `final` on a declaration line.
fn rewrite_modifiers(line: &str, access: AccessLevel) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, mut rest) = line.split_at(indent_len);

    let mut modifiers = Vec::new();
    loop {
        let word_end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        let word = &rest[..word_end];
        if !MODIFIERS.contains(&word) {
            break;
        }
        modifiers.push(word);
        rest = rest[word_end..].trim_start();
    }

    modifiers.retain(|m| !VISIBILITY_KEYWORDS.contains(m));
    match access.finality {
        Finality::Keep => {}
        Finality::Add => {
            if !modifiers.contains(&"final") {
                modifiers.push("final");
            }
        }
        Finality::Remove => modifiers.retain(|m| *m != "final"),
    }

    let mut out = String::from(indent);
    if let Some(keyword) = access.visibility.keyword() {
        out.push_str(keyword);
        out.push(' ');
    }
    for modifier in modifiers {
        out.push_str(modifier);
        out.push(' ');
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::model::Visibility;

    const SOURCE: &str = "package net.example;

public class Foo {
    private static final int LIMIT = 4;
    private final String name;

    Foo(String name) {
        this.name = name;
    }

    private void tick(int a, String b) {
        helper(a);
    }

    private void tick() {
    }

    static class Inner {
        private int depth;
    }
}
";

    fn transform(entries: &[(Descriptor, AccessLevel)]) -> SourceTransform {
        SourceTransform::new(entries.iter().map(|(d, a)| (d, a)))
    }

    #[test]
    fn test_class_file_for_inner_class() {
        assert_eq!(class_file("net.example.Foo$Inner"), "net/example/Foo.java");
    }

    #[test]
    fn test_rewrites_field_and_removes_final() {
        let entries = vec![(
            Descriptor::member("net.example.Foo", "name"),
            AccessLevel::new(Visibility::Public).with_finality(Finality::Remove),
        )];
        let (out, unresolved) = transform(&entries).apply("net/example/Foo.java", SOURCE);
        assert!(unresolved.is_empty());
        assert!(out.contains("    public String name;\n"));
        assert!(out.contains("    private static final int LIMIT = 4;\n"));
    }

    #[test]
    fn test_method_overload_selected_by_descriptor() {
        let entries = vec![(
            Descriptor::member("net.example.Foo", "tick()V"),
            AccessLevel::new(Visibility::Protected),
        )];
        let (out, _) = transform(&entries).apply("net/example/Foo.java", SOURCE);
        assert!(out.contains("    private void tick(int a, String b) {\n"));
        assert!(out.contains("    protected void tick() {\n"));
    }

    #[test]
    fn test_constructor_and_inner_class_members() {
        let entries = vec![
            (
                Descriptor::member("net.example.Foo", "<init>(Ljava/lang/String;)V"),
                AccessLevel::new(Visibility::Public),
            ),
            (
                Descriptor::member("net.example.Foo$Inner", "depth"),
                AccessLevel::new(Visibility::Default),
            ),
            (
                Descriptor::class("net.example.Foo$Inner"),
                AccessLevel::new(Visibility::Public),
            ),
        ];
        let (out, unresolved) = transform(&entries).apply("net/example/Foo.java", SOURCE);
        assert!(unresolved.is_empty());
        assert!(out.contains("    public Foo(String name) {\n"));
        assert!(out.contains("        int depth;\n"));
        assert!(out.contains("    public static class Inner {\n"));
    }

    #[test]
    fn test_unresolved_member_reported() {
        let entries = vec![(
            Descriptor::member("net.example.Foo", "missing"),
            AccessLevel::new(Visibility::Public),
        )];
        let (out, unresolved) = transform(&entries).apply("net/example/Foo.java", SOURCE);
        assert_eq!(out, SOURCE);
        assert_eq!(unresolved.len(), 1);
    }

    #[test]
    fn test_nameless_member_is_unresolved() {
        let entries = vec![(
            Descriptor::member("net.example.Foo", "(I)V"),
            AccessLevel::new(Visibility::Public),
        )];
        let (out, unresolved) = transform(&entries).apply("net/example/Foo.java", SOURCE);
        assert_eq!(out, SOURCE);
        assert_eq!(unresolved.len(), 1);
        assert_eq!(find_identifier("int x;", "", |_| true), None);
    }

    #[test]
    fn test_rewrite_keeps_crlf_and_missing_newline() {
        let source = "class Foo {\r\n    private int count;\r\n}";
        let entries = vec![(
            Descriptor::member("Foo", "count"),
            AccessLevel::new(Visibility::Public),
        )];
        let (out, _) = transform(&entries).apply("Foo.java", source);
        assert_eq!(out, "class Foo {\r\n    public int count;\r\n}");
    }

    #[test]
    fn test_descriptor_arity() {
        assert_eq!(descriptor_arity("()V"), Some(0));
        assert_eq!(descriptor_arity("(I[JLjava/lang/String;)V"), Some(3));
        assert_eq!(source_arity("tick(Map<String, Integer> m) {"), Some(1));
    }
}
