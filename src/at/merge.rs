use super::model::{AccessLevel, AccessTransformEntry, Descriptor};
use serde::Serialize;
use std::collections::BTreeMap;
use tracing::info;

/// A descriptor declared more than once with differing access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Override {
    pub descriptor: Descriptor,
    pub previous: AccessLevel,
    pub previous_source: String,
    pub replacement: AccessLevel,
    pub source: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MergeReport {
    /// Resolved list, sorted by descriptor
    pub entries: Vec<(Descriptor, AccessLevel)>,
    pub overrides: Vec<Override>,
}

impl MergeReport {
    pub fn get(&self, descriptor: &Descriptor) -> Option<AccessLevel> {
        self.entries
            .binary_search_by(|(d, _)| d.cmp(descriptor))
            .ok()
            .map(|idx| self.entries[idx].1)
    }
}

/// Merge collected declarations with an optional override file.
///
/// Entries are inserted in declaration order, override entries last; each
/// insertion replaces any earlier value for the same descriptor.
pub fn merge(
    collected: &[AccessTransformEntry],
    override_file: Option<&[AccessTransformEntry]>,
) -> MergeReport {
    let mut resolved: BTreeMap<Descriptor, (AccessLevel, &str)> = BTreeMap::new();
    let mut overrides = Vec::new();

    let ordered = collected.iter().chain(override_file.unwrap_or_default());
    for entry in ordered {
        let previous = resolved.insert(
            entry.descriptor.clone(),
            (entry.access, entry.source.as_str()),
        );
        if let Some((previous, previous_source)) = previous {
            if previous != entry.access {
                info!(
                    "access transform for {} overridden: {} ({}) -> {} ({})",
                    entry.descriptor, previous, previous_source, entry.access, entry.source
                );
                overrides.push(Override {
                    descriptor: entry.descriptor.clone(),
                    previous,
                    previous_source: previous_source.to_string(),
                    replacement: entry.access,
                    source: entry.source.clone(),
                });
            }
        }
    }

    MergeReport {
        entries: resolved
            .into_iter()
            .map(|(descriptor, (access, _))| (descriptor, access))
            .collect(),
        overrides,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::at::model::Visibility;

    fn entry(class: &str, member: &str, visibility: Visibility, source: &str) -> AccessTransformEntry {
        AccessTransformEntry {
            descriptor: Descriptor::member(class, member),
            access: AccessLevel::new(visibility),
            source: source.to_string(),
        }
    }

    #[test]
    fn test_override_file_wins() {
        let collected = vec![entry("Foo", "bar", Visibility::Protected, "Foo.java.patch")];
        let overrides = vec![entry("Foo", "bar", Visibility::Public, "project.at")];

        let report = merge(&collected, Some(&overrides));
        assert_eq!(report.entries.len(), 1);
        assert_eq!(
            report.get(&Descriptor::member("Foo", "bar")),
            Some(AccessLevel::new(Visibility::Public))
        );
        assert_eq!(report.overrides.len(), 1);
        assert_eq!(report.overrides[0].previous_source, "Foo.java.patch");
    }

    #[test]
    fn test_later_declaration_wins_and_output_is_sorted() {
        let collected = vec![
            entry("z.Last", "a", Visibility::Public, "1"),
            entry("a.First", "b", Visibility::Private, "1"),
            entry("a.First", "b", Visibility::Protected, "2"),
        ];
        let report = merge(&collected, None);
        assert_eq!(report.entries[0].0.class, "a.First");
        assert_eq!(report.entries[0].1.visibility, Visibility::Protected);
        assert_eq!(report.entries[1].0.class, "z.Last");
    }

    #[test]
    fn test_identical_redeclaration_is_not_an_override() {
        let collected = vec![
            entry("Foo", "bar", Visibility::Public, "1"),
            entry("Foo", "bar", Visibility::Public, "2"),
        ];
        let report = merge(&collected, None);
        assert!(report.overrides.is_empty());
        assert_eq!(report.entries.len(), 1);
    }
}
