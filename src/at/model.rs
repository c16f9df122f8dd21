use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Target visibility of an access transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Public,
    Protected,
    Default,
    Private,
}

impl Visibility {
    pub fn token(self) -> &'static str {
        match self {
            Visibility::Public => "public",
            Visibility::Protected => "protected",
            Visibility::Default => "default",
            Visibility::Private => "private",
        }
    }

    /// Java keyword for this visibility; package-private has none.
    pub fn keyword(self) -> Option<&'static str> {
        match self {
            Visibility::Default => None,
            other => Some(other.token()),
        }
    }
}

/// What happens to the `final` modifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Finality {
    Keep,
    /// `+f`
    Add,
    /// `-f`
    Remove,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct AccessLevel {
    pub visibility: Visibility,
    pub finality: Finality,
}

impl AccessLevel {
    pub const fn new(visibility: Visibility) -> Self {
        Self {
            visibility,
            finality: Finality::Keep,
        }
    }

    pub const fn with_finality(mut self, finality: Finality) -> Self {
        self.finality = finality;
        self
    }
}

impl fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.visibility.token())?;
        match self.finality {
            Finality::Keep => Ok(()),
            Finality::Add => f.write_str("+f"),
            Finality::Remove => f.write_str("-f"),
        }
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (base, finality) = if let Some(base) = s.strip_suffix("+f") {
            (base, Finality::Add)
        } else if let Some(base) = s.strip_suffix("-f") {
            (base, Finality::Remove)
        } else {
            (s, Finality::Keep)
        };
        let visibility = match base {
            "public" => Visibility::Public,
            "protected" => Visibility::Protected,
            "default" => Visibility::Default,
            "private" => Visibility::Private,
            other => return Err(format!("unknown access level {other:?}")),
        };
        Ok(AccessLevel {
            visibility,
            finality,
        })
    }
}

/// A class, or a member of a class, named by an access transform.
///
/// Ordering sorts a class before its members.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Descriptor {
    /// Binary class name with `.` separators, inner classes after `$`
    pub class: String,
    /// Field name, or method name followed by its JVM descriptor
    pub member: Option<String>,
}

impl Descriptor {
    pub fn class(class: impl Into<String>) -> Self {
        Self {
            class: normalize_class(&class.into()),
            member: None,
        }
    }

    pub fn member(class: impl Into<String>, member: impl Into<String>) -> Self {
        Self {
            class: normalize_class(&class.into()),
            member: Some(member.into()),
        }
    }

    /// Member name without a method descriptor.
    pub fn member_name(&self) -> Option<&str> {
        self.member
            .as_deref()
            .map(|member| member.split('(').next().unwrap_or(member))
    }

    pub fn is_method(&self) -> bool {
        self.member.as_deref().is_some_and(|m| m.contains('('))
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.member {
            Some(member) => write!(f, "{} {}", self.class, member),
            None => f.write_str(&self.class),
        }
    }
}

fn normalize_class(class: &str) -> String {
    class.replace('/', ".")
}

/// One declaration, remembering where it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessTransformEntry {
    pub descriptor: Descriptor,
    pub access: AccessLevel,
    /// Patch file, commit or override file that declared it
    pub source: String,
}
