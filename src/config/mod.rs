pub mod loader;
pub mod schema;
pub mod version;

pub use loader::{load_from_path, load_from_str, load_or_default, ConfigError, CONFIG_FILE};
pub use schema::{
    BaselineSection, Config, EngineSection, FuzzySection, Paths, PatchesSection,
    ValidationError, ValidationIssue,
};
pub use version::{matches_requirement, parse_version, VersionError};
