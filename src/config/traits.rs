use anyhow::Result;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Common behaviour of everything loaded from a sweep file
pub trait Configuration {
    /// Returns the file path where this configuration was loaded from
    fn config_path(&self) -> &PathBuf;

    /// Returns a string identifier for the configuration type
    fn config_type(&self) -> &str;

    /// Validates the configuration
    fn validate(&self) -> Result<()>;
}

/// Configurations carrying filesystem paths that are written relative to the
/// sweep file and may contain `~` or `$VAR`
pub trait PathConfiguration: Configuration {
    /// Returns a copy with all paths expanded and made absolute
    fn with_expanded_paths(&self, config_dir: &Path) -> Result<Self>
    where
        Self: Sized;
}

/// Configurations that accept loosely-typed overrides
pub trait MergeableConfiguration<T> {
    /// Merges this configuration with another, with the other taking precedence
    fn merge_with(&self, other: &T) -> Result<Self>
    where
        Self: Sized;
}

/// Merge from a map of named overrides, as found under a sweep's `options:` key
pub trait MergeFromMap<K, V> {
    /// Merge self with a map of values, with the map taking precedence
    fn merge_from_map(&self, map: &HashMap<K, V>) -> Result<Self>
    where
        Self: Sized;
}
