//! Trusted references to regional shard files.
//!
//! A `ShardFile` is the only value ever interpolated into query structure,
//! so it can only be created from a catalog row that passed validation.

use std::fmt;
use std::sync::Arc;

/// Shard file name, relative to the configured base URL.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ShardFile(Arc<str>);

impl ShardFile {
    /// Validate a file name read from the catalog.
    ///
    /// Rejects empty names, absolute paths, `..` segments and any quote,
    /// backslash or control character.
    pub(crate) fn from_catalog(name: &str) -> Result<Self, String> {
        if name.is_empty() {
            return Err("empty shard file name".to_string());
        }
        if name.starts_with('/') {
            return Err(format!("absolute shard path '{}'", name));
        }
        if name.split('/').any(|segment| segment == "..") {
            return Err(format!("shard path '{}' escapes the base location", name));
        }
        if let Some(c) = name
            .chars()
            .find(|c| matches!(c, '\'' | '"' | '`' | '\\') || c.is_control())
        {
            return Err(format!(
                "shard path '{}' contains forbidden character {:?}",
                name.escape_debug(),
                c
            ));
        }
        Ok(Self(Arc::from(name)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ShardFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ShardFile {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
