//! Storage-layer types for resource identity and property naming.
//!
//! [`ResourcePath`] is defined here (not in propvault-core) because resource
//! identity is a storage concern: values only gain a location when they are
//! attached to a resource.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use propvault_core::binary::INTERNAL_PREFIX;

use crate::error::StorageError;

/// A normalized, absolute resource path such as `/content/page`.
///
/// Normalization drops empty and `.` segments. `..` and segments using the
/// internal `_pv_` prefix are rejected. The root resource is `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourcePath(String);

impl ResourcePath {
    pub fn root() -> Self {
        ResourcePath("/".to_string())
    }

    pub fn parse(raw: &str) -> Result<Self, StorageError> {
        let mut segments = Vec::new();
        for segment in raw.split('/') {
            match segment {
                "" | "." => continue,
                ".." => {
                    return Err(StorageError::invalid_argument(format!(
                        "resource path '{raw}' may not contain '..'"
                    )))
                }
                s if s.starts_with(INTERNAL_PREFIX) => {
                    return Err(StorageError::invalid_argument(format!(
                        "resource path segment '{s}' uses the reserved prefix"
                    )))
                }
                s => segments.push(s),
            }
        }
        Ok(ResourcePath(format!("/{}", segments.join("/"))))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == "/"
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/').filter(|s| !s.is_empty())
    }

    /// The path of a descendant, `rel` being relative to this path.
    pub fn join(&self, rel: &str) -> Result<Self, StorageError> {
        Self::parse(&format!("{}/{}", self.0, rel))
    }

    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let cut = self.0.rfind('/').unwrap_or(0);
        Some(ResourcePath(if cut == 0 { "/".to_string() } else { self.0[..cut].to_string() }))
    }

    /// The directory backing this resource under `root`.
    pub fn to_dir(&self, root: &Path) -> PathBuf {
        self.segments().fold(root.to_path_buf(), |dir, s| dir.join(s))
    }
}

impl fmt::Display for ResourcePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ResourcePath {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourcePath {
    type Error = StorageError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourcePath> for String {
    fn from(value: ResourcePath) -> Self {
        value.0
    }
}

/// Checks a property name for storage on a single resource.
///
/// Empty names and names with surrounding whitespace are invalid; names
/// containing `/` address a child resource and cannot be written.
pub fn validate_property_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.trim() != name {
        return Err(StorageError::invalid_argument(format!(
            "invalid property name '{name}'"
        )));
    }
    if name.contains('/') {
        return Err(StorageError::DeepWriteUnsupported {
            name: name.to_string(),
        });
    }
    Ok(())
}

/// Splits a deep property name `a/b/prop` into the child path `a/b` and the
/// property `prop`. Returns `None` for a plain name.
pub fn split_deep_name(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('/')
}
