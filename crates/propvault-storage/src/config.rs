//! Store configuration.
//!
//! Reads configuration from environment variables:
//! - `PROPVAULT_ROOT`: repository root directory (default: "filerepository")
//! - `PROPVAULT_COMPRESSION`: `none`, `gzip` or `deflate` (default: "none")
//! - `PROPVAULT_PRETTY_PRINT`: pretty-print stored JSON (default: "false")
//! - `PROPVAULT_BINARIES_AS_FILES`: externalize binaries (default: "true")
//!
//! or from a JSON file with the same fields in snake case.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::compression::CompressionFormat;
use crate::error::StorageError;

pub const ROOT_VAR: &str = "PROPVAULT_ROOT";
pub const COMPRESSION_VAR: &str = "PROPVAULT_COMPRESSION";
pub const PRETTY_PRINT_VAR: &str = "PROPVAULT_PRETTY_PRINT";
pub const BINARIES_AS_FILES_VAR: &str = "PROPVAULT_BINARIES_AS_FILES";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory per resource.
    pub root: PathBuf,
    /// Compression of newly written property documents.
    pub compression: CompressionFormat,
    pub pretty_print: bool,
    /// Store binaries (and structured objects) as sibling files instead of
    /// inline text.
    pub binaries_as_files: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            root: PathBuf::from("filerepository"),
            compression: CompressionFormat::None,
            pretty_print: false,
            binaries_as_files: true,
        }
    }
}

impl StoreConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        StoreConfig {
            root: root.into(),
            ..Self::default()
        }
    }

    /// Reads the `PROPVAULT_*` environment variables over the defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with an arbitrary variable source.
    /// Unparsable values keep the default and log a warning.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(root) = lookup(ROOT_VAR).filter(|s| !s.trim().is_empty()) {
            config.root = PathBuf::from(root);
        }
        if let Some(raw) = lookup(COMPRESSION_VAR) {
            config.compression = parse_or_default(COMPRESSION_VAR, &raw, config.compression);
        }
        if let Some(raw) = lookup(PRETTY_PRINT_VAR) {
            config.pretty_print = parse_or_default(PRETTY_PRINT_VAR, &raw, config.pretty_print);
        }
        if let Some(raw) = lookup(BINARIES_AS_FILES_VAR) {
            config.binaries_as_files = parse_or_default(BINARIES_AS_FILES_VAR, &raw, config.binaries_as_files);
        }
        config
    }

    /// Loads a JSON configuration file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let text = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

fn parse_or_default<T>(var: &str, raw: &str, default: T) -> T
where
    T: FromStr + std::fmt::Debug,
{
    match raw.trim().to_ascii_lowercase().parse() {
        Ok(value) => value,
        Err(_) => {
            warn!(var, value = raw, ?default, "ignoring unparsable configuration value");
            default
        }
    }
}
