//! Core error types for propvault-core.
//!
//! Uses `thiserror` for structured, matchable error variants covering the
//! failure modes of the value model: malformed shapes, type registry clashes,
//! and binary handles built from bad paths.
//!
//! Conversion failure is deliberately absent: [`convert`](crate::convert)
//! reports an impossible conversion as `None`, never as an error.

use std::path::PathBuf;

use thiserror::Error;

/// Core errors produced by the propvault-core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A value had a shape the model cannot represent (e.g. nested arrays,
    /// or array items that do not match the declared element type).
    #[error("invalid shape: {reason}")]
    InvalidShape { reason: String },

    /// Attempting to register a type name that already exists in the registry.
    #[error("duplicate type name: '{name}'")]
    DuplicateTypeName { name: String },

    /// A type name did not resolve to any registered type.
    #[error("unknown type: '{name}'")]
    UnknownType { name: String },

    /// A binary handle was requested for a path that does not exist.
    #[error("binary file not found: {}", path.display())]
    NotFound { path: PathBuf },

    /// A binary handle was requested for a path that is not a regular file.
    #[error("binary path is not a file: {}", path.display())]
    NotAFile { path: PathBuf },

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization of a structured value failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
