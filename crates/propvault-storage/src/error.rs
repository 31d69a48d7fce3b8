//! Storage error types for propvault-storage.
//!
//! [`StorageError`] covers all anticipated failure modes in the storage layer:
//! filesystem and serialization failures, rejected arguments, writes through a
//! read-only view, unresolvable records, and commit failures tied to the
//! resource that failed.

use thiserror::Error;

use propvault_core::CoreError;

/// Errors produced by storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// A value-model error (bad shape, bad binary path, ...).
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Filesystem I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization or deserialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A caller-supplied argument was rejected.
    #[error("invalid argument: {reason}")]
    InvalidArgument { reason: String },

    /// A write was attempted through a read-only view.
    #[error("property map is read-only: cannot modify '{name}'")]
    ImmutableViolation { name: String },

    /// A property name addressing a child resource was used for a write.
    #[error("deep writes are not supported: '{name}'")]
    DeepWriteUnsupported { name: String },

    /// No resource exists at the given path.
    #[error("resource not found: {path}")]
    ResourceNotFound { path: String },

    /// A stored record names a type that is not registered.
    #[error("unknown stored type: '{name}'")]
    UnknownType { name: String },

    /// A stored record is malformed.
    #[error("invalid property record: {reason}")]
    InvalidRecord { reason: String },

    /// Committing one resource failed. Resources committed before it stay
    /// committed.
    #[error("commit failed for {path}: {source}")]
    Commit {
        path: String,
        #[source]
        source: Box<StorageError>,
    },
}

impl StorageError {
    pub(crate) fn invalid_argument(reason: impl Into<String>) -> Self {
        StorageError::InvalidArgument {
            reason: reason.into(),
        }
    }
}
