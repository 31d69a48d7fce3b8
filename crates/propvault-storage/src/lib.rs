//! Property storage for propvault resources.
//!
//! Provides the [`PropertyStore`], which persists typed properties of
//! hierarchical resources as tagged JSON documents on disk, with an overlay
//! of uncommitted changes, and the [`Resource`] views built on top of it.
//!
//! # Architecture
//!
//! The storage layer has three tiers:
//! - **Records**: the stored JSON form ([`PropertyRecord`], [`PropertyDocument`])
//!   and its optional stream compression.
//! - **Codec**: [`PropertyCodec`] maps typed values to records and back
//!   through the conversion registry, externalizing binaries to files.
//! - **Store**: baseline cache, overlay, revert and commit.
//!
//! # Modules
//!
//! - [`error`]: StorageError enum with all failure modes
//! - [`types`]: ResourcePath and property name rules
//! - [`compression`]: CompressionFormat and stream wrappers
//! - [`record`]: PropertyRecord, PropertyDocument, PropertySet
//! - [`codec`]: PropertyCodec encode/decode
//! - [`hash`]: blake3 content names for committed binaries
//! - [`overlay`]: uncommitted changes and change detection
//! - [`config`]: StoreConfig from environment or file
//! - [`store`]: PropertyStore implementation
//! - [`traits`]: PropertyMap trait definition
//! - [`view`]: Resource, ValueMap, ModifiableValueMap

pub mod codec;
pub mod compression;
pub mod config;
pub mod error;
pub mod hash;
pub mod overlay;
pub mod record;
pub mod store;
pub mod traits;
pub mod types;
pub mod view;

// Re-export key types for ergonomic use.
pub use codec::PropertyCodec;
pub use compression::CompressionFormat;
pub use config::StoreConfig;
pub use error::StorageError;
pub use overlay::{compute_changes, ChangeSet};
pub use record::{PropertyDocument, PropertyRecord, PropertySet, RecordPayload};
pub use store::{CommitReport, PropertyInput, PropertyStore};
pub use traits::PropertyMap;
pub use types::ResourcePath;
pub use view::{ModifiableValueMap, Resource, ValueMap};
