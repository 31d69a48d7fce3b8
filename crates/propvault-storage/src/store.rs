//! The property store: baseline cache, overlay of uncommitted changes, and
//! commit to disk.
//!
//! # Files
//!
//! Each resource is a directory under the configured root. Its properties
//! live in `_pv_properties.json` (or `.json.gz` / `.json.zlib`), and its
//! externalized binaries in `_pv_<hash>.bin` siblings.
//!
//! # State
//!
//! - **baseline**: decoded property sets read from disk, cached per path.
//! - **overlay**: full copies of modified sets, created on first write.
//!
//! Reads prefer the overlay. [`PropertyStore::revert`] discards the overlay;
//! [`PropertyStore::commit`] writes it and drops it.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, error, info, warn};

use propvault_core::binary;
use propvault_core::{BinaryHandle, ConversionRegistry, Value, ValueArray};

use crate::codec::PropertyCodec;
use crate::compression::CompressionFormat;
use crate::config::StoreConfig;
use crate::error::StorageError;
use crate::hash::{hash_file, is_permanent_binary_name, permanent_binary_name};
use crate::overlay::{compute_changes, ChangeSet, Overlay};
use crate::record::{PropertyDocument, PropertySet};
use crate::types::{split_deep_name, validate_property_name, ResourcePath};
use crate::view::Resource;

/// File stem of a resource's property document.
pub const PROPERTY_FILE_STEM: &str = "_pv_properties";

/// A value to store with [`PropertyStore::put`].
pub enum PropertyInput {
    Value(Value),
    /// Items of an array; the element type is inferred.
    ///
    /// Items of mixed types give an `any` array. Its items are stored without
    /// their own types, so after a commit they read back with the types the
    /// stored text implies (an `Int` comes back as a `Long`).
    Array(Vec<Value>),
    /// Binary content, copied into a temporary binary at put time.
    Stream(Box<dyn Read + Send>),
}

impl From<Value> for PropertyInput {
    fn from(value: Value) -> Self {
        PropertyInput::Value(value)
    }
}

/// Outcome of a successful [`PropertyStore::commit`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReport {
    /// Resources written, in commit order.
    pub committed: Vec<ResourcePath>,
    /// Binary files copied into resource directories.
    pub binaries_copied: Vec<PathBuf>,
    /// Binary files removed because nothing references them anymore.
    pub binaries_removed: Vec<PathBuf>,
}

/// Property storage over a directory tree.
#[derive(Debug)]
pub struct PropertyStore {
    config: StoreConfig,
    codec: PropertyCodec,
    baseline: DashMap<ResourcePath, PropertySet>,
    overlay: Overlay,
}

impl PropertyStore {
    /// Opens a store with the default conversions.
    pub fn open(config: StoreConfig) -> Result<Self, StorageError> {
        Self::open_with_registry(config, Arc::new(ConversionRegistry::with_defaults()))
    }

    /// Opens a store with a custom registry (for registered structured types).
    ///
    /// Creates the root directory if it is missing.
    pub fn open_with_registry(
        config: StoreConfig,
        registry: Arc<ConversionRegistry>,
    ) -> Result<Self, StorageError> {
        if config.root.exists() {
            if !config.root.is_dir() {
                return Err(StorageError::invalid_argument(format!(
                    "repository root {} is not a directory",
                    config.root.display()
                )));
            }
        } else {
            fs::create_dir_all(&config.root)?;
            info!(root = %config.root.display(), "created repository root");
        }
        let codec = PropertyCodec::new(registry, config.binaries_as_files);
        Ok(PropertyStore {
            config,
            codec,
            baseline: DashMap::new(),
            overlay: Overlay::new(),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    pub fn codec(&self) -> &PropertyCodec {
        &self.codec
    }

    pub fn registry(&self) -> &Arc<ConversionRegistry> {
        self.codec.registry()
    }

    /// The directory backing `path`.
    pub fn resource_dir(&self, path: &ResourcePath) -> PathBuf {
        path.to_dir(&self.config.root)
    }

    /// Whether a resource directory exists for `path`.
    pub fn exists(&self, path: &ResourcePath) -> bool {
        self.resource_dir(path).is_dir()
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The current properties of `path`: the overlay copy if modified, else
    /// the baseline (read from disk on first access).
    ///
    /// A resource with no property file, or one that cannot be read, has no
    /// properties.
    pub fn get(&self, path: &ResourcePath) -> PropertySet {
        if let Some(set) = self.overlay.get(path) {
            return set;
        }
        self.baseline_for(path)
    }

    fn baseline_for(&self, path: &ResourcePath) -> PropertySet {
        if let Some(set) = self.baseline.get(path) {
            return set.value().clone();
        }
        let set = self.load(path);
        self.baseline.insert(path.clone(), set.clone());
        set
    }

    fn load(&self, path: &ResourcePath) -> PropertySet {
        let dir = self.resource_dir(path);
        match read_document(&dir) {
            Ok(Some(doc)) => {
                let set = self.codec.decode_document(&dir, &doc);
                debug!(path = %path, properties = set.len(), "loaded properties");
                set
            }
            Ok(None) => PropertySet::new(),
            Err(e) => {
                error!(path = %path, error = %e, "could not read properties");
                PropertySet::new()
            }
        }
    }

    /// The stored document of `path` as it is on disk, if any.
    pub fn read_document(&self, path: &ResourcePath) -> Result<Option<PropertyDocument>, StorageError> {
        read_document(&self.resource_dir(path))
    }

    /// Reads one property. A name containing `/` reads from a descendant:
    /// `a/b/prop` is `prop` of the child resource `a/b`.
    ///
    /// A missing property or a missing child resource is `Ok(None)`.
    pub fn get_property(&self, path: &ResourcePath, name: &str) -> Result<Option<Value>, StorageError> {
        let Some((rel, prop)) = split_deep_name(name) else {
            if name.is_empty() {
                return Err(StorageError::invalid_argument("empty property name"));
            }
            return Ok(self.get(path).get(name).cloned());
        };
        if prop.is_empty() {
            return Err(StorageError::invalid_argument(format!(
                "invalid property name '{name}'"
            )));
        }
        let child = path.join(rel)?;
        if !self.exists(&child) && !self.overlay.contains(&child) {
            return Ok(None);
        }
        Ok(self.get(&child).get(prop).cloned())
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Stores a property in the overlay and returns the previous value.
    pub fn put(
        &self,
        path: &ResourcePath,
        name: &str,
        input: impl Into<PropertyInput>,
    ) -> Result<Option<Value>, StorageError> {
        validate_property_name(name)?;
        let value = match input.into() {
            PropertyInput::Value(value) => value,
            PropertyInput::Array(items) => ValueArray::infer(items)
                .map(Value::Array)
                .map_err(|e| StorageError::invalid_argument(format!("cannot store '{name}': {e}")))?,
            PropertyInput::Stream(reader) => Value::Binary(BinaryHandle::from_stream(reader)?),
        };
        let seed = self.seed_for(path);
        let previous = self.overlay.update(path, || seed.unwrap_or_default(), |set| {
            set.insert(name.to_string(), value)
        });
        debug!(path = %path, property = name, "property staged");
        Ok(previous)
    }

    /// Removes a property in the overlay and returns its value.
    ///
    /// Removing an absent property does not mark the resource modified.
    pub fn remove(&self, path: &ResourcePath, name: &str) -> Result<Option<Value>, StorageError> {
        validate_property_name(name)?;
        if !self.get(path).contains_key(name) {
            return Ok(None);
        }
        let seed = self.seed_for(path);
        let previous = self
            .overlay
            .update(path, || seed.unwrap_or_default(), |set| set.remove(name));
        debug!(path = %path, property = name, "property removal staged");
        Ok(previous)
    }

    fn seed_for(&self, path: &ResourcePath) -> Option<PropertySet> {
        if self.overlay.contains(path) {
            None
        } else {
            Some(self.baseline_for(path))
        }
    }

    /// Copies a stream into a new temporary binary.
    pub fn create_binary(&self, reader: impl Read) -> Result<BinaryHandle, StorageError> {
        Ok(BinaryHandle::from_stream(reader)?)
    }

    // -----------------------------------------------------------------------
    // Overlay state
    // -----------------------------------------------------------------------

    /// Discards every uncommitted change. The baseline cache is kept.
    pub fn revert(&self) {
        self.overlay.clear();
    }

    /// Discards the uncommitted changes of one resource.
    pub fn revert_path(&self, path: &ResourcePath) {
        self.overlay.remove(path);
    }

    pub fn is_modified(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Modified resource paths, sorted.
    pub fn modified_paths(&self) -> Vec<ResourcePath> {
        self.overlay.paths()
    }

    /// What changed on `path` relative to its baseline.
    pub fn changes(&self, path: &ResourcePath) -> ChangeSet {
        match self.overlay.get(path) {
            Some(current) => compute_changes(&self.baseline_for(path), &current),
            None => ChangeSet::default(),
        }
    }

    /// Drops the baseline cache so unmodified resources are re-read.
    pub fn refresh(&self) {
        self.baseline.clear();
    }

    // -----------------------------------------------------------------------
    // Resources
    // -----------------------------------------------------------------------

    /// The resource at `path`, if its directory exists.
    pub fn resource(self: &Arc<Self>, path: &ResourcePath) -> Option<Resource> {
        self.exists(path).then(|| Resource::new(Arc::clone(self), path.clone()))
    }

    /// The resource at `path`, or [`StorageError::ResourceNotFound`] if its
    /// directory does not exist.
    pub fn require_resource(self: &Arc<Self>, path: &ResourcePath) -> Result<Resource, StorageError> {
        self.resource(path).ok_or_else(|| StorageError::ResourceNotFound {
            path: path.to_string(),
        })
    }

    /// The resource at `path`, creating its directory if needed.
    pub fn create_resource(self: &Arc<Self>, path: &ResourcePath) -> Result<Resource, StorageError> {
        fs::create_dir_all(self.resource_dir(path))?;
        Ok(Resource::new(Arc::clone(self), path.clone()))
    }

    // -----------------------------------------------------------------------
    // Commit
    // -----------------------------------------------------------------------

    /// Writes every modified resource, in path order.
    ///
    /// Each resource's document is replaced atomically, but the commit as a
    /// whole is not: on failure, resources committed before the failing one
    /// stay committed and the rest stay in the overlay. A resource whose
    /// overlay equals its stored properties is dropped from the overlay
    /// without a write.
    ///
    /// Binaries that a rewritten document no longer references are deleted
    /// after the last write, unless a value still in the overlay reads them.
    pub fn commit(&self) -> Result<CommitReport, StorageError> {
        let mut report = CommitReport::default();
        let mut orphans = Vec::new();
        let mut failure = None;
        for path in self.modified_paths() {
            let Some(set) = self.overlay.get(&path) else {
                continue;
            };
            let changes = self.changes(&path);
            if changes.is_clean() {
                self.overlay.remove(&path);
                debug!(path = %path, "no changes to write");
                continue;
            }
            if let Err(e) = self.commit_path(&path, &set, &mut report, &mut orphans) {
                error!(path = %path, error = %e, "commit failed");
                failure = Some(StorageError::Commit {
                    path: path.to_string(),
                    source: Box::new(e),
                });
                break;
            }
            self.overlay.remove(&path);
            self.baseline.remove(&path);
            debug!(
                path = %path,
                changed = changes.total(),
                added = changes.added.len(),
                modified = changes.modified.len(),
                removed = changes.removed.len(),
                "committed resource"
            );
            report.committed.push(path);
        }
        self.remove_orphans(orphans, &mut report);
        if let Some(e) = failure {
            return Err(e);
        }
        if !report.committed.is_empty() {
            info!(resources = report.committed.len(), binaries = report.binaries_copied.len(), "commit finished");
        }
        Ok(report)
    }

    fn commit_path(
        &self,
        path: &ResourcePath,
        set: &PropertySet,
        report: &mut CommitReport,
        orphans: &mut Vec<PathBuf>,
    ) -> Result<(), StorageError> {
        let dir = self.resource_dir(path);
        fs::create_dir_all(&dir)?;

        let previous_names = match read_document(&dir) {
            Ok(doc) => doc.map(|d| d.binary_names()).unwrap_or_default(),
            Err(e) => {
                warn!(path = %path, error = %e, "previous properties unreadable; orphaned binaries are kept");
                BTreeSet::new()
            }
        };

        let (mut doc, created) = self.codec.encode_tracked(set)?;
        let stored = self.store_document(&dir, set, &mut doc, &created, report);
        for handle in &created {
            handle.dispose();
        }
        stored?;

        for format in CompressionFormat::ALL {
            if format == self.config.compression {
                continue;
            }
            let stale = property_file(&dir, format);
            if stale.exists() {
                if let Err(e) = fs::remove_file(&stale) {
                    warn!(file = %stale.display(), error = %e, "could not remove stale property file");
                }
            }
        }

        let current_names = doc.binary_names();
        orphans.extend(
            previous_names
                .difference(&current_names)
                .filter(|name| !binary::is_temporary_name(name))
                .map(|name| dir.join(name)),
        );
        Ok(())
    }

    /// Copies every binary `doc` references into `dir` under its content
    /// name, rewrites the references, and writes the document.
    fn store_document(
        &self,
        dir: &Path,
        set: &PropertySet,
        doc: &mut PropertyDocument,
        created: &[BinaryHandle],
        report: &mut CommitReport,
    ) -> Result<(), StorageError> {
        // Binaries by the name the codec wrote for them.
        let mut sources: HashMap<String, PathBuf> = created
            .iter()
            .map(|h| (h.name(), h.path().to_path_buf()))
            .collect();
        for value in set.values() {
            for_each_binary(value, &mut |h: &BinaryHandle| {
                sources.insert(h.name(), h.path().to_path_buf());
            });
        }

        let mut renames = HashMap::new();
        for name in doc.binary_names() {
            let source = sources.get(&name).cloned().unwrap_or_else(|| dir.join(&name));
            if source.parent() == Some(dir) && is_permanent_binary_name(&name) {
                continue;
            }
            let stored = permanent_binary_name(&hash_file(&source)?);
            let target = dir.join(&stored);
            if !target.exists() {
                fs::copy(&source, &target)?;
                report.binaries_copied.push(target);
            }
            renames.insert(name, stored);
        }
        doc.rename_binaries(|old| renames.get(old).cloned());

        self.write_document(dir, doc)
    }

    fn remove_orphans(&self, orphans: Vec<PathBuf>, report: &mut CommitReport) {
        if orphans.is_empty() {
            return;
        }
        let mut in_use = HashSet::new();
        for path in self.overlay.paths() {
            if let Some(set) = self.overlay.get(&path) {
                for value in set.values() {
                    for_each_binary(value, &mut |h: &BinaryHandle| {
                        in_use.insert(h.path().to_path_buf());
                    });
                }
            }
        }
        for orphan in orphans {
            if in_use.contains(&orphan) {
                debug!(file = %orphan.display(), "keeping unreferenced binary still read by the overlay");
                continue;
            }
            match fs::remove_file(&orphan) {
                Ok(()) => report.binaries_removed.push(orphan),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(file = %orphan.display(), error = %e, "could not remove orphaned binary"),
            }
        }
    }

    fn write_document(&self, dir: &Path, doc: &PropertyDocument) -> Result<(), StorageError> {
        let target = property_file(dir, self.config.compression);
        let mut tmp_name = target.clone().into_os_string();
        tmp_name.push(".tmp");
        let tmp = PathBuf::from(tmp_name);

        let written = (|| -> Result<(), StorageError> {
            let file = File::create(&tmp)?;
            let mut writer = self.config.compression.wrap_writer(BufWriter::new(file));
            doc.to_writer(&mut writer, self.config.pretty_print)?;
            let buffered = writer.finish()?;
            let file = buffered.into_inner().map_err(|e| e.into_error())?;
            file.sync_all()?;
            Ok(())
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e);
        }
        fs::rename(&tmp, &target)?;
        Ok(())
    }
}

/// Path of the property document of `dir` in `format`.
pub fn property_file(dir: &Path, format: CompressionFormat) -> PathBuf {
    dir.join(format!("{PROPERTY_FILE_STEM}{}", format.extension()))
}

/// Reads the first property document found in `dir`, in format order.
pub fn read_document(dir: &Path) -> Result<Option<PropertyDocument>, StorageError> {
    for format in CompressionFormat::ALL {
        let path = property_file(dir, format);
        if !path.is_file() {
            continue;
        }
        let reader = format.wrap_reader(BufReader::new(File::open(&path)?));
        return PropertyDocument::from_reader(reader).map(Some);
    }
    Ok(None)
}

fn for_each_binary(value: &Value, f: &mut impl FnMut(&BinaryHandle)) {
    match value {
        Value::Binary(handle) => f(handle),
        Value::Array(array) => {
            for item in array.items() {
                for_each_binary(item, f);
            }
        }
        _ => {}
    }
}
