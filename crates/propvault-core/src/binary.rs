//! File-backed binary handles with temporary/permanent lifecycle.
//!
//! # Architecture
//!
//! A [`BinaryHandle`] is a cheap, clonable reference to one file. Temporary
//! handles live in a process-private directory (`<os temp>/propvault-<uuid>`)
//! and carry the reserved [`TEMP_MARKER`] in their file name, which is how the
//! codec tells a reference to a temporary file from a permanent sibling of a
//! property document.
//!
//! Disposal is explicit and best-effort. [`BinaryHandle::dispose`] deletes a
//! temporary file once; when the delete fails the path is parked in a
//! process-wide pending set. [`shutdown_cleanup`] retries the pending set and
//! removes the private directory. Nothing here relies on `Drop`.

use std::fs::{self, File, OpenOptions};
use std::hash::{Hash, Hasher};
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, LazyLock, OnceLock};

use dashmap::DashSet;
use tracing::{debug, trace, warn};
use uuid::Uuid;

use crate::error::CoreError;

/// Prefix of every engine-owned file.
pub const INTERNAL_PREFIX: &str = "_pv_";
/// Reserved marker identifying temporary binary files.
pub const TEMP_MARKER: &str = ".temporary";
/// Extension of binary files.
pub const BINARY_EXTENSION: &str = ".bin";

static TEMP_DIR: OnceLock<PathBuf> = OnceLock::new();
static PENDING_DELETIONS: LazyLock<DashSet<PathBuf>> = LazyLock::new(DashSet::new);

/// The process-private directory for temporary binaries.
///
/// The path is fixed on first use; the directory itself is created by
/// [`BinaryHandle::create_temporary`].
pub fn temp_dir() -> &'static Path {
    TEMP_DIR.get_or_init(|| std::env::temp_dir().join(format!("propvault-{}", Uuid::new_v4())))
}

/// Returns `true` if `name` carries the temporary marker.
pub fn is_temporary_name(name: &str) -> bool {
    name.contains(TEMP_MARKER)
}

struct Inner {
    path: PathBuf,
    temporary: bool,
    disposed: AtomicBool,
}

/// A handle to binary content stored in a file.
#[derive(Clone)]
pub struct BinaryHandle {
    inner: Arc<Inner>,
}

impl BinaryHandle {
    fn from_path(path: PathBuf, temporary: bool) -> Self {
        BinaryHandle {
            inner: Arc::new(Inner {
                path,
                temporary,
                disposed: AtomicBool::new(false),
            }),
        }
    }

    /// Creates an empty temporary file in the private temp directory.
    pub fn create_temporary() -> Result<Self, CoreError> {
        let dir = temp_dir();
        fs::create_dir_all(dir)?;
        Self::create_temporary_in(dir)
    }

    /// Creates an empty temporary file in `dir`.
    pub fn create_temporary_in(dir: &Path) -> Result<Self, CoreError> {
        let file = tempfile::Builder::new()
            .prefix(INTERNAL_PREFIX)
            .suffix(&format!("{TEMP_MARKER}{BINARY_EXTENSION}"))
            .tempfile_in(dir)?;
        let (_, path) = file.keep().map_err(|e| e.error)?;
        trace!(path = %path.display(), "created temporary binary");
        Ok(Self::from_path(path, true))
    }

    /// Opens an existing file. Temporariness is inferred from the file name.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CoreError> {
        let path = path.as_ref();
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(CoreError::NotFound {
                    path: path.to_path_buf(),
                })
            }
            Err(e) => return Err(e.into()),
        };
        if !meta.is_file() {
            return Err(CoreError::NotAFile {
                path: path.to_path_buf(),
            });
        }
        let temporary = path
            .file_name()
            .is_some_and(|n| is_temporary_name(&n.to_string_lossy()));
        Ok(Self::from_path(path.to_path_buf(), temporary))
    }

    /// Copies the whole stream into a new temporary binary.
    ///
    /// The reader is consumed. On a failed copy the partial file is disposed
    /// and the I/O error returned.
    pub fn from_stream(mut reader: impl Read) -> Result<Self, CoreError> {
        let handle = Self::create_temporary()?;
        let copied = handle
            .write_stream()
            .and_then(|mut file| io::copy(&mut reader, &mut file).map_err(CoreError::from));
        match copied {
            Ok(bytes) => {
                debug!(path = %handle.path().display(), bytes, "stored stream as temporary binary");
                Ok(handle)
            }
            Err(e) => {
                handle.dispose();
                Err(e)
            }
        }
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        Self::from_stream(bytes)
    }

    /// Current file length in bytes; 0 if the file cannot be read.
    pub fn length(&self) -> u64 {
        fs::metadata(&self.inner.path).map(|m| m.len()).unwrap_or(0)
    }

    /// The file name, without directories.
    pub fn name(&self) -> String {
        self.inner
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default()
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn is_temporary(&self) -> bool {
        self.inner.temporary
    }

    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::Acquire)
    }

    pub fn read_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(fs::read(&self.inner.path)?)
    }

    pub fn read_stream(&self) -> Result<File, CoreError> {
        Ok(File::open(&self.inner.path)?)
    }

    /// Opens the file for writing, truncating existing content.
    pub fn write_stream(&self) -> Result<File, CoreError> {
        Ok(OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.inner.path)?)
    }

    /// Moves the file to `new_path` and returns a handle to it.
    ///
    /// Falls back to copy and remove when a rename is not possible (for
    /// example across devices). This handle is marked disposed.
    pub fn move_to(&self, new_path: impl AsRef<Path>) -> Result<BinaryHandle, CoreError> {
        let new_path = new_path.as_ref();
        if fs::rename(&self.inner.path, new_path).is_err() {
            fs::copy(&self.inner.path, new_path)?;
            if let Err(e) = fs::remove_file(&self.inner.path) {
                warn!(path = %self.inner.path.display(), error = %e, "could not remove moved binary source");
                PENDING_DELETIONS.insert(self.inner.path.clone());
            }
        }
        self.inner.disposed.store(true, Ordering::Release);
        BinaryHandle::open(new_path)
    }

    /// Copies the file to `new_path` and returns a handle to the copy.
    pub fn copy_to(&self, new_path: impl AsRef<Path>) -> Result<BinaryHandle, CoreError> {
        let new_path = new_path.as_ref();
        fs::copy(&self.inner.path, new_path)?;
        BinaryHandle::open(new_path)
    }

    /// Releases the handle. Deletes the file if it is temporary.
    ///
    /// Idempotent and infallible: a failed delete is logged and deferred to
    /// [`shutdown_cleanup`].
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::AcqRel) || !self.inner.temporary {
            return;
        }
        match fs::remove_file(&self.inner.path) {
            Ok(()) => trace!(path = %self.inner.path.display(), "disposed temporary binary"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(path = %self.inner.path.display(), error = %e, "deferring deletion of temporary binary");
                PENDING_DELETIONS.insert(self.inner.path.clone());
            }
        }
    }

    /// Path used for identity: canonical if possible, else absolute.
    fn identity(&self) -> PathBuf {
        fs::canonicalize(&self.inner.path)
            .or_else(|_| std::path::absolute(&self.inner.path))
            .unwrap_or_else(|_| self.inner.path.clone())
    }
}

impl PartialEq for BinaryHandle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner) || self.identity() == other.identity()
    }
}

impl Eq for BinaryHandle {}

impl Hash for BinaryHandle {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl std::fmt::Debug for BinaryHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BinaryHandle")
            .field("path", &self.inner.path)
            .field("temporary", &self.inner.temporary)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Teardown
// ---------------------------------------------------------------------------

/// Outcome of [`shutdown_cleanup`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    /// Pending deletions that succeeded on retry.
    pub removed: usize,
    /// Paths that still could not be deleted.
    pub still_pending: Vec<PathBuf>,
    /// Whether the private temp directory was removed.
    pub temp_dir_removed: bool,
}

/// Number of deletions waiting for a retry.
pub fn pending_deletions() -> usize {
    PENDING_DELETIONS.len()
}

/// Retries every deferred deletion, keeping the ones that still fail.
pub fn retry_pending_deletions() -> CleanupReport {
    let mut report = CleanupReport::default();
    let paths: Vec<PathBuf> = PENDING_DELETIONS.iter().map(|p| p.key().clone()).collect();
    for path in paths {
        match fs::remove_file(&path) {
            Ok(()) => {
                PENDING_DELETIONS.remove(&path);
                report.removed += 1;
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                PENDING_DELETIONS.remove(&path);
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "deferred deletion failed again");
                report.still_pending.push(path);
            }
        }
    }
    report
}

/// Teardown hook: retries deferred deletions, then removes the private temp
/// directory with everything still in it.
pub fn shutdown_cleanup() -> CleanupReport {
    let mut report = retry_pending_deletions();
    if let Some(dir) = TEMP_DIR.get() {
        match fs::remove_dir_all(dir) {
            Ok(()) => report.temp_dir_removed = true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(dir = %dir.display(), error = %e, "could not remove temp directory"),
        }
    }
    debug!(removed = report.removed, pending = report.still_pending.len(), "binary cleanup finished");
    report
}

#[cfg(test)]
pub(crate) fn defer_deletion(path: PathBuf) {
    PENDING_DELETIONS.insert(path);
}
