//! Resources and their property views.

use std::fs;
use std::sync::Arc;

use propvault_core::binary::INTERNAL_PREFIX;

use crate::store::PropertyStore;
use crate::traits::PropertyMap;
use crate::types::ResourcePath;

/// A resource node: a path in a shared store.
#[derive(Debug, Clone)]
pub struct Resource {
    store: Arc<PropertyStore>,
    path: ResourcePath,
}

impl Resource {
    pub(crate) fn new(store: Arc<PropertyStore>, path: ResourcePath) -> Self {
        Resource { store, path }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    pub fn store(&self) -> &Arc<PropertyStore> {
        &self.store
    }

    /// The last path segment; empty for the root.
    pub fn name(&self) -> &str {
        self.path.segments().last().unwrap_or("")
    }

    pub fn value_map(&self) -> ValueMap {
        ValueMap {
            store: Arc::clone(&self.store),
            path: self.path.clone(),
        }
    }

    pub fn modifiable_value_map(&self) -> ModifiableValueMap {
        ModifiableValueMap {
            store: Arc::clone(&self.store),
            path: self.path.clone(),
        }
    }

    /// The descendant at the relative path `rel`, if it exists.
    pub fn child(&self, rel: &str) -> Option<Resource> {
        let path = self.path.join(rel).ok()?;
        self.store.resource(&path)
    }

    pub fn parent(&self) -> Option<Resource> {
        self.store.resource(&self.path.parent()?)
    }

    /// Direct children, sorted by name. Internal `_pv_` entries are skipped.
    pub fn children(&self) -> Vec<Resource> {
        let Ok(entries) = fs::read_dir(self.store.resource_dir(&self.path)) else {
            return Vec::new();
        };
        let mut names: Vec<String> = entries
            .filter_map(Result::ok)
            .filter(|e| e.file_type().is_ok_and(|t| t.is_dir()))
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .filter(|n| !n.starts_with(INTERNAL_PREFIX))
            .collect();
        names.sort();
        names.iter().filter_map(|n| self.child(n)).collect()
    }
}

/// Read-only view of a resource's properties.
#[derive(Debug, Clone)]
pub struct ValueMap {
    store: Arc<PropertyStore>,
    path: ResourcePath,
}

impl PropertyMap for ValueMap {
    fn store(&self) -> &PropertyStore {
        &self.store
    }

    fn path(&self) -> &ResourcePath {
        &self.path
    }

    fn is_mutable(&self) -> bool {
        false
    }
}

/// Mutable view of a resource's properties. Writes go to the store's overlay
/// until committed.
#[derive(Debug, Clone)]
pub struct ModifiableValueMap {
    store: Arc<PropertyStore>,
    path: ResourcePath,
}

impl PropertyMap for ModifiableValueMap {
    fn store(&self) -> &PropertyStore {
        &self.store
    }

    fn path(&self) -> &ResourcePath {
        &self.path
    }

    fn is_mutable(&self) -> bool {
        true
    }
}
