//! The [`PropertyMap`] trait defining map access to a resource's properties.
//!
//! Both views of a resource implement it: the read-only
//! [`ValueMap`](crate::view::ValueMap) and the mutable
//! [`ModifiableValueMap`](crate::view::ModifiableValueMap). All reads go
//! through the shared [`PropertyStore`], so a write made through a mutable
//! view is visible through every other view of the same resource.

use propvault_core::{Value, ValueType};

use crate::error::StorageError;
use crate::record::PropertySet;
use crate::store::{PropertyInput, PropertyStore};
use crate::types::ResourcePath;

/// Map access to the properties of one resource.
///
/// Implementors provide the store, the path and whether writes are allowed;
/// every operation has a default implementation on top of those.
pub trait PropertyMap {
    fn store(&self) -> &PropertyStore;

    fn path(&self) -> &ResourcePath;

    fn is_mutable(&self) -> bool;

    // -------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------

    /// The value of `name`. Names containing `/` read from a descendant.
    fn get(&self, name: &str) -> Option<Value> {
        self.store().get_property(self.path(), name).ok().flatten()
    }

    /// The value of `name` converted to `ty`, or `None` if absent or not
    /// convertible.
    fn get_as(&self, name: &str, ty: ValueType) -> Option<Value> {
        let value = self.get(name)?;
        self.store().registry().convert(&value, ty)
    }

    fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Property names, sorted.
    fn keys(&self) -> Vec<String> {
        self.store().get(self.path()).into_keys().collect()
    }

    /// A snapshot of all properties.
    fn entries(&self) -> PropertySet {
        self.store().get(self.path())
    }

    fn len(&self) -> usize {
        self.store().get(self.path()).len()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // -------------------------------------------------------------------
    // Writes
    // -------------------------------------------------------------------

    /// Stores a property and returns the previous value.
    ///
    /// Fails with [`StorageError::ImmutableViolation`] on a read-only view.
    fn put(&self, name: &str, input: PropertyInput) -> Result<Option<Value>, StorageError> {
        if !self.is_mutable() {
            return Err(StorageError::ImmutableViolation {
                name: name.to_string(),
            });
        }
        self.store().put(self.path(), name, input)
    }

    /// Removes a property and returns its value.
    ///
    /// Fails with [`StorageError::ImmutableViolation`] on a read-only view.
    fn remove(&self, name: &str) -> Result<Option<Value>, StorageError> {
        if !self.is_mutable() {
            return Err(StorageError::ImmutableViolation {
                name: name.to_string(),
            });
        }
        self.store().remove(self.path(), name)
    }
}
