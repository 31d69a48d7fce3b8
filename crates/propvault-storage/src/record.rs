//! Stored property records and documents.
//!
//! A property document is one JSON object per resource, mapping property
//! names to tagged records:
//!
//! ```json
//! {
//!   "count": { "type": "int", "value": 42 },
//!   "tags":  { "type": "string", "values": ["a", "b"] },
//!   "blob":  { "type": "binary", "value": "_pv_3f2a9c01d4e5b6a7.bin", "isBinary": true }
//! }
//! ```
//!
//! Parsing is tolerant: each entry is parsed independently and entries that
//! are not valid records are dropped with a warning, so one damaged property
//! never hides the others.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};

use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::warn;

use propvault_core::Value;

use crate::error::StorageError;

/// The decoded properties of one resource.
pub type PropertySet = BTreeMap<String, Value>;

/// The stored value part of a record: exactly one of `value` or `values`.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPayload {
    Value(Json),
    Values(Vec<Json>),
}

/// One stored property.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    /// Registered type name; the element type name for arrays.
    pub type_name: String,
    pub payload: RecordPayload,
    /// When set, string payloads are binary file names.
    pub is_binary: bool,
}

impl PropertyRecord {
    pub fn scalar(type_name: impl Into<String>, value: Json) -> Self {
        PropertyRecord {
            type_name: type_name.into(),
            payload: RecordPayload::Value(value),
            is_binary: false,
        }
    }

    pub fn array(type_name: impl Into<String>, values: Vec<Json>) -> Self {
        PropertyRecord {
            type_name: type_name.into(),
            payload: RecordPayload::Values(values),
            is_binary: false,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self.payload, RecordPayload::Values(_))
    }

    /// Parses one record from its JSON form.
    pub fn from_json(json: &Json) -> Result<Self, StorageError> {
        let obj = json.as_object().ok_or_else(|| invalid("record is not an object"))?;
        let type_name = obj
            .get("type")
            .and_then(Json::as_str)
            .filter(|s| !s.is_empty())
            .ok_or_else(|| invalid("missing 'type'"))?
            .to_string();
        let payload = match (obj.get("value"), obj.get("values")) {
            (Some(value), None) => RecordPayload::Value(value.clone()),
            (None, Some(Json::Array(values))) => RecordPayload::Values(values.clone()),
            (None, Some(_)) => return Err(invalid("'values' is not an array")),
            (Some(_), Some(_)) => return Err(invalid("both 'value' and 'values' present")),
            (None, None) => return Err(invalid("missing 'value' or 'values'")),
        };
        let is_binary = match obj.get("isBinary") {
            None => false,
            Some(Json::Bool(flag)) => *flag,
            Some(_) => return Err(invalid("'isBinary' is not a boolean")),
        };
        Ok(PropertyRecord {
            type_name,
            payload,
            is_binary,
        })
    }

    pub fn to_json(&self) -> Json {
        let mut obj = Map::new();
        obj.insert("type".to_string(), Json::String(self.type_name.clone()));
        match &self.payload {
            RecordPayload::Value(v) => obj.insert("value".to_string(), v.clone()),
            RecordPayload::Values(vs) => obj.insert("values".to_string(), Json::Array(vs.clone())),
        };
        if self.is_binary {
            obj.insert("isBinary".to_string(), Json::Bool(true));
        }
        Json::Object(obj)
    }

    /// File names referenced by a binary record.
    pub fn binary_names(&self) -> Vec<&str> {
        if !self.is_binary {
            return Vec::new();
        }
        match &self.payload {
            RecordPayload::Value(v) => v.as_str().into_iter().collect(),
            RecordPayload::Values(vs) => vs.iter().filter_map(Json::as_str).collect(),
        }
    }

    /// Replaces binary file names for which `rename` returns a new name.
    pub fn rename_binaries(&mut self, rename: &mut impl FnMut(&str) -> Option<String>) {
        if !self.is_binary {
            return;
        }
        let mut apply = |v: &mut Json| {
            if let Some(new) = v.as_str().and_then(&mut *rename) {
                *v = Json::String(new);
            }
        };
        match &mut self.payload {
            RecordPayload::Value(v) => apply(v),
            RecordPayload::Values(vs) => vs.iter_mut().for_each(apply),
        }
    }
}

fn invalid(reason: &str) -> StorageError {
    StorageError::InvalidRecord {
        reason: reason.to_string(),
    }
}

impl Serialize for PropertyRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyRecord {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        PropertyRecord::from_json(&json).map_err(de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// All stored records of one resource, ordered by property name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyDocument {
    records: BTreeMap<String, PropertyRecord>,
}

impl PropertyDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, record: PropertyRecord) -> Option<PropertyRecord> {
        self.records.insert(name.into(), record)
    }

    pub fn get(&self, name: &str) -> Option<&PropertyRecord> {
        self.records.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<PropertyRecord> {
        self.records.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &PropertyRecord)> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Builds a document from a JSON object, dropping invalid entries.
    pub fn from_json(json: &Json) -> Result<Self, StorageError> {
        let obj = json
            .as_object()
            .ok_or_else(|| invalid("property document is not an object"))?;
        let mut doc = PropertyDocument::new();
        for (name, entry) in obj {
            if name.is_empty() || name.contains('/') {
                warn!(name = %name, "dropping property with invalid name");
                continue;
            }
            match PropertyRecord::from_json(entry) {
                Ok(record) => {
                    doc.records.insert(name.clone(), record);
                }
                Err(e) => warn!(name = %name, error = %e, "dropping invalid property record"),
            }
        }
        Ok(doc)
    }

    pub fn from_reader(reader: impl Read) -> Result<Self, StorageError> {
        let json: Json = serde_json::from_reader(reader)?;
        Self::from_json(&json)
    }

    pub fn to_json(&self) -> Json {
        Json::Object(
            self.records
                .iter()
                .map(|(name, record)| (name.clone(), record.to_json()))
                .collect(),
        )
    }

    pub fn to_writer(&self, writer: impl Write, pretty: bool) -> Result<(), StorageError> {
        if pretty {
            serde_json::to_writer_pretty(writer, &self.to_json())?;
        } else {
            serde_json::to_writer(writer, &self.to_json())?;
        }
        Ok(())
    }

    /// Every binary file name referenced by the document.
    pub fn binary_names(&self) -> BTreeSet<String> {
        self.records
            .values()
            .flat_map(|r| r.binary_names())
            .map(str::to_string)
            .collect()
    }

    pub fn rename_binaries(&mut self, mut rename: impl FnMut(&str) -> Option<String>) {
        for record in self.records.values_mut() {
            record.rename_binaries(&mut rename);
        }
    }
}

impl Serialize for PropertyDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(self.records.iter())
    }
}

impl<'de> Deserialize<'de> for PropertyDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let json = Json::deserialize(deserializer)?;
        PropertyDocument::from_json(&json).map_err(de::Error::custom)
    }
}
