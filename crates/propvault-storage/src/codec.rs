//! Encoding of typed values into stored records and back.
//!
//! [`PropertyCodec`] maps a [`Value`] to a [`PropertyRecord`] tagged with the
//! registered type name, externalizing binaries (and, when configured,
//! structured objects and byte arrays) into separate files. Decoding resolves
//! the tag through the type registry and runs every stored value through the
//! [`ConversionRegistry`], so any stored form with a conversion path to the
//! declared type is accepted.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use serde_json::{Number, Value as Json};
use tracing::{debug, warn};

use propvault_core::binary::{self, BinaryHandle};
use propvault_core::value::{format_date, format_datetime, format_time};
use propvault_core::{ConversionRegistry, TypeId, Value, ValueType};

use crate::error::StorageError;
use crate::record::{PropertyDocument, PropertyRecord, PropertySet, RecordPayload};

/// Converts between [`Value`]s and their stored [`PropertyRecord`] form.
#[derive(Debug, Clone)]
pub struct PropertyCodec {
    registry: Arc<ConversionRegistry>,
    binaries_as_files: bool,
}

impl PropertyCodec {
    pub fn new(registry: Arc<ConversionRegistry>, binaries_as_files: bool) -> Self {
        PropertyCodec {
            registry,
            binaries_as_files,
        }
    }

    pub fn registry(&self) -> &Arc<ConversionRegistry> {
        &self.registry
    }

    pub fn binaries_as_files(&self) -> bool {
        self.binaries_as_files
    }

    // -----------------------------------------------------------------------
    // Encoding
    // -----------------------------------------------------------------------

    /// Encodes one value.
    ///
    /// Externalized objects and byte arrays are written to fresh temporary
    /// binaries; the record references them by file name.
    pub fn encode(&self, value: &Value) -> Result<PropertyRecord, StorageError> {
        let mut created = Vec::new();
        let encoded = self.encode_into(value, &mut created);
        if encoded.is_err() {
            dispose_all(&created);
        }
        encoded
    }

    /// Encodes every value of a set.
    pub fn encode_set(&self, set: &PropertySet) -> Result<PropertyDocument, StorageError> {
        self.encode_tracked(set).map(|(doc, _)| doc)
    }

    /// Like [`encode_set`](Self::encode_set), also returning the temporary
    /// binaries the encoder created, which the caller disposes once the
    /// document is stored. On error they are already disposed.
    pub fn encode_tracked(
        &self,
        set: &PropertySet,
    ) -> Result<(PropertyDocument, Vec<BinaryHandle>), StorageError> {
        let mut created = Vec::new();
        let mut doc = PropertyDocument::new();
        for (name, value) in set {
            match self.encode_into(value, &mut created) {
                Ok(record) => {
                    doc.insert(name.clone(), record);
                }
                Err(e) => {
                    dispose_all(&created);
                    return Err(e);
                }
            }
        }
        Ok((doc, created))
    }

    fn encode_into(&self, value: &Value, created: &mut Vec<BinaryHandle>) -> Result<PropertyRecord, StorageError> {
        let Value::Array(array) = value else {
            let (type_id, json, is_binary) = self.encode_scalar(value, created)?;
            let mut record = PropertyRecord::scalar(self.type_name(type_id), json);
            record.is_binary = is_binary;
            return Ok(record);
        };

        let element_name = self.type_name(array.element());
        if array.element() == TypeId::BYTE && self.binaries_as_files {
            let bytes = value.to_byte_vec().unwrap_or_default();
            let handle = BinaryHandle::from_bytes(&bytes)?;
            let name = handle.name();
            created.push(handle);
            let mut record = PropertyRecord::array(element_name, vec![Json::String(name)]);
            record.is_binary = true;
            return Ok(record);
        }

        let mut values = Vec::with_capacity(array.len());
        let mut any_binary = false;
        for item in array.items() {
            let (_, json, is_binary) = self.encode_scalar(item, created)?;
            any_binary |= is_binary;
            values.push(json);
        }
        let mut record = PropertyRecord::array(element_name, values);
        record.is_binary = any_binary;
        Ok(record)
    }

    fn encode_scalar(
        &self,
        value: &Value,
        created: &mut Vec<BinaryHandle>,
    ) -> Result<(TypeId, Json, bool), StorageError> {
        let type_id = value.type_id();
        let encoded = match value {
            Value::Null => (TypeId::ANY, Json::Null, false),
            Value::Bool(v) => (type_id, Json::Bool(*v), false),
            Value::Byte(v) => (type_id, Json::from(*v), false),
            Value::Short(v) => (type_id, Json::from(*v), false),
            Value::Int(v) => (type_id, Json::from(*v), false),
            Value::Long(v) => (type_id, Json::from(*v), false),
            Value::Float(v) => (type_id, float_json(f64::from(*v), value), false),
            Value::Double(v) => (type_id, float_json(*v, value), false),
            Value::String(v) => (type_id, Json::String(v.clone()), false),
            Value::Binary(handle) if self.binaries_as_files => {
                (type_id, Json::String(handle.name()), true)
            }
            Value::Binary(handle) => {
                let bytes = handle.read_bytes()?;
                (type_id, Json::String(BASE64_STANDARD.encode(bytes)), false)
            }
            Value::DateTime(v) => (type_id, Json::String(format_datetime(v)), false),
            Value::Date(v) => (type_id, Json::String(format_date(v)), false),
            Value::Time(v) => (type_id, Json::String(format_time(v)), false),
            Value::Object(object) if self.binaries_as_files => {
                let bytes = object.data().to_bytes()?;
                let handle = BinaryHandle::create_temporary()?;
                let name = handle.name();
                created.push(handle.clone());
                handle.write_stream()?.write_all(&bytes)?;
                (type_id, Json::String(name), true)
            }
            Value::Object(object) => (type_id, Json::String(object.data().to_text()?), false),
            Value::Array(_) => {
                return Err(StorageError::invalid_argument("nested arrays cannot be stored"));
            }
            other => {
                debug!(value = %other, "storing value by its text form");
                (type_id, Json::String(other.to_string()), false)
            }
        };
        Ok(encoded)
    }

    fn type_name(&self, id: TypeId) -> String {
        self.registry.types().name_of(id).to_string()
    }

    // -----------------------------------------------------------------------
    // Decoding
    // -----------------------------------------------------------------------

    /// Decodes one record. Binary file names resolve against `resource_dir`,
    /// or against the temp directory for temporary names.
    ///
    /// An unregistered type is an error; values that cannot be converted to
    /// the declared type decode as `Null`.
    pub fn decode(&self, resource_dir: &Path, record: &PropertyRecord) -> Result<Value, StorageError> {
        let element = match self.registry.types().resolve_name(&record.type_name) {
            Some(ValueType::Scalar(id)) | Some(ValueType::Array(id)) => id,
            None => {
                return Err(StorageError::UnknownType {
                    name: record.type_name.clone(),
                })
            }
        };

        match &record.payload {
            RecordPayload::Value(json) => {
                let raw = self.raw_value(resource_dir, json, record.is_binary);
                Ok(self.convert_or_null(&raw, ValueType::Scalar(element)))
            }
            RecordPayload::Values(items) if record.is_binary && element == TypeId::BYTE => {
                let mut bytes = Vec::new();
                for name in items.iter().filter_map(Json::as_str) {
                    match self.open_binary(resource_dir, name).map(|h| h.read_bytes()) {
                        Some(Ok(chunk)) => bytes.extend_from_slice(&chunk),
                        Some(Err(e)) => warn!(file = name, error = %e, "could not read byte array file"),
                        None => {}
                    }
                }
                Ok(Value::bytes(&bytes))
            }
            RecordPayload::Values(items) => {
                let raws: Vec<Value> = items
                    .iter()
                    .map(|json| self.raw_value(resource_dir, json, record.is_binary))
                    .collect();
                match self.registry.convert_iter(raws, element) {
                    Some(array) => Ok(array),
                    None => Err(StorageError::InvalidRecord {
                        reason: format!("values are not an array of '{}'", record.type_name),
                    }),
                }
            }
        }
    }

    /// Decodes a whole document, dropping records that fail to decode.
    pub fn decode_document(&self, resource_dir: &Path, doc: &PropertyDocument) -> PropertySet {
        let mut set = PropertySet::new();
        for (name, record) in doc.iter() {
            match self.decode(resource_dir, record) {
                Ok(value) => {
                    set.insert(name.clone(), value);
                }
                Err(e) => warn!(property = %name, error = %e, "dropping undecodable property"),
            }
        }
        set
    }

    fn convert_or_null(&self, raw: &Value, target: ValueType) -> Value {
        self.registry.convert(raw, target).unwrap_or(Value::Null)
    }

    /// The untyped value of a stored JSON item.
    fn raw_value(&self, resource_dir: &Path, json: &Json, is_binary: bool) -> Value {
        match json {
            Json::String(name) if is_binary => self
                .open_binary(resource_dir, name)
                .map(Value::Binary)
                .unwrap_or(Value::Null),
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Value::Long(i),
                None => n.as_f64().map(Value::Double).unwrap_or(Value::Null),
            },
            Json::String(s) => Value::String(s.clone()),
            other => Value::String(other.to_string()),
        }
    }

    fn open_binary(&self, resource_dir: &Path, name: &str) -> Option<BinaryHandle> {
        if name.contains('/') || name.contains('\\') {
            warn!(file = name, "binary reference is not a plain file name");
            return None;
        }
        let path = if binary::is_temporary_name(name) {
            binary::temp_dir().join(name)
        } else {
            resource_dir.join(name)
        };
        match BinaryHandle::open(&path) {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not open referenced binary");
                None
            }
        }
    }
}

fn dispose_all(handles: &[BinaryHandle]) {
    for handle in handles {
        handle.dispose();
    }
}

/// A finite float as a JSON number, anything else by its text form.
fn float_json(v: f64, value: &Value) -> Json {
    match Number::from_f64(v) {
        Some(n) if v.is_finite() => Json::Number(n),
        _ => {
            debug!(value = %value, "storing non-finite float as text");
            Json::String(value.to_string())
        }
    }
}
