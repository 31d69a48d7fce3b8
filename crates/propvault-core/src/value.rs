//! Runtime values carried by properties.
//!
//! [`Value`] is the closed set of shapes the engine can persist: scalars,
//! temporal values, file-backed binaries, registered structured objects, and
//! one level of homogeneous arrays. Arrays of arrays cannot be built; the only
//! way to obtain a [`ValueArray`] is through its checked constructors.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, LazyLock};

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime};
use serde::Serialize;

use crate::binary::BinaryHandle;
use crate::error::CoreError;
use crate::type_id::{TypeId, TypeRegistry, ValueType};

/// ISO-8601 layout used for stored datetimes. Fractional seconds are written
/// with as many digit groups as needed, so nanoseconds survive a round trip.
pub const DATETIME_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";
/// ISO-8601 layout used for stored dates.
pub const DATE_FORMAT: &str = "%Y-%m-%d";
/// ISO-8601 layout used for stored times of day.
pub const TIME_FORMAT: &str = "%H:%M:%S%.f";

static BUILTIN_TYPES: LazyLock<TypeRegistry> = LazyLock::new(TypeRegistry::new);

// ---------------------------------------------------------------------------
// Structured objects
// ---------------------------------------------------------------------------

/// A value of a registered structured type.
///
/// Implemented for every `Serialize + PartialEq` type, so registering a type
/// with [`TypeRegistry::register_structured`] is all that is needed.
pub trait Structured: fmt::Debug + Send + Sync + 'static {
    /// The JSON text form, used when the object is stored inline.
    fn to_text(&self) -> Result<String, CoreError>;

    /// The byte form, used when the object is externalized to a binary.
    fn to_bytes(&self) -> Result<Vec<u8>, CoreError>;

    fn eq_dyn(&self, other: &dyn Structured) -> bool;

    fn as_any(&self) -> &dyn Any;
}

impl<T> Structured for T
where
    T: Serialize + PartialEq + fmt::Debug + Send + Sync + 'static,
{
    fn to_text(&self) -> Result<String, CoreError> {
        Ok(serde_json::to_string(self)?)
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    fn eq_dyn(&self, other: &dyn Structured) -> bool {
        other.as_any().downcast_ref::<T>().is_some_and(|o| o == self)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A structured object tagged with its registered type.
#[derive(Debug, Clone)]
pub struct ObjectValue {
    type_id: TypeId,
    data: Arc<dyn Structured>,
}

impl ObjectValue {
    pub fn new<T: Structured>(type_id: TypeId, value: T) -> Self {
        ObjectValue {
            type_id,
            data: Arc::new(value),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    pub fn data(&self) -> &dyn Structured {
        self.data.as_ref()
    }

    /// Borrows the inner object as `T` if that is its concrete type.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }
}

impl PartialEq for ObjectValue {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id && self.data.eq_dyn(other.data.as_ref())
    }
}

// ---------------------------------------------------------------------------
// Arrays
// ---------------------------------------------------------------------------

/// A one-level homogeneous array. Items are `Null` or instances of `element`.
#[derive(Debug, Clone, PartialEq)]
pub struct ValueArray {
    element: TypeId,
    items: Vec<Value>,
}

impl ValueArray {
    /// Builds an array checked against the built-in type hierarchy.
    pub fn new(element: TypeId, items: Vec<Value>) -> Result<Self, CoreError> {
        Self::with_registry(&BUILTIN_TYPES, element, items)
    }

    /// Builds an array checked against `registry`, for element types with
    /// registered supertypes.
    pub fn with_registry(
        registry: &TypeRegistry,
        element: TypeId,
        items: Vec<Value>,
    ) -> Result<Self, CoreError> {
        for (index, item) in items.iter().enumerate() {
            if let Value::Array(_) = item {
                return Err(CoreError::InvalidShape {
                    reason: format!("item {index} is itself an array"),
                });
            }
            if !item.is_null() && !is_instance(registry, item.type_id(), element) {
                return Err(CoreError::InvalidShape {
                    reason: format!(
                        "item {index} of type '{}' is not an instance of '{}'",
                        registry.name_of(item.type_id()),
                        registry.name_of(element)
                    ),
                });
            }
        }
        Ok(ValueArray { element, items })
    }

    /// Builds an array whose element type is the common type of its non-null
    /// items, or `any` when they differ or there are none.
    pub fn infer(items: Vec<Value>) -> Result<Self, CoreError> {
        let mut element = None;
        for item in items.iter().filter(|v| !v.is_null()) {
            match element {
                None => element = Some(item.type_id()),
                Some(id) if id == item.type_id() => {}
                Some(_) => {
                    element = Some(TypeId::ANY);
                    break;
                }
            }
        }
        Self::new(element.unwrap_or(TypeId::ANY), items)
    }

    pub fn empty(element: TypeId) -> Self {
        ValueArray {
            element,
            items: Vec::new(),
        }
    }

    pub fn element(&self) -> TypeId {
        self.element
    }

    pub fn items(&self) -> &[Value] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Value> {
        self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

fn is_instance(registry: &TypeRegistry, actual: TypeId, expected: TypeId) -> bool {
    // Unknown custom ids cannot be checked against the builtin table.
    if registry.get(actual).is_none() {
        return actual == expected || expected == TypeId::ANY;
    }
    registry.is_subtype(actual, expected)
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// A typed runtime value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Byte(u8),
    Char(char),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    String(String),
    DateTime(DateTime<FixedOffset>),
    Date(NaiveDate),
    Time(NaiveTime),
    Binary(BinaryHandle),
    Object(ObjectValue),
    Array(ValueArray),
}

impl Value {
    /// The runtime type. `Null` reports `any`; arrays report their element type.
    pub fn type_id(&self) -> TypeId {
        match self {
            Value::Null => TypeId::ANY,
            Value::Bool(_) => TypeId::BOOLEAN,
            Value::Byte(_) => TypeId::BYTE,
            Value::Char(_) => TypeId::CHAR,
            Value::Short(_) => TypeId::SHORT,
            Value::Int(_) => TypeId::INT,
            Value::Long(_) => TypeId::LONG,
            Value::Float(_) => TypeId::FLOAT,
            Value::Double(_) => TypeId::DOUBLE,
            Value::String(_) => TypeId::STRING,
            Value::DateTime(_) => TypeId::DATETIME,
            Value::Date(_) => TypeId::DATE,
            Value::Time(_) => TypeId::TIME,
            Value::Binary(_) => TypeId::BINARY,
            Value::Object(o) => o.type_id(),
            Value::Array(a) => a.element(),
        }
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Array(a) => ValueType::Array(a.element()),
            other => ValueType::Scalar(other.type_id()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// A checked array value; see [`ValueArray::new`].
    pub fn array(element: TypeId, items: Vec<Value>) -> Result<Value, CoreError> {
        ValueArray::new(element, items).map(Value::Array)
    }

    /// An array of byte holding `bytes`.
    pub fn bytes(bytes: &[u8]) -> Value {
        Value::Array(ValueArray {
            element: TypeId::BYTE,
            items: bytes.iter().map(|b| Value::Byte(*b)).collect(),
        })
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Integral values widened to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Byte(v) => Some(i64::from(*v)),
            Value::Short(v) => Some(i64::from(*v)),
            Value::Int(v) => Some(i64::from(*v)),
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Numeric values widened to `f64`.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Float(v) => Some(f64::from(*v)),
            Value::Double(v) => Some(*v),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_binary(&self) -> Option<&BinaryHandle> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&ValueArray> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&ObjectValue> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    /// Collects an array of byte back into raw bytes. Null items are skipped.
    pub fn to_byte_vec(&self) -> Option<Vec<u8>> {
        let array = self.as_array()?;
        if array.element() != TypeId::BYTE {
            return None;
        }
        Some(
            array
                .items()
                .iter()
                .filter_map(|v| match v {
                    Value::Byte(b) => Some(*b),
                    _ => None,
                })
                .collect(),
        )
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Byte(v) => write!(f, "{v}"),
            Value::Char(v) => write!(f, "{v}"),
            Value::Short(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Double(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "{v}"),
            Value::DateTime(v) => write!(f, "{}", v.format(DATETIME_FORMAT)),
            Value::Date(v) => write!(f, "{}", v.format(DATE_FORMAT)),
            Value::Time(v) => write!(f, "{}", v.format(TIME_FORMAT)),
            Value::Binary(b) => write!(f, "<binary {} ({} bytes)>", b.name(), b.length()),
            Value::Object(o) => match o.data().to_text() {
                Ok(text) => write!(f, "{text}"),
                Err(_) => write!(f, "{:?}", o.data()),
            },
            Value::Array(a) => {
                write!(f, "[")?;
                for (i, item) in a.items().iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<BinaryHandle> for Value {
    fn from(v: BinaryHandle) -> Self {
        Value::Binary(v)
    }
}

// ---------------------------------------------------------------------------
// ISO-8601 text forms
// ---------------------------------------------------------------------------

pub fn format_datetime(v: &DateTime<FixedOffset>) -> String {
    v.format(DATETIME_FORMAT).to_string()
}

pub fn format_date(v: &NaiveDate) -> String {
    v.format(DATE_FORMAT).to_string()
}

pub fn format_time(v: &NaiveTime) -> String {
    v.format(TIME_FORMAT).to_string()
}

/// Parses an RFC 3339 / ISO-8601 datetime with offset.
pub fn parse_datetime(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_rfc3339(text.trim()).ok()
}

pub fn parse_date(text: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(text.trim(), DATE_FORMAT).ok()
}

/// Parses `HH:MM:SS` with optional fractional seconds.
pub fn parse_time(text: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(text.trim(), "%H:%M:%S%.f").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Tag {
        label: String,
    }

    #[test]
    fn nested_array_rejected() {
        let inner = Value::array(TypeId::INT, vec![Value::Int(1)]).unwrap();
        let err = ValueArray::new(TypeId::ANY, vec![inner]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidShape { .. }));
    }

    #[test]
    fn mismatched_item_rejected() {
        let err = ValueArray::new(TypeId::INT, vec![Value::from("x")]).unwrap_err();
        assert!(matches!(err, CoreError::InvalidShape { .. }));
    }

    #[test]
    fn null_and_subtype_items_accepted() {
        let array = ValueArray::new(TypeId::NUMBER, vec![Value::Int(1), Value::Null, Value::Double(2.5)]).unwrap();
        assert_eq!(array.len(), 3);
        assert_eq!(array.element(), TypeId::NUMBER);
    }

    #[test]
    fn infer_picks_common_type_or_any() {
        let same = ValueArray::infer(vec![Value::Long(1), Value::Null, Value::Long(2)]).unwrap();
        assert_eq!(same.element(), TypeId::LONG);
        let mixed = ValueArray::infer(vec![Value::Long(1), Value::from("a")]).unwrap();
        assert_eq!(mixed.element(), TypeId::ANY);
        assert_eq!(ValueArray::infer(vec![]).unwrap().element(), TypeId::ANY);
    }

    #[test]
    fn value_type_distinguishes_arrays() {
        assert_eq!(Value::Int(3).value_type(), ValueType::Scalar(TypeId::INT));
        assert_eq!(Value::bytes(b"ab").value_type(), ValueType::Array(TypeId::BYTE));
        assert_eq!(Value::Null.value_type(), ValueType::Scalar(TypeId::ANY));
    }

    #[test]
    fn objects_compare_by_content() {
        let a = Value::Object(ObjectValue::new(TypeId(17), Tag { label: "x".into() }));
        let b = Value::Object(ObjectValue::new(TypeId(17), Tag { label: "x".into() }));
        let c = Value::Object(ObjectValue::new(TypeId(17), Tag { label: "y".into() }));
        assert_eq!(a, b);
        assert_ne!(a, c);
        let tag = a.as_object().unwrap().downcast_ref::<Tag>().unwrap();
        assert_eq!(tag.label, "x");
    }

    #[test]
    fn temporal_text_forms() {
        let dt = parse_datetime("2024-03-01T10:20:30.500+02:00").unwrap();
        assert_eq!(format_datetime(&dt), "2024-03-01T10:20:30.500+02:00");
        let d = parse_date("2024-03-01").unwrap();
        assert_eq!(format_date(&d), "2024-03-01");
        let t = parse_time("10:20:30").unwrap();
        assert_eq!(format_time(&t), "10:20:30");
        assert!(parse_date("03/01/2024").is_none());
    }

    #[test]
    fn temporal_text_keeps_sub_millisecond_precision() {
        let text = "2024-01-01T00:00:00.123456789+00:00";
        let dt = parse_datetime(text).unwrap();
        assert_eq!(format_datetime(&dt), text);
        assert_eq!(parse_datetime(&format_datetime(&dt)), Some(dt));

        let t = parse_time("01:02:03.456789").unwrap();
        assert_eq!(format_time(&t), "01:02:03.456789");
        assert_eq!(parse_time(&format_time(&t)), Some(t));
    }

    #[test]
    fn byte_vec_round_trip() {
        let v = Value::bytes(&[1, 2, 255]);
        assert_eq!(v.to_byte_vec().unwrap(), vec![1, 2, 255]);
        assert!(Value::Int(1).to_byte_vec().is_none());
    }
}
