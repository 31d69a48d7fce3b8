//! TypeId and TypeRegistry for nominal typing of stored values.
//!
//! Every storable type has a unique [`TypeId`] providing O(1) identity
//! comparison. The [`TypeRegistry`] maps stable string names (the `type`
//! field of a persisted property record) to [`TypeDescriptor`]s, replacing
//! any kind of runtime class lookup: an unknown name is simply `None`.
//!
//! Types form a small hierarchy through [`TypeDescriptor::supertypes`].
//! Abstract types (`number`, `temporal`, `serializable`) never have values of
//! their own; they exist so conversions and instance checks can be expressed
//! against a family of types. [`TypeId::ANY`] is the implicit root of every
//! type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::value::{ObjectValue, Value};

/// Unique identifier for a type in the type registry.
///
/// The inner value is an index into the [`TypeRegistry`]'s descriptor vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub u32);

impl fmt::Display for TypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeId({})", self.0)
    }
}

/// Pre-registered TypeId constants for built-in types.
impl TypeId {
    pub const ANY: TypeId = TypeId(0);
    pub const NUMBER: TypeId = TypeId(1);
    pub const TEMPORAL: TypeId = TypeId(2);
    pub const SERIALIZABLE: TypeId = TypeId(3);
    pub const BOOLEAN: TypeId = TypeId(4);
    pub const BYTE: TypeId = TypeId(5);
    pub const CHAR: TypeId = TypeId(6);
    pub const SHORT: TypeId = TypeId(7);
    pub const INT: TypeId = TypeId(8);
    pub const LONG: TypeId = TypeId(9);
    pub const FLOAT: TypeId = TypeId(10);
    pub const DOUBLE: TypeId = TypeId(11);
    pub const STRING: TypeId = TypeId(12);
    pub const DATETIME: TypeId = TypeId(13);
    pub const DATE: TypeId = TypeId(14);
    pub const TIME: TypeId = TypeId(15);
    pub const BINARY: TypeId = TypeId(16);
}

/// A conversion target: a single value of a type, or a homogeneous array of it.
///
/// There is no way to name an array of arrays; nested array values are
/// rejected where they are built (see [`ValueArray::new`](crate::value::ValueArray::new)).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Scalar(TypeId),
    Array(TypeId),
}

impl ValueType {
    /// The scalar type, or the element type of an array.
    pub fn element(&self) -> TypeId {
        match self {
            ValueType::Scalar(id) | ValueType::Array(id) => *id,
        }
    }

    pub fn is_array(&self) -> bool {
        matches!(self, ValueType::Array(_))
    }
}

/// Whether a type can have values of its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    /// A grouping type used only for instance checks and conversion lookup.
    Abstract,
    /// A type with values.
    Concrete,
}

/// Builds a value of a type from its text form (the "single text argument
/// constructor" of the type).
pub type TextConstructor = Arc<dyn Fn(&str) -> Option<Value> + Send + Sync>;

/// Builds a value of a type from its serialized byte form.
pub type ByteDecoder = Arc<dyn Fn(&[u8]) -> Option<Value> + Send + Sync>;

/// Everything the registry knows about one type.
#[derive(Clone)]
pub struct TypeDescriptor {
    pub name: String,
    pub kind: TypeKind,
    /// Direct supertypes, in lookup order. [`TypeId::ANY`] is implied.
    pub supertypes: Vec<TypeId>,
    pub text_constructor: Option<TextConstructor>,
    pub byte_decoder: Option<ByteDecoder>,
}

impl fmt::Debug for TypeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeDescriptor")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("supertypes", &self.supertypes)
            .field("text_constructor", &self.text_constructor.is_some())
            .field("byte_decoder", &self.byte_decoder.is_some())
            .finish()
    }
}

/// Registry of all storable types, providing nominal identity via [`TypeId`].
///
/// On construction, the registry pre-registers the 17 built-in types:
/// - `TypeId(0)` = any (abstract root)
/// - `TypeId(1)` = number (abstract)
/// - `TypeId(2)` = temporal (abstract)
/// - `TypeId(3)` = serializable (abstract)
/// - `TypeId(4)..=TypeId(11)` = boolean, byte, char, short, int, long, float, double
/// - `TypeId(12)` = string
/// - `TypeId(13)..=TypeId(15)` = datetime, date, time
/// - `TypeId(16)` = binary
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    /// Descriptors indexed by TypeId.0
    types: Vec<TypeDescriptor>,
    /// Name lookup
    names: HashMap<String, TypeId>,
}

impl TypeRegistry {
    /// Number of built-in types pre-registered on construction.
    const BUILTIN_COUNT: u32 = 17;

    /// Creates a new type registry with the built-in types pre-registered.
    pub fn new() -> Self {
        let mut reg = TypeRegistry {
            types: Vec::with_capacity(Self::BUILTIN_COUNT as usize),
            names: HashMap::new(),
        };

        let builtins: [(&str, TypeKind, &[TypeId]); 17] = [
            ("any", TypeKind::Abstract, &[]),
            ("number", TypeKind::Abstract, &[]),
            ("temporal", TypeKind::Abstract, &[]),
            ("serializable", TypeKind::Abstract, &[]),
            ("boolean", TypeKind::Concrete, &[TypeId::SERIALIZABLE]),
            ("byte", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("char", TypeKind::Concrete, &[TypeId::SERIALIZABLE]),
            ("short", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("int", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("long", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("float", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("double", TypeKind::Concrete, &[TypeId::NUMBER, TypeId::SERIALIZABLE]),
            ("string", TypeKind::Concrete, &[TypeId::SERIALIZABLE]),
            ("datetime", TypeKind::Concrete, &[TypeId::TEMPORAL, TypeId::SERIALIZABLE]),
            ("date", TypeKind::Concrete, &[TypeId::TEMPORAL, TypeId::SERIALIZABLE]),
            ("time", TypeKind::Concrete, &[TypeId::TEMPORAL, TypeId::SERIALIZABLE]),
            ("binary", TypeKind::Concrete, &[]),
        ];
        for (name, kind, supertypes) in builtins {
            reg.push(name, kind, supertypes.to_vec());
        }
        debug_assert_eq!(reg.types.len() as u32, Self::BUILTIN_COUNT);
        reg
    }

    fn push(&mut self, name: &str, kind: TypeKind, supertypes: Vec<TypeId>) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeDescriptor {
            name: name.to_string(),
            kind,
            supertypes,
            text_constructor: None,
            byte_decoder: None,
        });
        self.names.insert(name.to_string(), id);
        id
    }

    /// Registers a named type with the given direct supertypes.
    ///
    /// Returns [`CoreError::DuplicateTypeName`] if the name is taken, and
    /// [`CoreError::UnknownType`] if a supertype id is not registered.
    /// Names starting with `[` are reserved for array type codes.
    pub fn register(
        &mut self,
        name: &str,
        kind: TypeKind,
        supertypes: &[TypeId],
    ) -> Result<TypeId, CoreError> {
        if self.names.contains_key(name) || name.starts_with('[') {
            return Err(CoreError::DuplicateTypeName {
                name: name.to_string(),
            });
        }
        if let Some(missing) = supertypes.iter().find(|id| self.get(**id).is_none()) {
            return Err(CoreError::UnknownType {
                name: missing.to_string(),
            });
        }
        Ok(self.push(name, kind, supertypes.to_vec()))
    }

    /// Registers a concrete type with the given direct supertypes.
    pub fn register_type(&mut self, name: &str, supertypes: &[TypeId]) -> Result<TypeId, CoreError> {
        self.register(name, TypeKind::Concrete, supertypes)
    }

    /// Registers a serde-capable type as a structured, serializable type.
    ///
    /// Values of `T` are carried as [`Value::Object`]. The type's text
    /// constructor parses JSON text, and its byte decoder parses JSON bytes,
    /// so both inline and externalized storage decode back into `T`.
    pub fn register_structured<T>(&mut self, name: &str) -> Result<TypeId, CoreError>
    where
        T: Serialize + DeserializeOwned + PartialEq + fmt::Debug + Send + Sync + 'static,
    {
        let id = self.register(name, TypeKind::Concrete, &[TypeId::SERIALIZABLE])?;
        let descriptor = &mut self.types[id.0 as usize];
        descriptor.text_constructor = Some(Arc::new(move |text: &str| {
            serde_json::from_str::<T>(text)
                .ok()
                .map(|v| Value::Object(ObjectValue::new(id, v)))
        }));
        descriptor.byte_decoder = Some(Arc::new(move |bytes: &[u8]| {
            serde_json::from_slice::<T>(bytes)
                .ok()
                .map(|v| Value::Object(ObjectValue::new(id, v)))
        }));
        Ok(id)
    }

    /// Installs (or replaces) the text constructor of a registered type.
    pub fn set_text_constructor(&mut self, id: TypeId, ctor: TextConstructor) -> Result<(), CoreError> {
        let descriptor = self.get_mut(id)?;
        descriptor.text_constructor = Some(ctor);
        Ok(())
    }

    /// Installs (or replaces) the byte decoder of a registered type.
    pub fn set_byte_decoder(&mut self, id: TypeId, decoder: ByteDecoder) -> Result<(), CoreError> {
        let descriptor = self.get_mut(id)?;
        descriptor.byte_decoder = Some(decoder);
        Ok(())
    }

    fn get_mut(&mut self, id: TypeId) -> Result<&mut TypeDescriptor, CoreError> {
        self.types
            .get_mut(id.0 as usize)
            .ok_or_else(|| CoreError::UnknownType {
                name: id.to_string(),
            })
    }

    /// Looks up a type by its [`TypeId`].
    pub fn get(&self, id: TypeId) -> Option<&TypeDescriptor> {
        self.types.get(id.0 as usize)
    }

    /// Looks up a type's [`TypeId`] by its registered name.
    pub fn get_by_name(&self, name: &str) -> Option<TypeId> {
        self.names.get(name).copied()
    }

    /// Returns the registered name of a type, or `"?"` for an unknown id.
    pub fn name_of(&self, id: TypeId) -> &str {
        self.get(id).map(|d| d.name.as_str()).unwrap_or("?")
    }

    /// Resolves a stored type name to a [`ValueType`].
    ///
    /// Accepts registered names (`int`), the primitive array short codes
    /// (`[Z [B [C [S [I [J [F [D`), and `[name` for an array of any registered
    /// type. Anything else (including `[[...`) is `None`.
    pub fn resolve_name(&self, name: &str) -> Option<ValueType> {
        if let Some(element) = name.strip_prefix('[') {
            let id = match element {
                "Z" => TypeId::BOOLEAN,
                "B" => TypeId::BYTE,
                "C" => TypeId::CHAR,
                "S" => TypeId::SHORT,
                "I" => TypeId::INT,
                "J" => TypeId::LONG,
                "F" => TypeId::FLOAT,
                "D" => TypeId::DOUBLE,
                other => self.get_by_name(other)?,
            };
            return Some(ValueType::Array(id));
        }
        self.get_by_name(name).map(ValueType::Scalar)
    }

    /// Returns the stored name for a [`ValueType`]; arrays use the `[name` form.
    pub fn value_type_name(&self, ty: ValueType) -> String {
        match ty {
            ValueType::Scalar(id) => self.name_of(id).to_string(),
            ValueType::Array(id) => format!("[{}", self.name_of(id)),
        }
    }

    /// Returns `true` if the type cannot have values of its own.
    pub fn is_abstract(&self, id: TypeId) -> bool {
        self.get(id).is_some_and(|d| d.kind == TypeKind::Abstract)
    }

    /// The supertype closure of `id`: depth-first, `id` itself first, each type
    /// once, ending with [`TypeId::ANY`].
    pub fn supertype_closure(&self, id: TypeId) -> Vec<TypeId> {
        let mut closure = Vec::new();
        self.collect_supertypes(id, &mut closure);
        if !closure.contains(&TypeId::ANY) {
            closure.push(TypeId::ANY);
        }
        closure
    }

    fn collect_supertypes(&self, id: TypeId, out: &mut Vec<TypeId>) {
        if out.contains(&id) {
            return;
        }
        out.push(id);
        if let Some(descriptor) = self.get(id) {
            for &sup in &descriptor.supertypes {
                self.collect_supertypes(sup, out);
            }
        }
    }

    /// Returns `true` if values of `sub` are instances of `sup`.
    pub fn is_subtype(&self, sub: TypeId, sup: TypeId) -> bool {
        sup == TypeId::ANY || sub == sup || self.supertype_closure(sub).contains(&sup)
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}
