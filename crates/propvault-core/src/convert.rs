//! Multi-hop type conversion over an explicit conversion graph.
//!
//! # Architecture
//!
//! The [`ConversionRegistry`] owns the [`TypeRegistry`] and a petgraph
//! `DiGraph` whose nodes are type ids and whose edges are [`Converter`]
//! functions. Resolution for a scalar target runs in fixed order:
//!
//! 1. a value already of the target type (or a subtype) is returned as is;
//! 2. array targets convert element by element;
//! 3. a direct edge from the runtime type, then from each supertype
//!    (depth-first, self first);
//! 4. an edge is usable when its destination is a subtype of the target;
//! 5. one intermediary `Z`, reached from the source closure (never `any`,
//!    `string`, `binary` or `serializable`), then a usable edge `Z -> target`;
//! 6. strings go through the target's text constructor, binaries through its
//!    byte decoder.
//!
//! Anything else is `None`. The search makes at most two hops, so cycles in
//! the graph cannot recurse.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use base64::prelude::{Engine as _, BASE64_STANDARD};
use chrono::DateTime;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use tracing::{trace, warn};

use crate::binary::BinaryHandle;
use crate::type_id::{TypeId, TypeRegistry, ValueType};
use crate::value::{self, Value, ValueArray};

/// A single conversion step. Returns `None` when the value cannot be converted.
pub type Converter = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Types never used as the intermediary of a two-hop conversion.
const INTERMEDIARY_DENY_LIST: [TypeId; 4] = [
    TypeId::ANY,
    TypeId::STRING,
    TypeId::BINARY,
    TypeId::SERIALIZABLE,
];

const NUMERIC_TYPES: [TypeId; 6] = [
    TypeId::BYTE,
    TypeId::SHORT,
    TypeId::INT,
    TypeId::LONG,
    TypeId::FLOAT,
    TypeId::DOUBLE,
];

/// Type registry plus the directed graph of registered conversions.
///
/// Built once at startup, then shared behind `Arc` and only read.
pub struct ConversionRegistry {
    types: TypeRegistry,
    graph: DiGraph<TypeId, Converter>,
    nodes: HashMap<TypeId, NodeIndex>,
}

impl fmt::Debug for ConversionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionRegistry")
            .field("types", &self.types)
            .field("conversions", &self.graph.edge_count())
            .finish()
    }
}

impl ConversionRegistry {
    /// An empty conversion graph over `types`.
    pub fn new(types: TypeRegistry) -> Self {
        ConversionRegistry {
            types,
            graph: DiGraph::new(),
            nodes: HashMap::new(),
        }
    }

    /// The built-in types with the default conversions registered.
    pub fn with_defaults() -> Self {
        Self::with_types(TypeRegistry::new())
    }

    /// `types` with the default conversions registered.
    pub fn with_types(types: TypeRegistry) -> Self {
        let mut registry = Self::new(types);
        registry.register_defaults();
        registry
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.types
    }

    /// Mutable access for registering types during startup.
    pub fn types_mut(&mut self) -> &mut TypeRegistry {
        &mut self.types
    }

    fn node(&mut self, id: TypeId) -> NodeIndex {
        if let Some(idx) = self.nodes.get(&id) {
            return *idx;
        }
        let idx = self.graph.add_node(id);
        self.nodes.insert(id, idx);
        idx
    }

    /// Adds the conversion `from -> to`, replacing any existing one.
    pub fn register<F>(&mut self, from: TypeId, to: TypeId, f: F)
    where
        F: Fn(&Value) -> Option<Value> + Send + Sync + 'static,
    {
        let a = self.node(from);
        let b = self.node(to);
        let converter: Converter = Arc::new(f);
        match self.graph.find_edge(a, b) {
            Some(edge) => self.graph[edge] = converter,
            None => {
                self.graph.add_edge(a, b, converter);
            }
        }
    }

    /// Number of registered conversion edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // -----------------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------------

    /// Converts `value` to `target`, or `None` if no conversion path exists.
    pub fn convert(&self, value: &Value, target: ValueType) -> Option<Value> {
        if value.is_null() {
            return Some(Value::Null);
        }
        let result = match target {
            ValueType::Array(element) => self.convert_to_array(value, element),
            ValueType::Scalar(target) => match value {
                _ if target == TypeId::ANY => Some(value.clone()),
                Value::Array(_) => None,
                _ if self.types.is_subtype(value.type_id(), target) => Some(value.clone()),
                _ => self.convert_scalar(value, target),
            },
        };
        if result.is_none() {
            warn!(
                from = %self.types.value_type_name(value.value_type()),
                to = %self.types.value_type_name(target),
                "no conversion path"
            );
        }
        result
    }

    /// Converts every item to `element` and collects a typed array.
    ///
    /// Items that fail to convert become `Null`. An item that is itself an
    /// array makes the whole conversion fail.
    pub fn convert_iter(&self, items: impl IntoIterator<Item = Value>, element: TypeId) -> Option<Value> {
        let mut out = Vec::new();
        for item in items {
            if let Value::Array(_) = item {
                return None;
            }
            out.push(self.convert(&item, ValueType::Scalar(element)).unwrap_or(Value::Null));
        }
        ValueArray::with_registry(&self.types, element, out)
            .ok()
            .map(Value::Array)
    }

    fn convert_to_array(&self, value: &Value, element: TypeId) -> Option<Value> {
        match value {
            Value::Array(array) if self.types.is_subtype(array.element(), element) => Some(value.clone()),
            Value::Array(array) => self.convert_iter(array.items().iter().cloned(), element),
            Value::Binary(handle) if element == TypeId::BYTE => match handle.read_bytes() {
                Ok(bytes) => Some(Value::bytes(&bytes)),
                Err(e) => {
                    warn!(path = %handle.path().display(), error = %e, "could not read binary");
                    None
                }
            },
            single => self.convert_iter([single.clone()], element),
        }
    }

    fn convert_scalar(&self, value: &Value, target: TypeId) -> Option<Value> {
        let closure = self.types.supertype_closure(value.type_id());

        // Direct edges from the runtime type and its supertypes.
        for &src in &closure {
            for converter in self.usable_edges(src, target) {
                if let Some(converted) = converter(value) {
                    trace!(from = src.0, to = target.0, "direct conversion");
                    return Some(converted);
                }
            }
        }

        // Exactly one intermediary.
        for &src in &closure {
            let Some(&idx) = self.nodes.get(&src) else {
                continue;
            };
            for edge in self.graph.edges(idx) {
                let via = self.graph[edge.target()];
                if via == target || INTERMEDIARY_DENY_LIST.contains(&via) {
                    continue;
                }
                let second = self.second_hop_edges(via, target);
                if second.is_empty() {
                    continue;
                }
                let Some(intermediate) = (edge.weight())(value) else {
                    continue;
                };
                for converter in second {
                    if let Some(converted) = converter(&intermediate) {
                        trace!(from = src.0, via = via.0, to = target.0, "two-hop conversion");
                        return Some(converted);
                    }
                }
            }
        }

        self.terminal_fallback(value, target)
    }

    fn terminal_fallback(&self, value: &Value, target: TypeId) -> Option<Value> {
        let descriptor = self.types.get(target)?;
        match value {
            Value::String(text) => descriptor.text_constructor.as_ref().and_then(|ctor| ctor(text)),
            Value::Binary(handle) => {
                let decoder = descriptor.byte_decoder.as_ref()?;
                let bytes = handle.read_bytes().ok()?;
                decoder(&bytes)
            }
            _ => None,
        }
    }

    /// Edges out of `src` whose destination is usable for `target`: the exact
    /// edge first, then widening ones.
    fn usable_edges(&self, src: TypeId, target: TypeId) -> impl Iterator<Item = &Converter> + '_ {
        let edges: Vec<_> = self
            .nodes
            .get(&src)
            .map(|idx| self.graph.edges(*idx).collect())
            .unwrap_or_default();
        let (exact, widening): (Vec<_>, Vec<_>) = edges
            .into_iter()
            .filter(|e| self.types.is_subtype(self.graph[e.target()], target))
            .partition(|e| self.graph[e.target()] == target);
        exact.into_iter().chain(widening).map(|e| e.weight())
    }

    /// Usable edges out of an intermediary and its supertypes, skipping
    /// supertypes on the deny list.
    fn second_hop_edges(&self, via: TypeId, target: TypeId) -> Vec<&Converter> {
        self.types
            .supertype_closure(via)
            .into_iter()
            .filter(|sup| !INTERMEDIARY_DENY_LIST.contains(sup))
            .flat_map(|sup| self.usable_edges(sup, target))
            .collect()
    }

    /// Whether a conversion path exists between the two types, without
    /// running any converter.
    pub fn convertible(&self, from: ValueType, to: ValueType) -> bool {
        match (from, to) {
            (_, ValueType::Scalar(TypeId::ANY)) => true,
            (ValueType::Array(_), ValueType::Scalar(_)) => false,
            (ValueType::Scalar(TypeId::BINARY), ValueType::Array(TypeId::BYTE)) => true,
            (ValueType::Scalar(a), ValueType::Array(b)) | (ValueType::Array(a), ValueType::Array(b)) => {
                self.scalar_convertible(a, b)
            }
            (ValueType::Scalar(a), ValueType::Scalar(b)) => self.scalar_convertible(a, b),
        }
    }

    fn scalar_convertible(&self, from: TypeId, to: TypeId) -> bool {
        if self.types.is_subtype(from, to) {
            return true;
        }
        let closure = self.types.supertype_closure(from);
        if closure.iter().any(|&src| self.usable_edges(src, to).next().is_some()) {
            return true;
        }
        let two_hop = closure.iter().any(|&src| {
            self.nodes.get(&src).is_some_and(|idx| {
                self.graph.edges(*idx).any(|e| {
                    let via = self.graph[e.target()];
                    !INTERMEDIARY_DENY_LIST.contains(&via) && !self.second_hop_edges(via, to).is_empty()
                })
            })
        });
        if two_hop {
            return true;
        }
        self.types.get(to).is_some_and(|d| {
            (from == TypeId::STRING && d.text_constructor.is_some())
                || (from == TypeId::BINARY && d.byte_decoder.is_some())
        })
    }

    // -----------------------------------------------------------------------
    // Defaults
    // -----------------------------------------------------------------------

    fn register_defaults(&mut self) {
        for from in NUMERIC_TYPES {
            for to in NUMERIC_TYPES {
                if from != to {
                    self.register(from, to, move |v| numeric_cast(v, to));
                }
            }
        }

        let to_text = [
            TypeId::BOOLEAN,
            TypeId::CHAR,
            TypeId::DATETIME,
            TypeId::DATE,
            TypeId::TIME,
        ];
        for from in NUMERIC_TYPES.into_iter().chain(to_text) {
            self.register(from, TypeId::STRING, |v| Some(Value::String(v.to_string())));
        }

        for to in NUMERIC_TYPES {
            self.register(TypeId::STRING, to, move |v| parse_numeric(v.as_str()?, to));
        }
        self.register(TypeId::STRING, TypeId::BOOLEAN, |v| {
            let text = v.as_str()?.trim();
            if text.eq_ignore_ascii_case("true") {
                Some(Value::Bool(true))
            } else if text.eq_ignore_ascii_case("false") {
                Some(Value::Bool(false))
            } else {
                None
            }
        });
        self.register(TypeId::STRING, TypeId::CHAR, |v| {
            let mut chars = v.as_str()?.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Some(Value::Char(c)),
                _ => None,
            }
        });
        self.register(TypeId::STRING, TypeId::DATETIME, |v| {
            value::parse_datetime(v.as_str()?).map(Value::DateTime)
        });
        self.register(TypeId::STRING, TypeId::DATE, |v| value::parse_date(v.as_str()?).map(Value::Date));
        self.register(TypeId::STRING, TypeId::TIME, |v| value::parse_time(v.as_str()?).map(Value::Time));

        self.register(TypeId::LONG, TypeId::DATETIME, |v| match v {
            Value::Long(ms) => DateTime::from_timestamp_millis(*ms).map(|dt| Value::DateTime(dt.fixed_offset())),
            _ => None,
        });
        self.register(TypeId::DATETIME, TypeId::LONG, |v| match v {
            Value::DateTime(dt) => Some(Value::Long(dt.timestamp_millis())),
            _ => None,
        });
        self.register(TypeId::DATETIME, TypeId::DATE, |v| match v {
            Value::DateTime(dt) => Some(Value::Date(dt.date_naive())),
            _ => None,
        });
        self.register(TypeId::DATETIME, TypeId::TIME, |v| match v {
            Value::DateTime(dt) => Some(Value::Time(dt.time())),
            _ => None,
        });
        self.register(TypeId::DATE, TypeId::DATETIME, |v| match v {
            Value::Date(d) => d
                .and_hms_opt(0, 0, 0)
                .map(|naive| Value::DateTime(naive.and_utc().fixed_offset())),
            _ => None,
        });

        self.register(TypeId::BINARY, TypeId::LONG, |v| {
            v.as_binary().map(|b| Value::Long(b.length() as i64))
        });
        self.register(TypeId::STRING, TypeId::BINARY, |v| {
            let bytes = BASE64_STANDARD.decode(v.as_str()?.trim()).ok()?;
            BinaryHandle::from_bytes(&bytes).ok().map(Value::Binary)
        });
    }
}

impl Default for ConversionRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Truncating numeric cast, in the manner of primitive `as` casts.
fn numeric_cast(value: &Value, to: TypeId) -> Option<Value> {
    let converted = match value {
        Value::Float(_) | Value::Double(_) => {
            let f = value.as_f64()?;
            match to {
                TypeId::BYTE => Value::Byte(f as u8),
                TypeId::SHORT => Value::Short(f as i16),
                TypeId::INT => Value::Int(f as i32),
                TypeId::LONG => Value::Long(f as i64),
                TypeId::FLOAT => Value::Float(f as f32),
                TypeId::DOUBLE => Value::Double(f),
                _ => return None,
            }
        }
        _ => {
            let i = value.as_i64()?;
            match to {
                TypeId::BYTE => Value::Byte(i as u8),
                TypeId::SHORT => Value::Short(i as i16),
                TypeId::INT => Value::Int(i as i32),
                TypeId::LONG => Value::Long(i),
                TypeId::FLOAT => Value::Float(i as f32),
                TypeId::DOUBLE => Value::Double(i as f64),
                _ => return None,
            }
        }
    };
    Some(converted)
}

fn parse_numeric(text: &str, to: TypeId) -> Option<Value> {
    let text = text.trim();
    match to {
        TypeId::BYTE => text.parse().ok().map(Value::Byte),
        TypeId::SHORT => text.parse().ok().map(Value::Short),
        TypeId::INT => text.parse().ok().map(Value::Int),
        TypeId::LONG => text.parse().ok().map(Value::Long),
        TypeId::FLOAT => text.parse().ok().map(Value::Float),
        TypeId::DOUBLE => text.parse().ok().map(Value::Double),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;
    use serde::{Deserialize, Serialize};

    use crate::type_id::TypeKind;
    use crate::value::ObjectValue;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Celsius(f64);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Kelvin(f64);

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Rankine(f64);

    fn scalar(id: TypeId) -> ValueType {
        ValueType::Scalar(id)
    }

    fn temperature_registry() -> (ConversionRegistry, TypeId, TypeId, TypeId) {
        let mut reg = ConversionRegistry::with_defaults();
        let c = reg.types_mut().register_structured::<Celsius>("celsius").unwrap();
        let k = reg.types_mut().register_structured::<Kelvin>("kelvin").unwrap();
        let r = reg.types_mut().register_structured::<Rankine>("rankine").unwrap();
        reg.register(c, k, move |v| {
            let c = v.as_object()?.downcast_ref::<Celsius>()?;
            Some(Value::Object(ObjectValue::new(k, Kelvin(c.0 + 273.15))))
        });
        reg.register(k, r, move |v| {
            let k = v.as_object()?.downcast_ref::<Kelvin>()?;
            Some(Value::Object(ObjectValue::new(r, Rankine(k.0 * 1.8))))
        });
        (reg, c, k, r)
    }

    #[test]
    fn null_converts_to_null() {
        let reg = ConversionRegistry::with_defaults();
        assert_eq!(reg.convert(&Value::Null, scalar(TypeId::INT)), Some(Value::Null));
    }

    #[test]
    fn instance_of_target_is_returned_unchanged() {
        let reg = ConversionRegistry::with_defaults();
        let v = Value::Int(5);
        assert_eq!(reg.convert(&v, scalar(TypeId::NUMBER)), Some(v.clone()));
        assert_eq!(reg.convert(&v, scalar(TypeId::ANY)), Some(v));
    }

    #[test]
    fn numeric_casts_truncate() {
        let reg = ConversionRegistry::with_defaults();
        assert_eq!(reg.convert(&Value::Double(3.9), scalar(TypeId::INT)), Some(Value::Int(3)));
        assert_eq!(reg.convert(&Value::Int(300), scalar(TypeId::BYTE)), Some(Value::Byte(44)));
        assert_eq!(reg.convert(&Value::Long(7), scalar(TypeId::DOUBLE)), Some(Value::Double(7.0)));
    }

    #[test]
    fn string_parsing() {
        let reg = ConversionRegistry::with_defaults();
        assert_eq!(reg.convert(&Value::from(" 42 "), scalar(TypeId::INT)), Some(Value::Int(42)));
        assert_eq!(reg.convert(&Value::from("TRUE"), scalar(TypeId::BOOLEAN)), Some(Value::Bool(true)));
        assert_eq!(reg.convert(&Value::from("x"), scalar(TypeId::CHAR)), Some(Value::Char('x')));
        assert_eq!(reg.convert(&Value::from("xy"), scalar(TypeId::CHAR)), None);
        assert_eq!(reg.convert(&Value::from("abc"), scalar(TypeId::INT)), None);
        assert_eq!(
            reg.convert(&Value::from("2024-02-29"), scalar(TypeId::DATE)),
            Some(Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap()))
        );
    }

    #[test]
    fn abstract_target_uses_widening_edge() {
        let reg = ConversionRegistry::with_defaults();
        let out = reg.convert(&Value::from("12"), scalar(TypeId::NUMBER)).unwrap();
        assert!(reg.types().is_subtype(out.type_id(), TypeId::NUMBER));
    }

    #[test]
    fn date_to_long_goes_through_datetime() {
        let reg = ConversionRegistry::with_defaults();
        let date = Value::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap());
        assert_eq!(reg.convert(&date, scalar(TypeId::LONG)), Some(Value::Long(86_400_000)));
        assert!(reg.convertible(scalar(TypeId::DATE), scalar(TypeId::LONG)));
    }

    #[test]
    fn custom_chain_resolves_in_two_hops() {
        let (reg, c, _, r) = temperature_registry();
        let v = Value::Object(ObjectValue::new(c, Celsius(0.0)));
        let out = reg.convert(&v, scalar(r)).unwrap();
        let rankine = out.as_object().unwrap().downcast_ref::<Rankine>().unwrap();
        assert!((rankine.0 - 491.67).abs() < 1e-9);
    }

    #[test]
    fn cycles_terminate_with_none() {
        let mut reg = ConversionRegistry::with_defaults();
        let a = reg.types_mut().register_structured::<Celsius>("a").unwrap();
        let b = reg.types_mut().register_structured::<Celsius>("b").unwrap();
        let c = reg.types_mut().register_structured::<Celsius>("c").unwrap();
        reg.register(a, b, move |_| Some(Value::Object(ObjectValue::new(b, Celsius(1.0)))));
        reg.register(b, a, move |_| Some(Value::Object(ObjectValue::new(a, Celsius(2.0)))));
        let v = Value::Object(ObjectValue::new(a, Celsius(0.0)));
        assert_eq!(reg.convert(&v, scalar(c)), None);
        assert!(!reg.convertible(scalar(a), scalar(c)));
    }

    #[test]
    fn no_path_through_string() {
        let reg = ConversionRegistry::with_defaults();
        // bool -> string -> int would need string as intermediary.
        assert_eq!(reg.convert(&Value::Bool(true), scalar(TypeId::INT)), None);
        assert!(!reg.convertible(scalar(TypeId::BOOLEAN), scalar(TypeId::INT)));
    }

    #[test]
    fn register_replaces_edge() {
        let mut reg = ConversionRegistry::with_defaults();
        let before = reg.edge_count();
        reg.register(TypeId::BOOLEAN, TypeId::STRING, |_| Some(Value::from("yes")));
        assert_eq!(reg.edge_count(), before);
        assert_eq!(reg.convert(&Value::Bool(true), scalar(TypeId::STRING)), Some(Value::from("yes")));
    }

    #[test]
    fn structured_text_fallback() {
        let (reg, c, _, _) = temperature_registry();
        let out = reg.convert(&Value::from("21.5"), scalar(c)).unwrap();
        assert_eq!(out.as_object().unwrap().downcast_ref::<Celsius>(), Some(&Celsius(21.5)));
    }

    #[test]
    fn structured_byte_fallback() {
        let (reg, _, k, _) = temperature_registry();
        let handle = BinaryHandle::from_bytes(b"300.0").unwrap();
        let out = reg.convert(&Value::Binary(handle.clone()), scalar(k)).unwrap();
        assert_eq!(out.as_object().unwrap().downcast_ref::<Kelvin>(), Some(&Kelvin(300.0)));
        handle.dispose();
    }

    #[test]
    fn scalar_to_array_wraps() {
        let reg = ConversionRegistry::with_defaults();
        let out = reg.convert(&Value::from("7"), ValueType::Array(TypeId::INT)).unwrap();
        assert_eq!(out, Value::array(TypeId::INT, vec![Value::Int(7)]).unwrap());
    }

    #[test]
    fn array_elements_that_fail_become_null() {
        let reg = ConversionRegistry::with_defaults();
        let input = Value::array(TypeId::STRING, vec![Value::from("1"), Value::from("x")]).unwrap();
        let out = reg.convert(&input, ValueType::Array(TypeId::INT)).unwrap();
        assert_eq!(out.as_array().unwrap().items(), &[Value::Int(1), Value::Null]);
    }

    #[test]
    fn binary_to_byte_array_reads_contents() {
        let reg = ConversionRegistry::with_defaults();
        let handle = BinaryHandle::from_bytes(&[9, 8, 7]).unwrap();
        let out = reg.convert(&Value::Binary(handle.clone()), ValueType::Array(TypeId::BYTE)).unwrap();
        assert_eq!(out.to_byte_vec().unwrap(), vec![9, 8, 7]);
        assert_eq!(reg.convert(&Value::Binary(handle.clone()), scalar(TypeId::LONG)), Some(Value::Long(3)));
        handle.dispose();
    }

    #[test]
    fn convert_iter_rejects_nested_items() {
        let reg = ConversionRegistry::with_defaults();
        let nested = Value::bytes(b"a");
        assert_eq!(reg.convert_iter(vec![Value::Int(1), nested], TypeId::INT), None);
    }

    #[test]
    fn array_to_scalar_has_no_path() {
        let reg = ConversionRegistry::with_defaults();
        assert_eq!(reg.convert(&Value::bytes(b"a"), scalar(TypeId::STRING)), None);
    }

    #[test]
    fn base64_string_to_binary() {
        let reg = ConversionRegistry::with_defaults();
        let out = reg.convert(&Value::from("aGVsbG8="), scalar(TypeId::BINARY)).unwrap();
        let handle = out.as_binary().unwrap();
        assert_eq!(handle.read_bytes().unwrap(), b"hello");
        handle.dispose();
    }

    #[test]
    fn second_hop_uses_supertypes_of_intermediary() {
        let mut reg = ConversionRegistry::with_defaults();
        let measure = reg.types_mut().register("measure", TypeKind::Abstract, &[]).unwrap();
        let metric = reg.types_mut().register_type("metric", &[measure]).unwrap();
        let reading = reg.types_mut().register_structured::<Celsius>("reading").unwrap();
        let report = reg.types_mut().register_structured::<Kelvin>("report").unwrap();
        reg.register(reading, metric, move |v| {
            let c = v.as_object()?.downcast_ref::<Celsius>()?;
            Some(Value::Object(ObjectValue::new(metric, Celsius(c.0))))
        });
        reg.register(measure, report, move |v| {
            let c = v.as_object()?.downcast_ref::<Celsius>()?;
            Some(Value::Object(ObjectValue::new(report, Kelvin(c.0 + 273.15))))
        });

        let v = Value::Object(ObjectValue::new(reading, Celsius(10.0)));
        let out = reg.convert(&v, scalar(report)).unwrap();
        let kelvin = out.as_object().unwrap().downcast_ref::<Kelvin>().unwrap();
        assert!((kelvin.0 - 283.15).abs() < 1e-9);
        assert!(reg.convertible(scalar(reading), scalar(report)));
    }

    fn arbitrary_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<bool>().prop_map(Value::Bool),
            any::<u8>().prop_map(Value::Byte),
            any::<i16>().prop_map(Value::Short),
            any::<i32>().prop_map(Value::Int),
            any::<i64>().prop_map(Value::Long),
            "[a-z0-9 ]{0,16}".prop_map(Value::String),
        ]
    }

    fn convertible_scalar() -> impl Strategy<Value = Value> {
        prop_oneof![
            arbitrary_scalar(),
            (-1.0e12f64..1.0e12).prop_map(Value::Double),
            "-?[0-9]{1,12}".prop_map(Value::String),
            (1i32..1_000_000).prop_map(|d| Value::Date(NaiveDate::from_num_days_from_ce_opt(d).unwrap())),
        ]
    }

    fn conversion_target() -> impl Strategy<Value = ValueType> {
        prop::sample::select(vec![
            scalar(TypeId::INT),
            scalar(TypeId::LONG),
            scalar(TypeId::DOUBLE),
            scalar(TypeId::NUMBER),
            scalar(TypeId::STRING),
            scalar(TypeId::BOOLEAN),
            scalar(TypeId::DATE),
            scalar(TypeId::DATETIME),
            ValueType::Array(TypeId::INT),
            ValueType::Array(TypeId::LONG),
            ValueType::Array(TypeId::STRING),
        ])
    }

    proptest! {
        #[test]
        fn converting_to_own_type_is_identity(v in arbitrary_scalar()) {
            let reg = ConversionRegistry::with_defaults();
            prop_assert_eq!(reg.convert(&v, v.value_type()), Some(v));
        }

        #[test]
        fn converting_twice_equals_converting_once(v in convertible_scalar(), target in conversion_target()) {
            let reg = ConversionRegistry::with_defaults();
            if let Some(once) = reg.convert(&v, target) {
                prop_assert_eq!(reg.convert(&once, target), Some(once));
            }
        }

        #[test]
        fn int_survives_string_round_trip(n in any::<i32>()) {
            let reg = ConversionRegistry::with_defaults();
            let text = reg.convert(&Value::Int(n), scalar(TypeId::STRING)).unwrap();
            prop_assert_eq!(reg.convert(&text, scalar(TypeId::INT)), Some(Value::Int(n)));
        }

        #[test]
        fn double_survives_string_round_trip(d in -1.0e12f64..1.0e12) {
            let reg = ConversionRegistry::with_defaults();
            let text = reg.convert(&Value::Double(d), scalar(TypeId::STRING)).unwrap();
            prop_assert_eq!(reg.convert(&text, scalar(TypeId::DOUBLE)), Some(Value::Double(d)));
        }

        #[test]
        fn epoch_millis_round_trip(ms in -8_000_000_000_000i64..8_000_000_000_000) {
            let reg = ConversionRegistry::with_defaults();
            let dt = reg.convert(&Value::Long(ms), scalar(TypeId::DATETIME)).unwrap();
            prop_assert_eq!(reg.convert(&dt, scalar(TypeId::LONG)), Some(Value::Long(ms)));
        }
    }
}
