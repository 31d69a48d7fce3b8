//! End-to-end tests for the property store.
//!
//! Each test opens a store over a fresh temp directory and exercises the full
//! path: views -> store overlay -> codec -> compressed document on disk ->
//! a second store re-reading it.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use proptest::prelude::*;
use serde::{Deserialize, Serialize};

use propvault_core::value::{parse_datetime, ObjectValue};
use propvault_core::{ConversionRegistry, TypeId, Value, ValueType};
use propvault_storage::{
    CompressionFormat, PropertyInput, PropertyMap, PropertySet, PropertyStore, ResourcePath,
    StorageError, StoreConfig,
};

fn path(raw: &str) -> ResourcePath {
    ResourcePath::parse(raw).unwrap()
}

fn open(root: &Path, compression: CompressionFormat) -> Arc<PropertyStore> {
    let mut config = StoreConfig::with_root(root);
    config.compression = compression;
    Arc::new(PropertyStore::open(config).unwrap())
}

#[test]
fn test_example_scenario_gzip_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::Gzip);
    let resource = store.create_resource(&path("/content/page")).unwrap();
    let props = resource.modifiable_value_map();

    props.put("count", PropertyInput::Value(Value::Int(42))).unwrap();
    props
        .put("blob", PropertyInput::Stream(Box::new(&b"0123456789"[..])))
        .unwrap();
    assert!(store.is_modified());
    store.commit().unwrap();
    assert!(!store.is_modified());

    let page_dir = dir.path().join("content").join("page");
    let stored = page_dir.join("_pv_properties.json.gz");
    assert!(stored.is_file());
    assert_eq!(&fs::read(&stored).unwrap()[..2], &[0x1f, 0x8b]);

    let reopened = open(dir.path(), CompressionFormat::Gzip);
    let map = reopened.resource(&path("/content/page")).unwrap().value_map();
    assert_eq!(map.get("count"), Some(Value::Int(42)));
    let blob = map.get("blob").unwrap();
    let handle = blob.as_binary().unwrap();
    assert_eq!(handle.length(), 10);
    assert!(!handle.is_temporary());
    assert!(handle.path().starts_with(&page_dir));
    assert_eq!(handle.read_bytes().unwrap(), b"0123456789");
}

#[test]
fn test_every_builtin_survives_commit() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::Deflate);
    let p = path("/all");
    let values: Vec<(&str, Value)> = vec![
        ("null", Value::Null),
        ("bool", Value::Bool(false)),
        ("byte", Value::Byte(255)),
        ("char", Value::Char('q')),
        ("short", Value::Short(i16::MIN)),
        ("int", Value::Int(-7)),
        ("long", Value::Long(1 << 53)),
        ("float", Value::Float(0.25)),
        ("double", Value::Double(std::f64::consts::PI)),
        ("string", Value::from("ünïcode")),
        ("datetime", Value::DateTime(parse_datetime("2020-02-29T12:00:00.001+09:00").unwrap())),
        ("date", Value::Date(NaiveDate::from_ymd_opt(1999, 12, 31).unwrap())),
        ("bytes", Value::bytes(&[1, 2, 3, 4])),
        ("empty", Value::array(TypeId::DOUBLE, vec![]).unwrap()),
        (
            "strings",
            Value::array(TypeId::STRING, vec![Value::from("a"), Value::Null, Value::from("c")]).unwrap(),
        ),
    ];
    for (name, value) in &values {
        store.put(&p, name, value.clone()).unwrap();
    }
    store.commit().unwrap();

    let reopened = open(dir.path(), CompressionFormat::None);
    let set = reopened.get(&p);
    for (name, value) in &values {
        assert_eq!(set.get(*name), Some(value), "{name}");
    }
    let empty = set.get("empty").unwrap();
    assert_eq!(empty.value_type(), ValueType::Array(TypeId::DOUBLE));
}

#[test]
fn test_inline_binaries_when_files_disabled() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = StoreConfig::with_root(dir.path());
    config.binaries_as_files = false;
    let store = PropertyStore::open(config).unwrap();
    let p = path("/inline");
    let handle = store.create_binary(&b"inline bytes"[..]).unwrap();
    store.put(&p, "data", Value::Binary(handle.clone())).unwrap();
    store.commit().unwrap();
    handle.dispose();

    let entries: Vec<String> = fs::read_dir(dir.path().join("inline"))
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    assert_eq!(entries, vec!["_pv_properties.json".to_string()]);

    store.refresh();
    let data = store.get(&p).remove("data").unwrap();
    assert_eq!(data.as_binary().unwrap().read_bytes().unwrap(), b"inline bytes");
}

#[test]
fn test_deep_read_matches_child_read() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::None);
    store.put(&path("/a/b"), "title", Value::from("nested")).unwrap();
    store.commit().unwrap();

    let top = store.resource(&path("/a")).unwrap().value_map();
    let child = store.resource(&path("/a/b")).unwrap().value_map();
    assert_eq!(top.get("b/title"), child.get("title"));
    assert_eq!(top.get("b/title"), Some(Value::from("nested")));
    assert_eq!(store.get_property(&path("/"), "a/b/title").unwrap(), Some(Value::from("nested")));

    assert_eq!(store.get_property(&path("/a"), "missing/title").unwrap(), None);
    assert_eq!(store.get_property(&path("/a"), "b/missing").unwrap(), None);
    assert!(matches!(
        store.put(&path("/a"), "b/title", Value::from("x")),
        Err(StorageError::DeepWriteUnsupported { .. })
    ));
}

#[test]
fn test_revert_restores_committed_state() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::None);
    let p = path("/r");
    store.put(&p, "keep", Value::Int(1)).unwrap();
    store.commit().unwrap();

    store.put(&p, "keep", Value::Int(2)).unwrap();
    store.put(&p, "extra", Value::Bool(true)).unwrap();
    assert_eq!(store.get(&p).len(), 2);
    store.revert();
    assert!(!store.is_modified());
    let set = store.get(&p);
    assert_eq!(set.len(), 1);
    assert_eq!(set.get("keep"), Some(&Value::Int(1)));
}

#[test]
fn test_binary_shared_between_resources_is_copied() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::None);
    store
        .put(&path("/src"), "file", PropertyInput::Stream(Box::new(&b"shared"[..])))
        .unwrap();
    store.commit().unwrap();

    let from_src = store.get(&path("/src")).remove("file").unwrap();
    store.put(&path("/dst"), "file", from_src).unwrap();
    let report = store.commit().unwrap();
    assert_eq!(report.binaries_copied.len(), 1);
    assert!(report.binaries_copied[0].starts_with(dir.path().join("dst")));

    let copy = store.get(&path("/dst")).remove("file").unwrap();
    let src = store.get(&path("/src")).remove("file").unwrap();
    assert_ne!(copy.as_binary().unwrap(), src.as_binary().unwrap());
    assert_eq!(copy.as_binary().unwrap().read_bytes().unwrap(), b"shared");
}

#[test]
fn test_commit_is_per_resource_not_transactional() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::None);
    fs::write(dir.path().join("b"), b"blocks the directory").unwrap();
    store.put(&path("/a"), "x", Value::Int(1)).unwrap();
    store.put(&path("/b"), "x", Value::Int(2)).unwrap();
    store.put(&path("/c"), "x", Value::Int(3)).unwrap();

    match store.commit() {
        Err(StorageError::Commit { path, .. }) => assert_eq!(path, "/b"),
        other => panic!("expected commit failure, got {other:?}"),
    }
    assert!(dir.path().join("a").join("_pv_properties.json").is_file());
    assert_eq!(store.modified_paths(), vec![path("/b"), path("/c")]);
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Author {
    name: String,
    born: i32,
}

#[test]
fn test_structured_values_with_custom_registry() {
    let mut registry = ConversionRegistry::with_defaults();
    let author = registry.types_mut().register_structured::<Author>("author").unwrap();
    let registry = Arc::new(registry);
    let dir = tempfile::tempdir().unwrap();
    let store = PropertyStore::open_with_registry(StoreConfig::with_root(dir.path()), registry.clone()).unwrap();

    let value = Value::Object(ObjectValue::new(
        author,
        Author {
            name: "Ada".into(),
            born: 1815,
        },
    ));
    store.put(&path("/book"), "author", value.clone()).unwrap();
    store.commit().unwrap();

    let reopened = PropertyStore::open_with_registry(StoreConfig::with_root(dir.path()), registry).unwrap();
    assert_eq!(reopened.get(&path("/book")).get("author"), Some(&value));

    // Without the registration the record names an unknown type and is dropped.
    let plain = PropertyStore::open(StoreConfig::with_root(dir.path())).unwrap();
    assert!(plain.get(&path("/book")).get("author").is_none());
}

#[test]
fn test_get_as_converts_stored_values() {
    let dir = tempfile::tempdir().unwrap();
    let store = open(dir.path(), CompressionFormat::None);
    let resource = store.create_resource(&path("/conv")).unwrap();
    let props = resource.modifiable_value_map();
    props
        .put("when", PropertyInput::Value(Value::Date(NaiveDate::from_ymd_opt(1970, 1, 2).unwrap())))
        .unwrap();
    props.put("digits", PropertyInput::Value(Value::from("123"))).unwrap();

    let view = resource.value_map();
    assert_eq!(view.get_as("when", ValueType::Scalar(TypeId::LONG)), Some(Value::Long(86_400_000)));
    assert_eq!(view.get_as("digits", ValueType::Scalar(TypeId::INT)), Some(Value::Int(123)));
    assert_eq!(
        view.get_as("digits", ValueType::Array(TypeId::LONG)),
        Some(Value::array(TypeId::LONG, vec![Value::Long(123)]).unwrap())
    );
    assert_eq!(view.get_as("missing", ValueType::Scalar(TypeId::INT)), None);
}

#[derive(Debug, Clone)]
enum Op {
    Put(usize, i32),
    Remove(usize),
    Revert,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..4, any::<i32>()).prop_map(|(k, v)| Op::Put(k, v)),
        (0usize..4).prop_map(Op::Remove),
        Just(Op::Revert),
    ]
}

const NAMES: [&str; 4] = ["alpha", "beta", "gamma", "delta"];

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_overlay_matches_model(ops in prop::collection::vec(op(), 1..24)) {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), CompressionFormat::None);
        let p = path("/model");
        store.put(&p, "alpha", Value::Int(0)).unwrap();
        store.commit().unwrap();

        let baseline: PropertySet = [("alpha".to_string(), Value::Int(0))].into_iter().collect();
        let mut model = baseline.clone();
        for op in ops {
            match op {
                Op::Put(k, v) => {
                    let previous = store.put(&p, NAMES[k], Value::Int(v)).unwrap();
                    prop_assert_eq!(previous, model.insert(NAMES[k].to_string(), Value::Int(v)));
                }
                Op::Remove(k) => {
                    let previous = store.remove(&p, NAMES[k]).unwrap();
                    prop_assert_eq!(previous, model.remove(NAMES[k]));
                }
                Op::Revert => {
                    store.revert();
                    model = baseline.clone();
                }
            }
            prop_assert_eq!(store.get(&p), model.clone());
        }
    }

    #[test]
    fn prop_strings_round_trip_through_disk(text in "\\PC{0,40}") {
        let dir = tempfile::tempdir().unwrap();
        let store = open(dir.path(), CompressionFormat::Gzip);
        let p = path("/s");
        store.put(&p, "text", Value::from(text.as_str())).unwrap();
        store.commit().unwrap();
        let reopened = open(dir.path(), CompressionFormat::Gzip);
        let props = reopened.get(&p);
        prop_assert_eq!(props.get("text"), Some(&Value::from(text.as_str())));
    }
}
