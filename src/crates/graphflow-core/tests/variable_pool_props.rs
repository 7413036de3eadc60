//! Property checks for variable pool bindings

use graphflow_core::variables::{File, FileType};
use graphflow_core::{Segment, VariablePool};
use proptest::prelude::*;
use serde_json::{json, Value};

fn scope() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}".prop_filter("reserved scopes", |s| {
        !matches!(s.as_str(), "sys" | "env" | "conversation" | "rag")
    })
}

fn name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

fn scalar() -> impl Strategy<Value = Value> {
    prop_oneof![
        any::<i64>().prop_map(Value::from),
        any::<bool>().prop_map(Value::from),
        "[ -~]{0,40}".prop_map(Value::from),
        (-1.0e9f64..1.0e9).prop_map(|f| json!(f)),
    ]
}

fn file() -> impl Strategy<Value = File> {
    let file_type = prop_oneof![
        Just(FileType::Image),
        Just(FileType::Document),
        Just(FileType::Audio),
        Just(FileType::Video),
        Just(FileType::Custom),
    ];
    let filename = "[a-z0-9_]{1,12}\\.[a-z]{2,4}";
    (file_type, "[a-z]{1,12}", filename, -1i64..10_000_000, any::<bool>())
        .prop_map(|(file_type, path, filename, size, remote)| {
            let file = if remote {
                File::remote(file_type, format!("https://files.test/{}", path))
            } else {
                File::local(file_type, path)
            };
            file.with_filename(filename).with_size(size)
        })
}

fn value() -> impl Strategy<Value = Value> {
    prop_oneof![
        scalar(),
        file().prop_map(|file| file.to_value()),
        prop::collection::vec(file(), 1..4)
            .prop_map(|files| Value::Array(files.iter().map(File::to_value).collect())),
        prop::collection::vec(scalar(), 1..5).prop_map(Value::Array),
        prop::collection::btree_map(name(), scalar(), 0..5)
            .prop_map(|m| Value::Object(m.into_iter().collect())),
    ]
}

proptest! {
    #[test]
    fn add_then_get_returns_the_value(scope in scope(), name in name(), value in value()) {
        let mut pool = VariablePool::empty();
        pool.add(&[scope.as_str(), name.as_str()], value.clone()).unwrap();

        let stored = pool.get(&[scope.as_str(), name.as_str()]).unwrap();
        prop_assert_eq!(stored.clone(), Segment::from(value.clone()));
        prop_assert_eq!(stored.to_value(), value);
    }

    #[test]
    fn files_come_back_as_file_segments(scope in scope(), name in name(), file in file()) {
        let mut pool = VariablePool::empty();
        pool.add(&[scope.as_str(), name.as_str()], file.clone()).unwrap();

        let stored = pool.get(&[scope.as_str(), name.as_str()]).unwrap();
        prop_assert_eq!(stored, Segment::File(file.clone()));
        prop_assert_eq!(
            pool.get(&[scope.as_str(), name.as_str(), "size"]),
            Some(Segment::Integer(file.size))
        );
        prop_assert_eq!(
            pool.get(&[scope.as_str(), name.as_str(), "type"]),
            Some(Segment::String(file.file_type.to_string()))
        );
    }

    #[test]
    fn file_lists_come_back_as_array_file(
        scope in scope(),
        name in name(),
        files in prop::collection::vec(file(), 1..4),
    ) {
        let mut pool = VariablePool::empty();
        pool.add(&[scope.as_str(), name.as_str()], files.clone()).unwrap();

        let stored = pool.get(&[scope.as_str(), name.as_str()]).unwrap();
        prop_assert_eq!(stored.clone(), Segment::ArrayFile(files.clone()));
        prop_assert_eq!(stored.files(), files);
    }

    #[test]
    fn removing_a_scope_empties_it(scope in scope(), names in prop::collection::vec(name(), 1..6)) {
        let mut pool = VariablePool::empty();
        for (i, name) in names.iter().enumerate() {
            pool.add(&[scope.as_str(), name.as_str()], i as i64).unwrap();
        }
        pool.remove(&[scope.as_str()]);
        prop_assert!(pool.get_by_prefix(&scope).is_empty());
    }

    #[test]
    fn selectors_of_other_lengths_are_rejected(scope in scope(), parts in prop::collection::vec(name(), 2..5)) {
        let mut pool = VariablePool::empty();
        let mut selector = vec![scope];
        selector.extend(parts);
        prop_assert!(pool.add(&selector, 1).is_err());
        prop_assert!(pool.add(&selector[..1], 1).is_err());
    }
}

#[test]
fn convert_template_keeps_literal_order() {
    let mut pool = VariablePool::empty();
    pool.add(&["a", "b"], "hello").unwrap();

    let group = pool.convert_template("{{#a.b#}} world");
    let texts: Vec<String> = group.segments().iter().map(Segment::text).collect();
    assert_eq!(texts, vec!["hello", " world"]);
}
