//! Typed values stored in the variable pool
//!
//! Every value that enters the pool is normalized into a [`Segment`]. Nodes exchange plain
//! JSON; the conversion rules are:
//!
//! | JSON                                   | Segment       |
//! |----------------------------------------|---------------|
//! | `null`                                 | `None`        |
//! | string                                 | `String`      |
//! | integer                                | `Integer`     |
//! | integer above `i64::MAX`               | `Unsigned`    |
//! | other number                           | `Float`       |
//! | bool                                   | `Boolean`     |
//! | object with `model_identity: __file__` | `File`        |
//! | other object                           | `Object`      |
//! | non-empty array of files               | `ArrayFile`   |
//! | other array                            | `Array`       |

use super::file::File;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use uuid::Uuid;

/// Immutable typed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "value_type", content = "value", rename_all = "snake_case")]
pub enum Segment {
    None,
    String(String),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Boolean(bool),
    Object(Map<String, Value>),
    Array(Vec<Value>),
    File(File),
    ArrayFile(Vec<File>),
    Group(SegmentGroup),
}

/// Kind tag of a [`Segment`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SegmentType {
    None,
    String,
    Integer,
    Float,
    Boolean,
    Object,
    Array,
    File,
    ArrayFile,
    Group,
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SegmentType::None => "none",
            SegmentType::String => "string",
            SegmentType::Integer => "integer",
            SegmentType::Float => "float",
            SegmentType::Boolean => "boolean",
            SegmentType::Object => "object",
            SegmentType::Array => "array",
            SegmentType::File => "file",
            SegmentType::ArrayFile => "array-file",
            SegmentType::Group => "group",
        };
        f.write_str(name)
    }
}

impl Segment {
    pub fn value_type(&self) -> SegmentType {
        match self {
            Segment::None => SegmentType::None,
            Segment::String(_) => SegmentType::String,
            Segment::Integer(_) | Segment::Unsigned(_) => SegmentType::Integer,
            Segment::Float(_) => SegmentType::Float,
            Segment::Boolean(_) => SegmentType::Boolean,
            Segment::Object(_) => SegmentType::Object,
            Segment::Array(_) => SegmentType::Array,
            Segment::File(_) => SegmentType::File,
            Segment::ArrayFile(_) => SegmentType::ArrayFile,
            Segment::Group(_) => SegmentType::Group,
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Segment::None)
    }

    /// Plain JSON form
    pub fn to_value(&self) -> Value {
        match self {
            Segment::None => Value::Null,
            Segment::String(s) => Value::String(s.clone()),
            Segment::Integer(i) => Value::from(*i),
            Segment::Unsigned(u) => Value::from(*u),
            Segment::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            Segment::Boolean(b) => Value::Bool(*b),
            Segment::Object(map) => Value::Object(map.clone()),
            Segment::Array(items) => Value::Array(items.clone()),
            Segment::File(file) => file.to_value(),
            Segment::ArrayFile(files) => Value::Array(files.iter().map(File::to_value).collect()),
            Segment::Group(group) => Value::Array(group.0.iter().map(Segment::to_value).collect()),
        }
    }

    /// Text rendering used when a value is interpolated into a template
    pub fn text(&self) -> String {
        match self {
            Segment::None => String::new(),
            Segment::String(s) => s.clone(),
            Segment::Integer(i) => i.to_string(),
            Segment::Unsigned(u) => u.to_string(),
            Segment::Float(f) => f.to_string(),
            Segment::Boolean(b) => b.to_string(),
            Segment::Object(_) | Segment::Array(_) => self.to_value().to_string(),
            Segment::File(_) | Segment::ArrayFile(_) => String::new(),
            Segment::Group(group) => group.text(),
        }
    }

    /// Markdown rendering used for streamed answers
    pub fn markdown(&self) -> String {
        match self {
            Segment::File(file) => file.markdown(),
            Segment::ArrayFile(files) => files
                .iter()
                .map(File::markdown)
                .collect::<Vec<_>>()
                .join("\n"),
            Segment::Object(map) => {
                serde_json::to_string_pretty(map).unwrap_or_else(|_| self.text())
            }
            Segment::Array(items) => items
                .iter()
                .map(|item| format!("- {}", Segment::from(item.clone()).markdown()))
                .collect::<Vec<_>>()
                .join("\n"),
            Segment::Group(group) => group.markdown(),
            _ => self.text(),
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Segment::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Segment::Integer(i) => Some(*i as f64),
            Segment::Unsigned(u) => Some(*u as f64),
            Segment::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Elements of an array-like segment as JSON values
    pub fn to_array(&self) -> Option<Vec<Value>> {
        match self {
            Segment::Array(items) => Some(items.clone()),
            Segment::ArrayFile(files) => Some(files.iter().map(File::to_value).collect()),
            _ => None,
        }
    }

    /// Every file contained in this segment
    pub fn files(&self) -> Vec<File> {
        match self {
            Segment::File(file) => vec![file.clone()],
            Segment::ArrayFile(files) => files.clone(),
            Segment::Group(group) => group.0.iter().flat_map(Segment::files).collect(),
            _ => Vec::new(),
        }
    }
}

impl From<Value> for Segment {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Segment::None,
            Value::Bool(b) => Segment::Boolean(b),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Segment::Integer(i)
                } else if let Some(u) = n.as_u64() {
                    Segment::Unsigned(u)
                } else {
                    Segment::Float(n.as_f64().unwrap_or_default())
                }
            }
            Value::String(s) => Segment::String(s),
            Value::Object(map) => {
                if File::is_file_value_map(&map) {
                    if let Ok(file) = serde_json::from_value(Value::Object(map.clone())) {
                        return Segment::File(file);
                    }
                }
                Segment::Object(map)
            }
            Value::Array(items) => {
                if !items.is_empty() && items.iter().all(File::is_file_value) {
                    let files: Option<Vec<File>> = items.iter().map(File::from_value).collect();
                    if let Some(files) = files {
                        return Segment::ArrayFile(files);
                    }
                }
                Segment::Array(items)
            }
        }
    }
}

impl From<&Value> for Segment {
    fn from(value: &Value) -> Self {
        Segment::from(value.clone())
    }
}

impl From<&str> for Segment {
    fn from(value: &str) -> Self {
        Segment::String(value.to_string())
    }
}

impl From<String> for Segment {
    fn from(value: String) -> Self {
        Segment::String(value)
    }
}

impl From<i64> for Segment {
    fn from(value: i64) -> Self {
        Segment::Integer(value)
    }
}

impl From<i32> for Segment {
    fn from(value: i32) -> Self {
        Segment::Integer(value as i64)
    }
}

impl From<usize> for Segment {
    fn from(value: usize) -> Self {
        match i64::try_from(value) {
            Ok(i) => Segment::Integer(i),
            Err(_) => Segment::Unsigned(value as u64),
        }
    }
}

impl From<f64> for Segment {
    fn from(value: f64) -> Self {
        Segment::Float(value)
    }
}

impl From<bool> for Segment {
    fn from(value: bool) -> Self {
        Segment::Boolean(value)
    }
}

impl From<Map<String, Value>> for Segment {
    fn from(value: Map<String, Value>) -> Self {
        Segment::from(Value::Object(value))
    }
}

impl From<Vec<Value>> for Segment {
    fn from(value: Vec<Value>) -> Self {
        Segment::from(Value::Array(value))
    }
}

impl From<File> for Segment {
    fn from(value: File) -> Self {
        Segment::File(value)
    }
}

impl From<Vec<File>> for Segment {
    fn from(value: Vec<File>) -> Self {
        Segment::ArrayFile(value)
    }
}

impl From<SegmentGroup> for Segment {
    fn from(value: SegmentGroup) -> Self {
        Segment::Group(value)
    }
}

/// Ordered sequence of segments produced by template rendering
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SegmentGroup(pub Vec<Segment>);

impl SegmentGroup {
    pub fn new(segments: Vec<Segment>) -> Self {
        Self(segments)
    }

    pub fn segments(&self) -> &[Segment] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn text(&self) -> String {
        self.0.iter().map(Segment::text).collect()
    }

    pub fn markdown(&self) -> String {
        self.0.iter().map(Segment::markdown).collect()
    }
}

/// A segment bound to a selector and a stable identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Variable {
    pub id: String,

    pub name: String,

    /// Full `(scope_id, name)` address
    pub selector: Vec<String>,

    pub value: Segment,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
}

impl Variable {
    /// A variable with a fresh id
    pub fn new(name: impl Into<String>, value: impl Into<Segment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            selector: Vec::new(),
            value: value.into(),
            description: String::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_selector(mut self, selector: Vec<String>) -> Self {
        self.selector = selector;
        self
    }
}
