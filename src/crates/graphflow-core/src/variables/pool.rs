//! The variable pool
//!
//! ```text
//! VariablePool
//!   "sys"          ─► { "query": Variable, "user_id": Variable, "files": Variable }
//!   "env"          ─► { "api_base": Variable }
//!   "conversation" ─► { "memory": Variable }
//!   "rag"          ─► { "<node id>": Variable(Object) }
//!   "<node id>"    ─► { "<output name>": Variable, ... }
//! ```
//!
//! Bindings are always addressed by exactly `(scope_id, name)`. Longer selectors are only
//! valid for reads, where the extra segments walk into a file attribute or into nested
//! object fields.

use super::file::{File, FileAttribute};
use super::segment::{Segment, SegmentGroup, Variable};
use super::selector::{
    CONVERSATION_VARIABLE_NODE_ID, ENVIRONMENT_VARIABLE_NODE_ID, RAG_PIPELINE_VARIABLE_NODE_ID,
    SELECTORS_LENGTH, SYSTEM_VARIABLE_NODE_ID,
};
use super::system::SystemVariables;
use super::template::{split_placeholders, TemplateSegment};
use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;

/// One pipeline input bound to the node it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RagPipelineVariableInput {
    pub node_id: String,
    pub variable: String,
    pub value: Value,
}

/// Scoped store of every value flowing through a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VariablePool {
    variable_dictionary: HashMap<String, HashMap<String, Variable>>,

    #[serde(default)]
    user_inputs: Map<String, Value>,
}

impl VariablePool {
    /// A pool with no bindings
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn builder() -> VariablePoolBuilder {
        VariablePoolBuilder::default()
    }

    /// Bind `value` at `(scope_id, name)`, replacing any previous binding
    pub fn add<S: AsRef<str>>(&mut self, selector: &[S], value: impl Into<Segment>) -> Result<()> {
        let (scope, name) = binding_key(selector)?;
        let variable = Variable::new(name, value).with_selector(vec![scope.clone(), name.to_string()]);
        self.insert(scope, variable);
        Ok(())
    }

    /// Bind a full variable, keeping its id
    pub fn add_variable<S: AsRef<str>>(&mut self, selector: &[S], variable: Variable) -> Result<()> {
        let (scope, name) = binding_key(selector)?;
        let variable = Variable {
            name: name.to_string(),
            selector: vec![scope.clone(), name.to_string()],
            ..variable
        };
        self.insert(scope, variable);
        Ok(())
    }

    fn insert(&mut self, scope: String, variable: Variable) {
        self.variable_dictionary
            .entry(scope)
            .or_default()
            .insert(variable.name.clone(), variable);
    }

    /// Read a value
    ///
    /// Missing scopes, names, keys and unknown file attributes all yield `None`.
    pub fn get<S: AsRef<str>>(&self, selector: &[S]) -> Option<Segment> {
        if selector.len() < SELECTORS_LENGTH {
            return None;
        }
        let variable = self
            .variable_dictionary
            .get(selector[0].as_ref())?
            .get(selector[1].as_ref())?;

        let mut current = variable.value.clone();
        for attr in &selector[SELECTORS_LENGTH..] {
            current = descend(current, attr.as_ref())?;
        }
        Some(current)
    }

    /// The stored variable at `(scope_id, name)`
    pub fn get_variable<S: AsRef<str>>(&self, selector: &[S]) -> Option<&Variable> {
        if selector.len() != SELECTORS_LENGTH {
            return None;
        }
        self.variable_dictionary
            .get(selector[0].as_ref())?
            .get(selector[1].as_ref())
    }

    /// Remove one binding, or a whole scope when only `scope_id` is given
    pub fn remove<S: AsRef<str>>(&mut self, selector: &[S]) {
        match selector.len() {
            0 => {}
            1 => {
                self.variable_dictionary.remove(selector[0].as_ref());
            }
            _ => {
                if let Some(scope) = self.variable_dictionary.get_mut(selector[0].as_ref()) {
                    scope.remove(selector[1].as_ref());
                }
            }
        }
    }

    /// Copy of every binding in a scope, as plain values
    pub fn get_by_prefix(&self, scope_id: &str) -> Map<String, Value> {
        self.variable_dictionary
            .get(scope_id)
            .map(|scope| {
                scope
                    .iter()
                    .map(|(name, variable)| (name.clone(), variable.value.to_value()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn contains_scope(&self, scope_id: &str) -> bool {
        self.variable_dictionary
            .get(scope_id)
            .map(|scope| !scope.is_empty())
            .unwrap_or(false)
    }

    /// Render `{{#a.b#}}` placeholders into an ordered group of segments
    ///
    /// Empty literal parts are dropped. A placeholder that does not resolve is kept as its
    /// dotted path text.
    pub fn convert_template(&self, template: &str) -> SegmentGroup {
        let segments = split_placeholders(template)
            .into_iter()
            .map(|part| match part {
                TemplateSegment::Text { text } => Segment::String(text),
                TemplateSegment::Variable { selector } => self
                    .get(&selector)
                    .unwrap_or_else(|| Segment::String(selector.join("."))),
            })
            .collect();
        SegmentGroup::new(segments)
    }

    /// Seed `sys.*`; names that are already bound keep their existing variable
    pub fn add_system_variables(&mut self, system: &SystemVariables) {
        for (name, value) in system.to_pairs() {
            let exists = self
                .variable_dictionary
                .get(SYSTEM_VARIABLE_NODE_ID)
                .map(|scope| scope.contains_key(name))
                .unwrap_or(false);
            if !exists {
                self.insert(
                    SYSTEM_VARIABLE_NODE_ID.to_string(),
                    Variable::new(name, value)
                        .with_selector(vec![SYSTEM_VARIABLE_NODE_ID.to_string(), name.to_string()]),
                );
            }
        }
    }

    pub fn user_inputs(&self) -> &Map<String, Value> {
        &self.user_inputs
    }

    pub fn set_user_inputs(&mut self, inputs: Map<String, Value>) {
        self.user_inputs = inputs;
    }

    /// Every `(scope_id, name)` currently bound
    pub fn selectors(&self) -> Vec<(String, String)> {
        let mut keys: Vec<(String, String)> = self
            .variable_dictionary
            .iter()
            .flat_map(|(scope, names)| names.keys().map(move |name| (scope.clone(), name.clone())))
            .collect();
        keys.sort();
        keys
    }
}

fn binding_key<S: AsRef<str>>(selector: &[S]) -> Result<(String, &str)> {
    if selector.len() != SELECTORS_LENGTH {
        return Err(GraphError::invalid_selector(selector));
    }
    Ok((selector[0].as_ref().to_string(), selector[1].as_ref()))
}

fn descend(segment: Segment, attr: &str) -> Option<Segment> {
    match segment {
        Segment::File(file) => file_attribute(&file, attr),
        Segment::Object(map) => map.get(attr).map(Segment::from),
        Segment::Array(items) => {
            if items.is_empty() || !items.iter().all(Value::is_object) {
                return None;
            }
            let picked: Vec<Value> = items
                .iter()
                .map(|item| item.get(attr).cloned().unwrap_or(Value::Null))
                .collect();
            Some(Segment::Array(picked))
        }
        _ => None,
    }
}

fn file_attribute(file: &File, attr: &str) -> Option<Segment> {
    FileAttribute::parse(attr).map(|attr| Segment::from(file.attribute(attr)))
}

/// Assembles the pool a run starts with
#[derive(Debug, Default)]
pub struct VariablePoolBuilder {
    system: SystemVariables,
    environment: Vec<Variable>,
    conversation: Vec<Variable>,
    user_inputs: Map<String, Value>,
    rag_inputs: Vec<RagPipelineVariableInput>,
}

impl VariablePoolBuilder {
    pub fn system_variables(mut self, system: SystemVariables) -> Self {
        self.system = system;
        self
    }

    pub fn environment_variables(mut self, variables: Vec<Variable>) -> Self {
        self.environment = variables;
        self
    }

    pub fn conversation_variables(mut self, variables: Vec<Variable>) -> Self {
        self.conversation = variables;
        self
    }

    pub fn user_inputs(mut self, inputs: Map<String, Value>) -> Self {
        self.user_inputs = inputs;
        self
    }

    pub fn rag_pipeline_variables(mut self, inputs: Vec<RagPipelineVariableInput>) -> Self {
        self.rag_inputs = inputs;
        self
    }

    pub fn build(self) -> VariablePool {
        let mut pool = VariablePool {
            variable_dictionary: HashMap::new(),
            user_inputs: self.user_inputs,
        };

        pool.add_system_variables(&self.system);

        for (scope, variables) in [
            (ENVIRONMENT_VARIABLE_NODE_ID, self.environment),
            (CONVERSATION_VARIABLE_NODE_ID, self.conversation),
        ] {
            for variable in variables {
                let name = variable.name.clone();
                pool.insert(
                    scope.to_string(),
                    variable.with_selector(vec![scope.to_string(), name]),
                );
            }
        }

        let mut rag_by_node: HashMap<String, Map<String, Value>> = HashMap::new();
        for input in self.rag_inputs {
            rag_by_node
                .entry(input.node_id)
                .or_default()
                .insert(input.variable, input.value);
        }
        for (node_id, values) in rag_by_node {
            pool.insert(
                RAG_PIPELINE_VARIABLE_NODE_ID.to_string(),
                Variable::new(node_id.clone(), Segment::Object(values)).with_selector(vec![
                    RAG_PIPELINE_VARIABLE_NODE_ID.to_string(),
                    node_id,
                ]),
            );
        }

        pool
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::variables::file::FileType;
    use serde_json::json;

    #[test]
    fn test_add_requires_two_part_selector() {
        let mut pool = VariablePool::empty();
        assert!(matches!(pool.add(&["a"], 1), Err(GraphError::InvalidSelector(_))));
        assert!(matches!(pool.add(&["a", "b", "c"], 1), Err(GraphError::InvalidSelector(_))));
        assert!(pool.add(&["a", "b"], 1).is_ok());
    }

    #[test]
    fn test_add_overwrites() {
        let mut pool = VariablePool::empty();
        pool.add(&["n", "x"], "first").unwrap();
        pool.add(&["n", "x"], "second").unwrap();
        assert_eq!(pool.get(&["n", "x"]), Some(Segment::from("second")));
    }

    #[test]
    fn test_get_nested_object_fields() {
        let mut pool = VariablePool::empty();
        pool.add(&["llm", "usage"], json!({"tokens": {"total": 12}})).unwrap();

        assert_eq!(pool.get(&["llm", "usage", "tokens", "total"]), Some(Segment::Integer(12)));
        assert_eq!(pool.get(&["llm", "usage", "missing"]), None);
        assert_eq!(pool.get(&["llm", "usage", "tokens", "total", "deeper"]), None);
    }

    #[test]
    fn test_get_array_of_objects_field() {
        let mut pool = VariablePool::empty();
        pool.add(&["n", "rows"], json!([{"id": 1}, {"id": 2}, {}])).unwrap();
        assert_eq!(
            pool.get(&["n", "rows", "id"]),
            Some(Segment::Array(vec![json!(1), json!(2), Value::Null]))
        );

        pool.add(&["n", "plain"], json!([1, 2])).unwrap();
        assert_eq!(pool.get(&["n", "plain", "id"]), None);
    }

    #[test]
    fn test_get_file_attributes() {
        let mut pool = VariablePool::empty();
        let file = File::remote(FileType::Image, "https://x/a.png").with_filename("a.png");
        pool.add(&["start", "photo"], file.clone()).unwrap();

        assert_eq!(pool.get(&["start", "photo"]), Some(Segment::File(file.clone())));
        assert_eq!(pool.get(&["start", "photo", "type"]), Some(Segment::from("image")));
        assert_eq!(pool.get(&["start", "photo", "name"]), Some(Segment::from("a.png")));
        assert_eq!(pool.get(&["start", "photo", "extension"]), Some(Segment::from(".png")));
        assert_eq!(pool.get(&["start", "photo", "url"]), Some(Segment::from("https://x/a.png")));
        assert_eq!(pool.get(&["start", "photo", "owner"]), None);
    }

    #[test]
    fn test_short_get_is_none() {
        let pool = VariablePool::empty();
        assert_eq!(pool.get(&["only"]), None);
        assert_eq!(pool.get::<&str>(&[]), None);
    }

    #[test]
    fn test_remove_scope_and_binding() {
        let mut pool = VariablePool::empty();
        pool.add(&["n", "a"], 1).unwrap();
        pool.add(&["n", "b"], 2).unwrap();

        pool.remove(&["n", "a"]);
        assert_eq!(pool.get(&["n", "a"]), None);
        assert_eq!(pool.get(&["n", "b"]), Some(Segment::Integer(2)));

        pool.remove(&["n", "missing"]);
        pool.remove(&["other", "x"]);

        pool.remove(&["n"]);
        assert!(pool.get_by_prefix("n").is_empty());
    }

    #[test]
    fn test_get_by_prefix_is_a_copy() {
        let mut pool = VariablePool::empty();
        pool.add(&["n", "a"], json!({"k": 1})).unwrap();

        let mut view = pool.get_by_prefix("n");
        view.insert("b".to_string(), json!(2));
        assert_eq!(pool.get(&["n", "b"]), None);
        assert_eq!(view["a"], json!({"k": 1}));
    }

    #[test]
    fn test_convert_template() {
        let mut pool = VariablePool::empty();
        pool.add(&["a", "b"], "hello").unwrap();

        let group = pool.convert_template("{{#a.b#}} world");
        assert_eq!(group.segments(), &[Segment::from("hello"), Segment::from(" world")]);
        assert_eq!(group.text(), "hello world");
    }

    #[test]
    fn test_convert_template_unresolved_placeholder() {
        let pool = VariablePool::empty();
        let group = pool.convert_template("x {{#missing.value#}}");
        assert_eq!(group.text(), "x missing.value");
    }

    #[test]
    fn test_system_variable_seeding_is_idempotent() {
        let mut pool = VariablePool::builder()
            .system_variables(SystemVariables::new().with_query("first"))
            .build();
        let id = pool.get_variable(&["sys", "query"]).unwrap().id.clone();

        pool.add_system_variables(&SystemVariables::new().with_query("second"));

        let variable = pool.get_variable(&["sys", "query"]).unwrap();
        assert_eq!(variable.id, id);
        assert_eq!(variable.value, Segment::from("first"));
    }

    #[test]
    fn test_builder_scopes() {
        let pool = VariablePool::builder()
            .environment_variables(vec![Variable::new("api_base", "https://api")])
            .conversation_variables(vec![Variable::new("memory", json!([]))])
            .rag_pipeline_variables(vec![
                RagPipelineVariableInput {
                    node_id: "ds".into(),
                    variable: "url".into(),
                    value: json!("https://doc"),
                },
                RagPipelineVariableInput {
                    node_id: "ds".into(),
                    variable: "depth".into(),
                    value: json!(2),
                },
            ])
            .build();

        assert_eq!(pool.get(&["env", "api_base"]), Some(Segment::from("https://api")));
        assert_eq!(pool.get(&["conversation", "memory"]), Some(Segment::Array(vec![])));
        assert_eq!(pool.get(&["rag", "ds", "depth"]), Some(Segment::Integer(2)));
        assert_eq!(pool.get(&["sys", "files"]), Some(Segment::Array(vec![])));
    }

    #[test]
    fn test_add_variable_keeps_id() {
        let mut pool = VariablePool::empty();
        let variable = Variable::new("ignored", 5).with_id("var-1");
        pool.add_variable(&["conversation", "count"], variable).unwrap();

        let stored = pool.get_variable(&["conversation", "count"]).unwrap();
        assert_eq!(stored.id, "var-1");
        assert_eq!(stored.name, "count");
    }
}
