//! Graph definition and the immutable runtime graph
//!
//! A graph definition is a list of nodes and a list of edges:
//!
//! ```json
//! {
//!   "nodes": [
//!     {"id": "start", "data": {"type": "start", "title": "Start"}},
//!     {"id": "answer", "data": {"type": "answer", "title": "Answer", "answer": "{{#start.query#}}"}}
//!   ],
//!   "edges": [{"source": "start", "target": "answer", "sourceHandle": "source"}]
//! }
//! ```
//!
//! [`Graph::init`] turns a definition into a [`Graph`]:
//!
//! 1. pick the root (explicit id, or the `start` node without inbound edges)
//! 2. keep the nodes reachable from the root, so iteration and loop bodies are left out
//! 3. reject unknown edge endpoints and cycles
//! 4. build every node through the [`NodeFactory`]

use crate::error::{GraphError, Result};
use crate::node::{Node, NodeExecutionType, NodeFactory, SOURCE_HANDLE};
use crate::retry::RetryConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// Node type used to find the root of a top-level graph
pub const START_NODE_TYPE: &str = "start";

/// What a node does after its retries are exhausted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorStrategy {
    /// Continue through the node's `fail-branch` edges
    FailBranch,
    /// Continue with the configured default outputs
    DefaultValue,
}

/// One default output used by the `default-value` strategy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefaultValue {
    pub key: String,

    #[serde(rename = "type", default)]
    pub value_type: String,

    pub value: Value,
}

/// The `data` block of a node definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeData {
    #[serde(rename = "type")]
    pub node_type: String,

    #[serde(default)]
    pub title: String,

    /// Iteration that owns this node, for nodes of an iteration body
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iteration_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loop_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_strategy: Option<ErrorStrategy>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub default_value: Vec<DefaultValue>,

    #[serde(default)]
    pub retry_config: RetryConfig,

    /// Node-type specific settings
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NodeData {
    /// Deserialize the whole block into a node-specific settings type
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T> {
        let value = serde_json::to_value(self)?;
        serde_json::from_value(value).map_err(|e| {
            GraphError::Configuration(format!("Invalid '{}' node data: {}", self.node_type, e))
        })
    }

    /// Defaults of the `default-value` strategy as an output map
    pub fn default_outputs(&self) -> Map<String, Value> {
        self.default_value
            .iter()
            .map(|d| (d.key.clone(), d.value.clone()))
            .collect()
    }
}

/// A node definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: String,

    pub data: NodeData,
}

fn default_source_handle() -> String {
    SOURCE_HANDLE.to_string()
}

/// An edge definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub source: String,

    pub target: String,

    #[serde(
        rename = "sourceHandle",
        alias = "source_handle",
        default = "default_source_handle"
    )]
    pub source_handle: String,
}

/// A full graph definition
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub edges: Vec<EdgeConfig>,
}

impl GraphConfig {
    pub fn from_json(content: &str) -> Result<Self> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn from_yaml(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    /// Load from a `.json`, `.yaml` or `.yml` file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&content),
            _ => Self::from_json(&content),
        }
    }

    pub fn node(&self, node_id: &str) -> Option<&NodeConfig> {
        self.nodes.iter().find(|n| n.id == node_id)
    }
}

/// A resolved edge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub id: String,

    /// Source node id
    pub tail: String,

    /// Target node id
    pub head: String,

    pub source_handle: String,
}

/// A node instance plus its definition
#[derive(Clone)]
pub struct GraphNode {
    pub id: String,

    pub node_type: String,

    pub title: String,

    pub execution_type: NodeExecutionType,

    pub data: NodeData,

    pub node: Arc<dyn Node>,
}

impl fmt::Debug for GraphNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GraphNode")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("title", &self.title)
            .field("execution_type", &self.execution_type)
            .finish()
    }
}

/// Immutable runtime graph
#[derive(Debug)]
pub struct Graph {
    root_node_id: String,
    nodes: HashMap<String, GraphNode>,
    node_order: Vec<String>,
    edges: HashMap<String, Edge>,
    edge_order: Vec<String>,
    outgoing: HashMap<String, Vec<String>>,
    incoming: HashMap<String, Vec<String>>,
    node_configs: HashMap<String, NodeConfig>,
}

impl Graph {
    /// Build the graph reachable from `root_node_id`, or from the start node when `None`
    pub fn init(
        config: &GraphConfig,
        factory: &dyn NodeFactory,
        root_node_id: Option<&str>,
    ) -> Result<Self> {
        let mut node_configs: HashMap<String, NodeConfig> = HashMap::new();
        for node in &config.nodes {
            if node_configs.insert(node.id.clone(), node.clone()).is_some() {
                return Err(GraphError::Validation(format!(
                    "Duplicate node id '{}'",
                    node.id
                )));
            }
        }

        let mut all_edges: Vec<Edge> = Vec::with_capacity(config.edges.len());
        let mut edge_ids: HashSet<String> = HashSet::with_capacity(config.edges.len());
        for edge in &config.edges {
            for endpoint in [&edge.source, &edge.target] {
                if !node_configs.contains_key(endpoint) {
                    return Err(GraphError::Validation(format!(
                        "Edge {} -> {} references unknown node '{}'",
                        edge.source, edge.target, endpoint
                    )));
                }
            }
            let id = edge.id.clone().unwrap_or_else(|| {
                format!("{}-{}-{}", edge.source, edge.source_handle, edge.target)
            });
            if !edge_ids.insert(id.clone()) {
                return Err(GraphError::Validation(format!("Duplicate edge id '{}'", id)));
            }
            all_edges.push(Edge {
                id,
                tail: edge.source.clone(),
                head: edge.target.clone(),
                source_handle: edge.source_handle.clone(),
            });
        }

        let has_incoming: HashSet<&str> = all_edges.iter().map(|e| e.head.as_str()).collect();
        let root = match root_node_id {
            Some(id) => {
                if !node_configs.contains_key(id) {
                    return Err(GraphError::Validation(format!("Root node '{}' not found", id)));
                }
                if has_incoming.contains(id) {
                    return Err(GraphError::Validation(format!(
                        "Root node '{}' must not have incoming edges",
                        id
                    )));
                }
                id.to_string()
            }
            None => config
                .nodes
                .iter()
                .find(|n| {
                    n.data.node_type == START_NODE_TYPE && !has_incoming.contains(n.id.as_str())
                })
                .map(|n| n.id.clone())
                .ok_or_else(|| GraphError::Validation("Graph has no start node".to_string()))?,
        };

        let reachable = reachable_from(&root, &all_edges);
        let edges: Vec<Edge> = all_edges
            .into_iter()
            .filter(|e| reachable.contains(&e.tail))
            .collect();

        let node_order: Vec<String> = config
            .nodes
            .iter()
            .filter(|n| reachable.contains(&n.id))
            .map(|n| n.id.clone())
            .collect();

        check_acyclic(&node_order, &edges)?;

        let mut nodes = HashMap::with_capacity(node_order.len());
        for node_id in &node_order {
            let node_config = &node_configs[node_id];
            let node = factory.create(node_config)?;
            nodes.insert(
                node_id.clone(),
                GraphNode {
                    id: node_id.clone(),
                    node_type: node_config.data.node_type.clone(),
                    title: node_config.data.title.clone(),
                    execution_type: node.execution_type(),
                    data: node_config.data.clone(),
                    node,
                },
            );
        }

        let mut outgoing: HashMap<String, Vec<String>> = HashMap::new();
        let mut incoming: HashMap<String, Vec<String>> = HashMap::new();
        let mut edge_map = HashMap::with_capacity(edges.len());
        let mut edge_order = Vec::with_capacity(edges.len());
        for edge in edges {
            outgoing.entry(edge.tail.clone()).or_default().push(edge.id.clone());
            incoming.entry(edge.head.clone()).or_default().push(edge.id.clone());
            edge_order.push(edge.id.clone());
            edge_map.insert(edge.id.clone(), edge);
        }

        Ok(Self {
            root_node_id: root,
            nodes,
            node_order,
            edges: edge_map,
            edge_order,
            outgoing,
            incoming,
            node_configs,
        })
    }

    pub fn root_node_id(&self) -> &str {
        &self.root_node_id
    }

    pub fn root_node(&self) -> Option<&GraphNode> {
        self.nodes.get(&self.root_node_id)
    }

    pub fn node(&self, node_id: &str) -> Option<&GraphNode> {
        self.nodes.get(node_id)
    }

    pub fn contains_node(&self, node_id: &str) -> bool {
        self.nodes.contains_key(node_id)
    }

    /// Node ids in definition order
    pub fn node_ids(&self) -> &[String] {
        &self.node_order
    }

    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.node_order.iter().filter_map(|id| self.nodes.get(id))
    }

    pub fn edge(&self, edge_id: &str) -> Option<&Edge> {
        self.edges.get(edge_id)
    }

    pub fn edges(&self) -> impl Iterator<Item = &Edge> {
        self.edge_order.iter().filter_map(|id| self.edges.get(id))
    }

    pub fn outgoing_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges_by_index(&self.outgoing, node_id)
    }

    pub fn incoming_edges(&self, node_id: &str) -> Vec<&Edge> {
        self.edges_by_index(&self.incoming, node_id)
    }

    fn edges_by_index(&self, index: &HashMap<String, Vec<String>>, node_id: &str) -> Vec<&Edge> {
        index
            .get(node_id)
            .map(|ids| ids.iter().filter_map(|id| self.edges.get(id)).collect())
            .unwrap_or_default()
    }

    /// Raw definition of any node in the configuration, reachable or not
    pub fn node_config(&self, node_id: &str) -> Option<&NodeConfig> {
        self.node_configs.get(node_id)
    }

    /// Ids of response nodes in definition order
    pub fn response_node_ids(&self) -> Vec<String> {
        self.nodes()
            .filter(|n| n.execution_type == NodeExecutionType::Response)
            .map(|n| n.id.clone())
            .collect()
    }
}

fn reachable_from(root: &str, edges: &[Edge]) -> HashSet<String> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        adjacency.entry(edge.tail.as_str()).or_default().push(edge.head.as_str());
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<&str> = VecDeque::from([root]);
    seen.insert(root.to_string());
    while let Some(current) = queue.pop_front() {
        for next in adjacency.get(current).into_iter().flatten() {
            if seen.insert(next.to_string()) {
                queue.push_back(*next);
            }
        }
    }
    seen
}

fn check_acyclic(node_ids: &[String], edges: &[Edge]) -> Result<()> {
    let mut in_degree: HashMap<&str, usize> = node_ids.iter().map(|id| (id.as_str(), 0)).collect();
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    for edge in edges {
        *in_degree.entry(edge.head.as_str()).or_insert(0) += 1;
        adjacency.entry(edge.tail.as_str()).or_default().push(edge.head.as_str());
    }

    let mut queue: VecDeque<&str> = in_degree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut visited = 0;
    while let Some(current) = queue.pop_front() {
        visited += 1;
        for next in adjacency.get(current).into_iter().flatten() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(*next);
                }
            }
        }
    }

    if visited != in_degree.len() {
        return Err(GraphError::Validation("Graph contains a cycle".to_string()));
    }
    Ok(())
}
