//! Ordered streaming of response nodes
//!
//! Each response node (`answer`, `end`) owns a session that walks the node's template one
//! segment at a time. Only one session is active at once; the others wait in a queue.
//!
//! ```text
//! upstream chunk ──► buffer[selector] ──┐
//!                                        ├──► try_flush ──► NodeRunStreamChunk (template order)
//! node succeeded ──► variable pool ─────┘
//! ```
//!
//! A session becomes eligible once one of the paths from the root to its node has no
//! unresolved blocking edge left. Blocking edges leave branch nodes, container nodes and nodes
//! with the `fail-branch` error strategy.

use crate::error::{GraphError, Result};
use crate::events::{GraphEngineEvent, NodeEventInfo};
use crate::graph::{ErrorStrategy, Graph};
use crate::node::NodeExecutionType;
use crate::variables::{Template, TemplateSegment, VariablePool};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use uuid::Uuid;

const COORDINATOR_TYPE: &str = "ResponseStreamCoordinator";
const COORDINATOR_VERSION: &str = "1.0";

/// Turns upstream output into ordered stream chunks for response nodes
pub trait ResponseCoordinator: Send {
    /// Start tracking a response node
    fn register(&mut self, response_node_id: &str);

    fn track_node_execution(&mut self, node_id: &str, execution_id: &str);

    /// An edge was taken; may activate sessions
    fn on_edge_taken(&mut self, edge_id: &str, pool: &VariablePool) -> Vec<GraphEngineEvent>;

    /// A node will not run in this pass
    fn on_node_skipped(&mut self, node_id: &str);

    /// Feed a chunk or a node completion; returns the chunks now ready in order
    fn intercept_event(
        &mut self,
        event: &GraphEngineEvent,
        pool: &VariablePool,
    ) -> Vec<GraphEngineEvent>;

    fn dumps(&self) -> Result<String>;

    fn loads(&mut self, data: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct ResponseSession {
    node_id: String,
    template: Template,
    index: usize,
}

impl ResponseSession {
    fn is_complete(&self) -> bool {
        self.index >= self.template.len()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionState {
    node_id: String,
    #[serde(default)]
    index: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StreamBufferState {
    selector: Vec<String>,
    #[serde(default)]
    events: Vec<GraphEngineEvent>,
    #[serde(default)]
    position: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct CoordinatorState {
    #[serde(rename = "type")]
    kind: String,
    version: String,
    #[serde(default)]
    response_nodes: Vec<String>,
    #[serde(default)]
    active_session: Option<SessionState>,
    #[serde(default)]
    waiting_sessions: Vec<SessionState>,
    #[serde(default)]
    pending_sessions: Vec<SessionState>,
    #[serde(default)]
    node_execution_ids: BTreeMap<String, String>,
    #[serde(default)]
    paths_map: BTreeMap<String, Vec<Vec<String>>>,
    #[serde(default)]
    stream_buffers: Vec<StreamBufferState>,
    #[serde(default)]
    closed_streams: Vec<Vec<String>>,
    #[serde(default)]
    skipped_nodes: Vec<String>,
    #[serde(default)]
    finished_nodes: Vec<String>,
}

/// Default [`ResponseCoordinator`]
pub struct ResponseStreamCoordinator {
    graph: Arc<Graph>,
    response_nodes: Vec<String>,
    paths_map: HashMap<String, Vec<Vec<String>>>,
    pending_sessions: HashMap<String, ResponseSession>,
    active_session: Option<ResponseSession>,
    waiting_sessions: VecDeque<ResponseSession>,
    node_execution_ids: HashMap<String, String>,
    stream_buffers: HashMap<Vec<String>, Vec<GraphEngineEvent>>,
    stream_positions: HashMap<Vec<String>, usize>,
    closed_streams: HashSet<Vec<String>>,
    skipped_nodes: HashSet<String>,
    finished_nodes: HashSet<String>,
}

impl ResponseStreamCoordinator {
    pub fn new(graph: Arc<Graph>) -> Self {
        Self {
            graph,
            response_nodes: Vec::new(),
            paths_map: HashMap::new(),
            pending_sessions: HashMap::new(),
            active_session: None,
            waiting_sessions: VecDeque::new(),
            node_execution_ids: HashMap::new(),
            stream_buffers: HashMap::new(),
            stream_positions: HashMap::new(),
            closed_streams: HashSet::new(),
            skipped_nodes: HashSet::new(),
            finished_nodes: HashSet::new(),
        }
    }

    fn session_for(&self, node_id: &str) -> Option<ResponseSession> {
        let node = self.graph.node(node_id)?;
        Some(ResponseSession {
            node_id: node_id.to_string(),
            template: node.node.streaming_template().unwrap_or_default(),
            index: 0,
        })
    }

    /// Blocking edges on every root-to-node path
    fn build_paths(&self, response_node_id: &str) -> Vec<Vec<String>> {
        let root = self.graph.root_node_id();
        if root == response_node_id {
            return vec![Vec::new()];
        }

        let mut complete: Vec<Vec<String>> = Vec::new();
        let mut stack: Vec<(String, Vec<String>, HashSet<String>)> =
            vec![(root.to_string(), Vec::new(), HashSet::new())];
        while let Some((current, path, mut visited)) = stack.pop() {
            if current == response_node_id {
                complete.push(path);
                continue;
            }
            visited.insert(current.clone());
            for edge in self.graph.outgoing_edges(&current) {
                if visited.contains(&edge.head) {
                    continue;
                }
                let mut next_path = path.clone();
                next_path.push(edge.id.clone());
                stack.push((edge.head.clone(), next_path, visited.clone()));
            }
        }

        complete
            .into_iter()
            .map(|path| {
                path.into_iter()
                    .filter(|edge_id| self.is_blocking_edge(edge_id))
                    .collect()
            })
            .collect()
    }

    fn is_blocking_edge(&self, edge_id: &str) -> bool {
        self.graph
            .edge(edge_id)
            .and_then(|edge| self.graph.node(&edge.tail))
            .map(|node| {
                matches!(
                    node.execution_type,
                    NodeExecutionType::Branch | NodeExecutionType::Container
                ) || node.data.error_strategy == Some(ErrorStrategy::FailBranch)
            })
            .unwrap_or(false)
    }

    fn execution_id(&mut self, node_id: &str) -> String {
        self.node_execution_ids
            .entry(node_id.to_string())
            .or_insert_with(|| Uuid::new_v4().to_string())
            .clone()
    }

    fn activate_or_queue(&mut self, node_id: &str, pool: &VariablePool) -> Vec<GraphEngineEvent> {
        let Some(session) = self.pending_sessions.remove(node_id) else {
            return Vec::new();
        };
        if self.active_session.is_none() {
            self.active_session = Some(session);
            self.try_flush(pool)
        } else {
            self.waiting_sessions.push_back(session);
            Vec::new()
        }
    }

    fn chunk_event(
        &mut self,
        node_id: &str,
        selector: Vec<String>,
        chunk: String,
        is_final: bool,
    ) -> GraphEngineEvent {
        let execution_id = self.execution_id(node_id);
        let (node_type, title) = self
            .graph
            .node(node_id)
            .map(|n| (n.node_type.clone(), n.title.clone()))
            .unwrap_or_default();
        let mut info = NodeEventInfo::new(node_id, node_type, title);
        info.id = execution_id;
        GraphEngineEvent::NodeRunStreamChunk {
            info,
            selector,
            chunk,
            is_final,
        }
    }

    fn has_unread(&self, selector: &[String]) -> bool {
        let position = self.stream_positions.get(selector).copied().unwrap_or(0);
        self.stream_buffers
            .get(selector)
            .map(|buffer| position < buffer.len())
            .unwrap_or(false)
    }

    fn pop_chunk(&mut self, selector: &[String]) -> Option<GraphEngineEvent> {
        let buffer = self.stream_buffers.get(selector)?;
        let position = self.stream_positions.get(selector).copied().unwrap_or(0);
        let event = buffer.get(position)?.clone();
        self.stream_positions.insert(selector.to_vec(), position + 1);
        Some(event)
    }

    /// Emit buffered chunks and resolved values for a variable segment
    fn process_variable(
        &mut self,
        session_node: &str,
        selector: &[String],
        is_last: bool,
        pool: &VariablePool,
    ) -> (Vec<GraphEngineEvent>, bool) {
        let source = selector.first().cloned().unwrap_or_default();
        let attribute_to_session = !self.graph.contains_node(&source);
        let mut events = Vec::new();

        while self.has_unread(selector) {
            let Some(mut event) = self.pop_chunk(selector) else {
                break;
            };
            if attribute_to_session {
                let execution_id = self.execution_id(session_node);
                if let Some(node) = self.graph.node(session_node) {
                    if let Some(info) = event.node_info_mut() {
                        info.id = execution_id;
                        info.node_id = node.id.clone();
                        info.node_type = node.node_type.clone();
                        info.node_title = node.title.clone();
                    }
                }
            }
            events.push(event);
        }

        if self.closed_streams.contains(selector) {
            return (events, true);
        }

        let owner = if attribute_to_session {
            session_node.to_string()
        } else {
            source.clone()
        };
        if let Some(value) = pool.get(selector) {
            events.push(self.chunk_event(&owner, selector.to_vec(), value.markdown(), is_last));
            return (events, true);
        }

        // Finished without producing the value: nothing will ever arrive
        let complete = self.finished_nodes.contains(&source);
        (events, complete)
    }

    /// Advance the active session as far as available data allows
    pub fn try_flush(&mut self, pool: &VariablePool) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        loop {
            let Some(mut session) = self.active_session.take() else {
                return events;
            };

            while session.index < session.template.len() {
                let is_last = session.index + 1 == session.template.len();
                match session.template.segments[session.index].clone() {
                    TemplateSegment::Text { text } => {
                        let selector = vec![session.node_id.clone(), "answer".to_string()];
                        let node_id = session.node_id.clone();
                        events.push(self.chunk_event(&node_id, selector, text, is_last));
                        session.index += 1;
                    }
                    TemplateSegment::Variable { selector } => {
                        let source = selector.first().map(String::as_str).unwrap_or_default();
                        if self.skipped_nodes.contains(source) {
                            session.index += 1;
                            continue;
                        }
                        let (segment_events, complete) =
                            self.process_variable(&session.node_id, &selector, is_last, pool);
                        events.extend(segment_events);
                        if !complete {
                            break;
                        }
                        session.index += 1;
                    }
                }
            }

            if !session.is_complete() {
                self.active_session = Some(session);
                return events;
            }

            // Session done: promote the next waiting one and keep flushing
            match self.waiting_sessions.pop_front() {
                Some(next) => self.active_session = Some(next),
                None => return events,
            }
        }
    }

    fn session_state(session: &ResponseSession) -> SessionState {
        SessionState {
            node_id: session.node_id.clone(),
            index: session.index,
        }
    }

    fn restore_session(&self, state: &SessionState) -> Result<ResponseSession> {
        let mut session = self.session_for(&state.node_id).ok_or_else(|| {
            GraphError::State(format!(
                "Unknown response node '{}' in coordinator state",
                state.node_id
            ))
        })?;
        session.index = state.index;
        Ok(session)
    }
}

impl ResponseCoordinator for ResponseStreamCoordinator {
    fn register(&mut self, response_node_id: &str) {
        if self.response_nodes.iter().any(|id| id == response_node_id) {
            return;
        }
        let Some(session) = self.session_for(response_node_id) else {
            return;
        };
        self.response_nodes.push(response_node_id.to_string());
        let paths = self.build_paths(response_node_id);
        self.paths_map.insert(response_node_id.to_string(), paths);
        self.pending_sessions
            .insert(response_node_id.to_string(), session);
    }

    fn track_node_execution(&mut self, node_id: &str, execution_id: &str) {
        self.node_execution_ids
            .insert(node_id.to_string(), execution_id.to_string());
    }

    fn on_edge_taken(&mut self, edge_id: &str, pool: &VariablePool) -> Vec<GraphEngineEvent> {
        let mut events = Vec::new();
        for response_node_id in self.response_nodes.clone() {
            let Some(paths) = self.paths_map.get_mut(&response_node_id) else {
                continue;
            };
            let mut reachable = false;
            for path in paths.iter_mut() {
                path.retain(|id| id != edge_id);
                reachable |= path.is_empty();
            }
            if reachable {
                events.extend(self.activate_or_queue(&response_node_id, pool));
            }
        }
        events
    }

    fn on_node_skipped(&mut self, node_id: &str) {
        self.skipped_nodes.insert(node_id.to_string());
        self.pending_sessions.remove(node_id);
    }

    fn intercept_event(
        &mut self,
        event: &GraphEngineEvent,
        pool: &VariablePool,
    ) -> Vec<GraphEngineEvent> {
        match event {
            GraphEngineEvent::NodeRunStreamChunk {
                selector, is_final, ..
            } => {
                if self.closed_streams.contains(selector) {
                    tracing::warn!(selector = %selector.join("."), "Chunk for closed stream dropped");
                } else {
                    self.stream_buffers
                        .entry(selector.clone())
                        .or_default()
                        .push(event.clone());
                    self.stream_positions.entry(selector.clone()).or_insert(0);
                    if *is_final {
                        self.closed_streams.insert(selector.clone());
                    }
                }
                self.try_flush(pool)
            }
            GraphEngineEvent::NodeRunSucceeded { info, .. }
            | GraphEngineEvent::NodeRunException { info, .. } => {
                self.finished_nodes.insert(info.node_id.clone());
                self.try_flush(pool)
            }
            _ => Vec::new(),
        }
    }

    fn dumps(&self) -> Result<String> {
        let mut pending: Vec<SessionState> = self
            .pending_sessions
            .values()
            .map(Self::session_state)
            .collect();
        pending.sort_by(|a, b| a.node_id.cmp(&b.node_id));

        let mut stream_buffers: Vec<StreamBufferState> = self
            .stream_buffers
            .iter()
            .map(|(selector, events)| StreamBufferState {
                selector: selector.clone(),
                events: events.clone(),
                position: self.stream_positions.get(selector).copied().unwrap_or(0),
            })
            .collect();
        stream_buffers.sort_by(|a, b| a.selector.cmp(&b.selector));

        let mut closed_streams: Vec<Vec<String>> = self.closed_streams.iter().cloned().collect();
        closed_streams.sort();
        let mut skipped_nodes: Vec<String> = self.skipped_nodes.iter().cloned().collect();
        skipped_nodes.sort();
        let mut finished_nodes: Vec<String> = self.finished_nodes.iter().cloned().collect();
        finished_nodes.sort();

        let state = CoordinatorState {
            kind: COORDINATOR_TYPE.to_string(),
            version: COORDINATOR_VERSION.to_string(),
            response_nodes: self.response_nodes.clone(),
            active_session: self.active_session.as_ref().map(Self::session_state),
            waiting_sessions: self.waiting_sessions.iter().map(Self::session_state).collect(),
            pending_sessions: pending,
            node_execution_ids: self
                .node_execution_ids
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            paths_map: self
                .paths_map
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            stream_buffers,
            closed_streams,
            skipped_nodes,
            finished_nodes,
        };
        Ok(serde_json::to_string(&state)?)
    }

    fn loads(&mut self, data: &str) -> Result<()> {
        let state: CoordinatorState = serde_json::from_str(data)?;
        if state.kind != COORDINATOR_TYPE {
            return Err(GraphError::State(format!(
                "Invalid coordinator payload type: {}",
                state.kind
            )));
        }
        if state.version != COORDINATOR_VERSION {
            return Err(GraphError::UnsupportedSnapshotVersion(state.version));
        }

        let active_session = match &state.active_session {
            Some(s) => Some(self.restore_session(s)?),
            None => None,
        };
        let waiting_sessions = state
            .waiting_sessions
            .iter()
            .map(|s| self.restore_session(s))
            .collect::<Result<VecDeque<_>>>()?;
        let pending_sessions = state
            .pending_sessions
            .iter()
            .map(|s| Ok((s.node_id.clone(), self.restore_session(s)?)))
            .collect::<Result<HashMap<_, _>>>()?;

        self.response_nodes = state.response_nodes;
        self.paths_map = state.paths_map.into_iter().collect();
        self.node_execution_ids = state.node_execution_ids.into_iter().collect();
        self.stream_positions = state
            .stream_buffers
            .iter()
            .map(|b| (b.selector.clone(), b.position))
            .collect();
        self.stream_buffers = state
            .stream_buffers
            .into_iter()
            .map(|b| (b.selector, b.events))
            .collect();
        self.closed_streams = state.closed_streams.into_iter().collect();
        self.skipped_nodes = state.skipped_nodes.into_iter().collect();
        self.finished_nodes = state.finished_nodes.into_iter().collect();
        self.active_session = active_session;
        self.waiting_sessions = waiting_sessions;
        self.pending_sessions = pending_sessions;
        Ok(())
    }
}
