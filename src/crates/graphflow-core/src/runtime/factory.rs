//! Construction of the runtime-state collaborators

use super::coordinator::{ResponseCoordinator, ResponseStreamCoordinator};
use super::execution::{DefaultGraphExecution, GraphExecution};
use super::ready_queue::{InMemoryReadyQueue, ReadyQueue};
use crate::graph::Graph;
use std::sync::Arc;

/// Builds the ready queue, the execution aggregate and the response coordinator
///
/// [`GraphRuntimeState`](super::GraphRuntimeState) calls these lazily, the first time each
/// collaborator is needed.
pub trait CollaboratorFactory: Send + Sync {
    fn create_ready_queue(&self) -> Box<dyn ReadyQueue>;

    fn create_graph_execution(&self, workflow_id: &str) -> Box<dyn GraphExecution>;

    fn create_response_coordinator(&self, graph: Arc<Graph>) -> Box<dyn ResponseCoordinator>;
}

/// In-memory collaborators
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultCollaborators;

impl CollaboratorFactory for DefaultCollaborators {
    fn create_ready_queue(&self) -> Box<dyn ReadyQueue> {
        Box::new(InMemoryReadyQueue::new())
    }

    fn create_graph_execution(&self, workflow_id: &str) -> Box<dyn GraphExecution> {
        Box::new(DefaultGraphExecution::new(workflow_id))
    }

    fn create_response_coordinator(&self, graph: Arc<Graph>) -> Box<dyn ResponseCoordinator> {
        Box::new(ResponseStreamCoordinator::new(graph))
    }
}
