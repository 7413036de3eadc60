//! Runtime state of a graph run
//!
//! - [`GraphRuntimeState`] - pool, counters, outputs and lazily built collaborators
//! - [`ReadyQueue`] - node ids waiting to be dispatched
//! - [`GraphExecution`] - run status, node and edge states, retry counts
//! - [`ResponseCoordinator`] - ordered streaming of response nodes
//! - [`CollaboratorFactory`] - how the three collaborators are built

pub mod coordinator;
pub mod execution;
pub mod factory;
pub mod read_only;
pub mod ready_queue;
pub mod state;
pub mod usage;

pub use coordinator::{ResponseCoordinator, ResponseStreamCoordinator};
pub use execution::{DefaultGraphExecution, GraphExecution, NodeState};
pub use factory::{CollaboratorFactory, DefaultCollaborators};
pub use read_only::ReadOnlyGraphRuntimeState;
pub use ready_queue::{InMemoryReadyQueue, ReadyQueue};
pub use state::{GraphRuntimeState, SNAPSHOT_VERSION};
pub use usage::LlmUsage;
