//! # graphflow-checkpoint - Snapshot storage for workflow runs
//!
//! A running workflow can be captured as a versioned runtime-state document (see
//! `graphflow_core::GraphRuntimeState::dumps`). This crate stores those documents so a
//! paused or interrupted run can be continued by a fresh engine later.
//!
//! ## Core types
//!
//! - [`Snapshot`] / [`SnapshotMetadata`] - the stored envelope and its index data
//! - [`SnapshotStore`] - trait for storage backends
//! - [`InMemorySnapshotStore`] - reference backend for tests and single-process use
//! - [`SerializerProtocol`] - byte encoding used by stores ([`JsonSerializer`],
//!   [`BincodeSerializer`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use graphflow_checkpoint::{InMemorySnapshotStore, Snapshot, SnapshotReason, SnapshotStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = InMemorySnapshotStore::new();
//!
//!     let state_document = r#"{"version":"1.0"}"#;
//!     store
//!         .put(Snapshot::new("run-42", SnapshotReason::Paused, 7, state_document))
//!         .await?;
//!
//!     if let Some(snapshot) = store.latest("run-42").await? {
//!         println!("resume from step {}", snapshot.metadata.node_run_steps);
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
pub mod memory;
pub mod serializer;
pub mod snapshot;
pub mod store;

pub use error::{CheckpointError, Result};
pub use memory::InMemorySnapshotStore;
pub use serializer::{BincodeSerializer, JsonSerializer, SerializerProtocol};
pub use snapshot::{Snapshot, SnapshotMetadata, SnapshotReason};
pub use store::{SnapshotStore, SnapshotStream};
