//! Pluggable snapshot storage
//!
//! [`SnapshotStore`] is the seam between the engine and whatever keeps snapshots durable.
//! The engine only ever appends snapshots and reads the newest one for a run; listing and
//! deletion exist for operators and tests.
//!
//! ```text
//! GraphEngine ──(pause / abort / finish)──► SnapshotStore::put
//!                                                │
//! GraphRuntimeState::restore ◄──────── SnapshotStore::latest
//! ```
//!
//! # Implementing a backend
//!
//! ```rust,ignore
//! use graphflow_checkpoint::{Snapshot, SnapshotMetadata, SnapshotStore, SnapshotStream, Result};
//! use async_trait::async_trait;
//!
//! struct RedisSnapshots { /* connection */ }
//!
//! #[async_trait]
//! impl SnapshotStore for RedisSnapshots {
//!     async fn put(&self, snapshot: Snapshot) -> Result<SnapshotMetadata> {
//!         // LPUSH run:{id} <bytes>
//!         Ok(snapshot.metadata)
//!     }
//!     // get / list / delete_run ...
//! }
//! ```

use crate::error::Result;
use crate::snapshot::{Snapshot, SnapshotMetadata};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

/// Stream of snapshot metadata, newest first
pub type SnapshotStream = Pin<Box<dyn Stream<Item = Result<SnapshotMetadata>> + Send>>;

/// Storage backend for runtime-state snapshots
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Append a snapshot and return its metadata
    async fn put(&self, snapshot: Snapshot) -> Result<SnapshotMetadata>;

    /// Fetch one snapshot by run and snapshot id
    async fn get(&self, run_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>>;

    /// List snapshot metadata for a run, newest first
    async fn list(&self, run_id: &str, limit: Option<usize>) -> Result<SnapshotStream>;

    /// Remove every snapshot of a run
    async fn delete_run(&self, run_id: &str) -> Result<()>;

    /// Fetch the newest snapshot of a run
    async fn latest(&self, run_id: &str) -> Result<Option<Snapshot>> {
        use futures::StreamExt;

        let mut stream = self.list(run_id, Some(1)).await?;
        match stream.next().await {
            Some(metadata) => {
                let metadata = metadata?;
                self.get(run_id, &metadata.snapshot_id).await
            }
            None => Ok(None),
        }
    }
}
