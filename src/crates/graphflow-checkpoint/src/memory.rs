//! In-memory snapshot storage for development and testing
//!
//! Snapshots are encoded with a [`SerializerProtocol`] before they are stored, so the
//! in-memory backend exercises the same encode/decode path a durable backend would.
//!
//! ```text
//! Arc<RwLock<HashMap>>
//!   run_id: "run-1"
//!     ├─ [0] StoredSnapshot (paused, step 3)
//!     └─ [1] StoredSnapshot (completed, step 7)
//! ```

use crate::error::{CheckpointError, Result};
use crate::serializer::{JsonSerializer, SerializerProtocol};
use crate::snapshot::{Snapshot, SnapshotMetadata};
use crate::store::{SnapshotStore, SnapshotStream};
use async_trait::async_trait;
use futures::stream;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone)]
struct StoredSnapshot {
    metadata: SnapshotMetadata,
    bytes: Vec<u8>,
}

type SnapshotStorage = Arc<RwLock<HashMap<String, Vec<StoredSnapshot>>>>;

/// Snapshot store backed by a process-local map
///
/// ```rust
/// use graphflow_checkpoint::{InMemorySnapshotStore, Snapshot, SnapshotReason, SnapshotStore};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let store = InMemorySnapshotStore::new();
///     store.put(Snapshot::new("run-1", SnapshotReason::Paused, 3, "{}")).await?;
///     assert!(store.latest("run-1").await?.is_some());
///     Ok(())
/// }
/// ```
#[derive(Debug, Clone)]
pub struct InMemorySnapshotStore<S = JsonSerializer> {
    storage: SnapshotStorage,
    serializer: Arc<S>,
}

impl InMemorySnapshotStore<JsonSerializer> {
    /// Create a store that encodes snapshots as JSON
    pub fn new() -> Self {
        Self::with_serializer(JsonSerializer::new())
    }
}

impl<S: SerializerProtocol> InMemorySnapshotStore<S> {
    /// Create a store with a custom encoding
    pub fn with_serializer(serializer: S) -> Self {
        Self {
            storage: Arc::new(RwLock::new(HashMap::new())),
            serializer: Arc::new(serializer),
        }
    }

    /// Number of runs with at least one snapshot
    pub async fn run_count(&self) -> usize {
        self.storage.read().await.len()
    }

    /// Total number of stored snapshots
    pub async fn snapshot_count(&self) -> usize {
        self.storage
            .read()
            .await
            .values()
            .map(|entries| entries.len())
            .sum()
    }

    pub async fn clear(&self) {
        self.storage.write().await.clear();
    }
}

impl Default for InMemorySnapshotStore<JsonSerializer> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: SerializerProtocol + 'static> SnapshotStore for InMemorySnapshotStore<S> {
    async fn put(&self, snapshot: Snapshot) -> Result<SnapshotMetadata> {
        if snapshot.metadata.run_id.is_empty() {
            return Err(CheckpointError::Invalid("run_id is required".to_string()));
        }

        let bytes = self.serializer.dumps(&snapshot)?;
        let metadata = snapshot.metadata;

        let mut storage = self.storage.write().await;
        storage
            .entry(metadata.run_id.clone())
            .or_insert_with(Vec::new)
            .push(StoredSnapshot {
                metadata: metadata.clone(),
                bytes,
            });

        Ok(metadata)
    }

    async fn get(&self, run_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let storage = self.storage.read().await;

        let Some(entry) = storage
            .get(run_id)
            .and_then(|entries| entries.iter().find(|e| e.metadata.snapshot_id == snapshot_id))
        else {
            return Ok(None);
        };

        Ok(Some(self.serializer.loads(&entry.bytes)?))
    }

    async fn list(&self, run_id: &str, limit: Option<usize>) -> Result<SnapshotStream> {
        let storage = self.storage.read().await;

        let results: Vec<Result<SnapshotMetadata>> = storage
            .get(run_id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .take(limit.unwrap_or(usize::MAX))
                    .map(|entry| Ok(entry.metadata.clone()))
                    .collect()
            })
            .unwrap_or_default();

        Ok(Box::pin(stream::iter(results)))
    }

    async fn delete_run(&self, run_id: &str) -> Result<()> {
        self.storage.write().await.remove(run_id);
        Ok(())
    }
}
