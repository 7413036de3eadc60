//! Snapshot envelope
//!
//! A [`Snapshot`] wraps one serialized runtime-state document together with the metadata a
//! store needs to index it. The document itself is kept as text so that stores stay
//! independent of the engine's types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Why a snapshot was taken
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotReason {
    /// One or more nodes are waiting for external input
    Paused,
    /// An abort command stopped the run
    Aborted,
    /// The run reached a terminal success state
    Completed,
    /// The run failed
    Failed,
    /// Requested explicitly by the caller
    Manual,
}

impl SnapshotReason {
    /// Whether a run in this state can be continued from the snapshot
    pub fn is_resumable(&self) -> bool {
        matches!(self, SnapshotReason::Paused | SnapshotReason::Manual)
    }
}

/// Index data for a stored snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    /// Workflow run the snapshot belongs to
    pub run_id: String,

    /// Unique snapshot id
    pub snapshot_id: String,

    pub created_at: DateTime<Utc>,

    pub reason: SnapshotReason,

    /// Node run steps recorded in the state at capture time
    pub node_run_steps: u64,

    /// Free-form string tags
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
}

/// A serialized runtime state plus its metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub metadata: SnapshotMetadata,

    /// The runtime-state JSON document
    pub state: String,
}

impl Snapshot {
    /// Create a snapshot with a fresh id stamped now
    pub fn new(
        run_id: impl Into<String>,
        reason: SnapshotReason,
        node_run_steps: u64,
        state: impl Into<String>,
    ) -> Self {
        Self {
            metadata: SnapshotMetadata {
                run_id: run_id.into(),
                snapshot_id: Uuid::new_v4().to_string(),
                created_at: Utc::now(),
                reason,
                node_run_steps,
                tags: BTreeMap::new(),
            },
            state: state.into(),
        }
    }

    /// Attach a tag
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.tags.insert(key.into(), value.into());
        self
    }

    pub fn run_id(&self) -> &str {
        &self.metadata.run_id
    }

    pub fn snapshot_id(&self) -> &str {
        &self.metadata.snapshot_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_snapshot_has_unique_id() {
        let a = Snapshot::new("run", SnapshotReason::Manual, 0, "{}");
        let b = Snapshot::new("run", SnapshotReason::Manual, 0, "{}");
        assert_ne!(a.snapshot_id(), b.snapshot_id());
        assert_eq!(a.run_id(), "run");
    }

    #[test]
    fn test_resumable_reasons() {
        assert!(SnapshotReason::Paused.is_resumable());
        assert!(SnapshotReason::Manual.is_resumable());
        assert!(!SnapshotReason::Completed.is_resumable());
        assert!(!SnapshotReason::Failed.is_resumable());
    }

    #[test]
    fn test_tags() {
        let snapshot = Snapshot::new("run", SnapshotReason::Aborted, 2, "{}").with_tag("node", "llm");
        assert_eq!(snapshot.metadata.tags.get("node").map(String::as_str), Some("llm"));
    }
}
