//! FIFO of node ids that are ready to be dispatched

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

const READY_QUEUE_TYPE: &str = "InMemoryReadyQueue";
const READY_QUEUE_VERSION: &str = "1.0";

/// Queue of eligible nodes, serializable as part of the runtime state
pub trait ReadyQueue: Send {
    fn put(&mut self, node_id: String);

    fn get(&mut self) -> Option<String>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn clear(&mut self);

    /// Queued node ids in dispatch order
    fn items(&self) -> Vec<String>;

    fn dumps(&self) -> Result<String>;

    fn loads(&mut self, data: &str) -> Result<()>;
}

#[derive(Debug, Serialize, Deserialize)]
struct ReadyQueueState {
    #[serde(rename = "type")]
    kind: String,
    version: String,
    items: Vec<String>,
}

/// Default queue backed by a `VecDeque`
#[derive(Debug, Default, Clone)]
pub struct InMemoryReadyQueue {
    items: VecDeque<String>,
}

impl InMemoryReadyQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReadyQueue for InMemoryReadyQueue {
    fn put(&mut self, node_id: String) {
        self.items.push_back(node_id);
    }

    fn get(&mut self) -> Option<String> {
        self.items.pop_front()
    }

    fn len(&self) -> usize {
        self.items.len()
    }

    fn clear(&mut self) {
        self.items.clear();
    }

    fn items(&self) -> Vec<String> {
        self.items.iter().cloned().collect()
    }

    fn dumps(&self) -> Result<String> {
        let state = ReadyQueueState {
            kind: READY_QUEUE_TYPE.to_string(),
            version: READY_QUEUE_VERSION.to_string(),
            items: self.items(),
        };
        Ok(serde_json::to_string(&state)?)
    }

    fn loads(&mut self, data: &str) -> Result<()> {
        let state: ReadyQueueState = serde_json::from_str(data)?;
        if state.kind != READY_QUEUE_TYPE {
            return Err(GraphError::State(format!(
                "Invalid ready queue payload type: {}",
                state.kind
            )));
        }
        if state.version != READY_QUEUE_VERSION {
            return Err(GraphError::UnsupportedSnapshotVersion(state.version));
        }
        self.items = state.items.into_iter().collect();
        Ok(())
    }
}
