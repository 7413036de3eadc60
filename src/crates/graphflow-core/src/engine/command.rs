//! External control of a running engine

use crate::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// Reason recorded when an abort command carries none
pub const DEFAULT_ABORT_REASON: &str = "Workflow execution aborted by user command";

/// Commands accepted by a running [`GraphEngine`](super::GraphEngine)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command_type", rename_all = "snake_case")]
pub enum GraphEngineCommand {
    /// Stop dispatching, let running nodes finish and end the run as aborted
    Abort {
        #[serde(default)]
        reason: Option<String>,
    },
}

impl GraphEngineCommand {
    pub fn abort(reason: Option<String>) -> Self {
        Self::Abort { reason }
    }
}

/// Sending half of a command channel
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: mpsc::UnboundedSender<GraphEngineCommand>,
}

impl CommandSender {
    pub fn send(&self, command: GraphEngineCommand) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| GraphError::Execution("Engine command channel closed".to_string()))
    }

    pub fn abort(&self, reason: Option<String>) -> Result<()> {
        self.send(GraphEngineCommand::abort(reason))
    }
}

/// Receiving half, handed to the engine
#[derive(Debug)]
pub struct CommandReceiver {
    rx: mpsc::UnboundedReceiver<GraphEngineCommand>,
}

impl CommandReceiver {
    pub async fn recv(&mut self) -> Option<GraphEngineCommand> {
        self.rx.recv().await
    }
}

/// A connected sender and receiver
pub fn command_channel() -> (CommandSender, CommandReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (CommandSender { tx }, CommandReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_abort_round_trip() {
        let (sender, mut receiver) = command_channel();
        sender.abort(Some("stop".into())).unwrap();
        assert_eq!(
            receiver.recv().await,
            Some(GraphEngineCommand::Abort {
                reason: Some("stop".into())
            })
        );
    }

    #[test]
    fn test_wire_format() {
        let command: GraphEngineCommand =
            serde_json::from_value(json!({"command_type": "abort"})).unwrap();
        assert_eq!(command, GraphEngineCommand::Abort { reason: None });
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let (sender, receiver) = command_channel();
        drop(receiver);
        assert!(sender.abort(None).is_err());
    }
}
