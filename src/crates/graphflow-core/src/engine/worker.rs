//! Runs one node and reports its completion

use crate::events::GraphEngineEvent;
use crate::node::{Node, NodeContext, NodeRunResult, NodeRunStatus};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::mpsc;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Run `node` and send its completion event on `tx`
///
/// Errors and panics become failed results; the dispatcher decides about retries and
/// error strategies.
pub(crate) async fn execute(
    node: Arc<dyn Node>,
    ctx: NodeContext,
    tx: mpsc::Sender<GraphEngineEvent>,
) {
    let info = ctx.info.clone();
    let outcome = AssertUnwindSafe(node.run(ctx)).catch_unwind().await;

    let result = match outcome {
        Ok(Ok(result)) => result,
        Ok(Err(e)) => {
            tracing::debug!(node_id = %info.node_id, error = %e, "Node run returned an error");
            NodeRunResult::from_error(&e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(node_id = %info.node_id, panic = %message, "Node panicked");
            NodeRunResult::failed(format!("Node panicked: {}", message), "NodePanic")
        }
    };

    let event = match result.status {
        NodeRunStatus::Succeeded | NodeRunStatus::Exception => {
            GraphEngineEvent::NodeRunSucceeded { info, result }
        }
        NodeRunStatus::Failed => GraphEngineEvent::NodeRunFailed {
            info,
            error: result.error_message(),
            result,
        },
        NodeRunStatus::Paused => GraphEngineEvent::NodeRunPaused { info, result },
    };

    if tx.send(event).await.is_err() {
        tracing::debug!("Dispatcher gone before node completion was delivered");
    }
}
