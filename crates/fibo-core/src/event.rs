use serde::Serialize;

use crate::catalog::NodeKind;
use crate::run::RunStatus;

/// Progress notifications emitted while a run is driven.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        execution_order: Vec<String>,
    },
    NodeStarted {
        run_id: String,
        node_id: String,
        node_type: NodeKind,
    },
    NodeSkipped {
        run_id: String,
        node_id: String,
    },
    NodeCompleted {
        run_id: String,
        node_id: String,
        elapsed_ms: u64,
    },
    NodeFailed {
        run_id: String,
        node_id: String,
        error: String,
    },
    RunSuspended {
        run_id: String,
        node_id: String,
    },
    ApprovalResolved {
        run_id: String,
        node_id: String,
        approved: bool,
    },
    RunFinished {
        run_id: String,
        status: RunStatus,
        error: Option<String>,
    },
}

impl RunEvent {
    pub fn run_id(&self) -> &str {
        match self {
            RunEvent::RunStarted { run_id, .. }
            | RunEvent::NodeStarted { run_id, .. }
            | RunEvent::NodeSkipped { run_id, .. }
            | RunEvent::NodeCompleted { run_id, .. }
            | RunEvent::NodeFailed { run_id, .. }
            | RunEvent::RunSuspended { run_id, .. }
            | RunEvent::ApprovalResolved { run_id, .. }
            | RunEvent::RunFinished { run_id, .. } => run_id,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(RunEvent::RunSuspended {
            run_id: "r1".into(),
            node_id: "a".into(),
        });
        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), "r1");
        assert!(matches!(event, RunEvent::RunSuspended { .. }));
    }

    #[test]
    fn publish_without_subscribers_is_ignored() {
        EventBus::new(4).publish(RunEvent::NodeSkipped {
            run_id: "r".into(),
            node_id: "n".into(),
        });
    }
}
