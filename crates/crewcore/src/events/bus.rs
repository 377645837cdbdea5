use crate::{AgentId, ExecutionId, ExecutionStatus, TaskId, TaskRunId, WorkflowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Events emitted during workflow execution
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExecutionEvent {
    ExecutionStarted {
        execution_id: ExecutionId,
        workflow_id: WorkflowId,
        timestamp: DateTime<Utc>,
    },
    TaskStarted {
        execution_id: ExecutionId,
        task_id: TaskId,
        run_id: TaskRunId,
        agent_id: AgentId,
        iteration: u32,
        timestamp: DateTime<Utc>,
    },
    TaskRetrying {
        execution_id: ExecutionId,
        task_id: TaskId,
        run_id: TaskRunId,
        attempt: u32,
        error: String,
        delay_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskCompleted {
        execution_id: ExecutionId,
        task_id: TaskId,
        run_id: TaskRunId,
        tokens_used: u64,
        duration_ms: u64,
        timestamp: DateTime<Utc>,
    },
    TaskFailed {
        execution_id: ExecutionId,
        task_id: TaskId,
        run_id: TaskRunId,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TaskSkipped {
        execution_id: ExecutionId,
        task_id: TaskId,
        timestamp: DateTime<Utc>,
    },
    ExecutionPaused {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    ExecutionResumed {
        execution_id: ExecutionId,
        timestamp: DateTime<Utc>,
    },
    /// Terminal-state notification consumed by email/webhook/chat collaborators
    ExecutionFinished {
        execution_id: ExecutionId,
        status: ExecutionStatus,
        workflow_id: WorkflowId,
        workflow_name: String,
        completed_at: DateTime<Utc>,
    },
    TaskEvent {
        execution_id: ExecutionId,
        task_id: TaskId,
        event: TaskEvent,
        timestamp: DateTime<Utc>,
    },
}

impl ExecutionEvent {
    pub fn execution_id(&self) -> ExecutionId {
        match self {
            ExecutionEvent::ExecutionStarted { execution_id, .. }
            | ExecutionEvent::TaskStarted { execution_id, .. }
            | ExecutionEvent::TaskRetrying { execution_id, .. }
            | ExecutionEvent::TaskCompleted { execution_id, .. }
            | ExecutionEvent::TaskFailed { execution_id, .. }
            | ExecutionEvent::TaskSkipped { execution_id, .. }
            | ExecutionEvent::ExecutionPaused { execution_id, .. }
            | ExecutionEvent::ExecutionResumed { execution_id, .. }
            | ExecutionEvent::ExecutionFinished { execution_id, .. }
            | ExecutionEvent::TaskEvent { execution_id, .. } => *execution_id,
        }
    }
}

/// Events an agent invoker reports while a task is running
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum TaskEvent {
    Info { message: String },
    Warning { message: String },
    Progress { percent: f64, message: Option<String> },
}

/// Event emitter handed to agent invokers for real-time updates
#[derive(Clone)]
pub struct EventEmitter {
    execution_id: ExecutionId,
    task_id: TaskId,
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventEmitter {
    pub fn new(
        execution_id: ExecutionId,
        task_id: TaskId,
        sender: broadcast::Sender<ExecutionEvent>,
    ) -> Self {
        Self {
            execution_id,
            task_id,
            sender,
        }
    }

    pub fn emit(&self, event: TaskEvent) {
        let _ = self.sender.send(ExecutionEvent::TaskEvent {
            execution_id: self.execution_id,
            task_id: self.task_id.clone(),
            event,
            timestamp: Utc::now(),
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        self.emit(TaskEvent::Info {
            message: message.into(),
        });
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.emit(TaskEvent::Warning {
            message: message.into(),
        });
    }

    pub fn progress(&self, percent: f64, message: Option<String>) {
        self.emit(TaskEvent::Progress { percent, message });
    }
}

/// Global event bus
pub struct EventBus {
    sender: broadcast::Sender<ExecutionEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.sender.subscribe()
    }

    /// Delivery is best effort; having no subscribers is not an error
    pub fn emit(&self, event: ExecutionEvent) {
        let _ = self.sender.send(event);
    }

    pub fn create_emitter(&self, execution_id: ExecutionId, task_id: TaskId) -> EventEmitter {
        EventEmitter::new(execution_id, task_id, self.sender.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn emitter_wraps_task_events() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let execution_id = Uuid::new_v4();

        bus.create_emitter(execution_id, "draft".into())
            .progress(50.0, Some("halfway".into()));

        match rx.recv().await.unwrap() {
            ExecutionEvent::TaskEvent {
                execution_id: id,
                task_id,
                event: TaskEvent::Progress { percent, .. },
                ..
            } => {
                assert_eq!(id, execution_id);
                assert_eq!(task_id, "draft");
                assert_eq!(percent, 50.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[test]
    fn finished_event_serializes_with_tag() {
        let event = ExecutionEvent::ExecutionFinished {
            execution_id: Uuid::nil(),
            status: ExecutionStatus::Completed,
            workflow_id: Uuid::nil(),
            workflow_name: "Email Automation".into(),
            completed_at: Utc::now(),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "execution_finished");
        assert_eq!(value["status"], "completed");
    }
}
