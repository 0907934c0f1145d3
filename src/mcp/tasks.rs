//! In-process table of async validation tasks for the agent surface.

use chrono::{DateTime, Utc};
use huskycat_core::engine::{ValidationEngine, ValidationRequest};
use huskycat_core::progress::NoopSink;
use huskycat_core::results::Run;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Queued,
    Running,
    Finished,
    Cancelled,
}

struct TaskEntry {
    state: TaskState,
    #[allow(dead_code)]
    started_at: DateTime<Utc>,
    result: Option<Run>,
    cancel: CancellationToken,
}

/// Owned by the dispatcher for the lifetime of the process.
#[derive(Default)]
pub struct TaskTable {
    tasks: RwLock<HashMap<String, TaskEntry>>,
    next_id: RwLock<u64>,
}

impl TaskTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a validation run and return its task id immediately.
    pub async fn spawn(
        self: &Arc<Self>,
        engine: Arc<ValidationEngine>,
        request: ValidationRequest,
    ) -> String {
        let task_id = {
            let mut next = self.next_id.write().await;
            *next += 1;
            format!("task-{}", *next)
        };

        let cancel = CancellationToken::new();
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(
                task_id.clone(),
                TaskEntry {
                    state: TaskState::Queued,
                    started_at: Utc::now(),
                    result: None,
                    cancel: cancel.clone(),
                },
            );
        }

        let table = Arc::clone(self);
        let id = task_id.clone();
        tokio::spawn(async move {
            table.set_state(&id, TaskState::Running).await;
            let outcome = engine
                .run(&request, Arc::new(NoopSink), cancel.clone())
                .await;
            let mut tasks = table.tasks.write().await;
            if let Some(entry) = tasks.get_mut(&id) {
                match outcome {
                    Ok(run) => {
                        entry.state = if cancel.is_cancelled() {
                            TaskState::Cancelled
                        } else {
                            TaskState::Finished
                        };
                        entry.result = Some(run);
                    }
                    Err(error) => {
                        warn!(%error, task = %id, "async validation failed");
                        entry.state = TaskState::Finished;
                    }
                }
            }
        });

        task_id
    }

    pub async fn status(&self, task_id: &str) -> Option<(TaskState, Option<Run>)> {
        let tasks = self.tasks.read().await;
        tasks
            .get(task_id)
            .map(|entry| (entry.state, entry.result.clone()))
    }

    /// Cancel a queued or running task. Finished tasks are not cancellable.
    pub async fn cancel(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(task_id) {
            Some(entry) if matches!(entry.state, TaskState::Queued | TaskState::Running) => {
                entry.cancel.cancel();
                entry.state = TaskState::Cancelled;
                true
            }
            _ => false,
        }
    }

    async fn set_state(&self, task_id: &str, state: TaskState) {
        let mut tasks = self.tasks.write().await;
        if let Some(entry) = tasks.get_mut(task_id) {
            // Never resurrect a cancelled task.
            if entry.state != TaskState::Cancelled {
                entry.state = state;
            }
        }
    }
}
