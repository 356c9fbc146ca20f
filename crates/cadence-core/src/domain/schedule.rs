//! Schedule requests - task definition を queue engine への依頼に変換したもの

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::ids::TaskId;
use super::recurrence::RecurrenceRule;
use super::task::{Cadence, Task, TaskPatch};

/// Data carried by an execution and handed back in every event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionPayload {
    pub task_id: TaskId,
    pub title: String,
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

impl ExecutionPayload {
    pub fn for_task(task: &Task) -> Self {
        Self {
            task_id: task.id,
            title: task.title.clone(),
            is_recurring: task.is_recurring,
            frequency: task.frequency.clone(),
        }
    }

    /// Merge a client patch into the payload of a live execution.
    pub fn apply_patch(&mut self, patch: &TaskPatch) {
        if let Some(title) = &patch.title {
            self.title = title.trim().to_string();
        }
    }
}

/// When an execution fires.
#[derive(Debug, Clone)]
pub enum ScheduleTiming {
    /// Fire once after the delay.
    OneShot { delay: Duration },

    /// Fire on every occurrence of the rule.
    Repeat { rule: RecurrenceRule },
}

/// A request to the queue engine to schedule one execution.
#[derive(Debug, Clone)]
pub struct ScheduleRequest {
    pub task_id: TaskId,
    pub payload: ExecutionPayload,
    pub timing: ScheduleTiming,

    /// Scheduling twice with the same key yields the same execution.
    pub idempotency_key: Option<String>,
}

impl ScheduleRequest {
    /// Build the request for a freshly persisted task.
    ///
    /// One-time: delay = `run_at - now` (clamped at zero).
    /// Recurring: repeat rule, idempotency key = task id.
    pub fn for_task(task: &Task, cadence: Cadence, now: DateTime<Utc>) -> Self {
        let payload = ExecutionPayload::for_task(task);
        match cadence {
            Cadence::Once { run_at } => Self {
                task_id: task.id,
                payload,
                timing: ScheduleTiming::OneShot {
                    delay: (run_at - now).max(Duration::zero()),
                },
                idempotency_key: None,
            },
            Cadence::Recurring { rule } => Self {
                task_id: task.id,
                payload,
                timing: ScheduleTiming::Repeat { rule },
                idempotency_key: Some(task.id.get().to_string()),
            },
        }
    }

    pub fn is_recurring(&self) -> bool {
        matches!(self.timing, ScheduleTiming::Repeat { .. })
    }
}
