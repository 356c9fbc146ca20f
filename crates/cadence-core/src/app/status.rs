//! Status - ステータスクエリ
//!
//! Engine side counts per execution state, plus store side counts per task
//! status. Reported by `App::status` and printed by the CLI demo.

use serde::{Deserialize, Serialize};

use crate::domain::{Task, TaskStatus};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionCounts {
    pub delayed: usize,
    pub active: usize,
    pub failed: usize,
}

impl ExecutionCounts {
    pub fn total(&self) -> usize {
        self.delayed + self.active + self.failed
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub failed: usize,
}

impl TaskCounts {
    pub fn tally<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut counts = Self::default();
        for task in tasks {
            match task.status {
                TaskStatus::Pending => counts.pending += 1,
                TaskStatus::Processing => counts.processing += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub tasks: TaskCounts,
    pub executions: ExecutionCounts,
}
