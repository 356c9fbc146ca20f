//! State - タスクの状態
//!
//! # 状態遷移
//! - pending -> processing (execution started)
//! - processing -> completed | failed
//! - failed -> processing (engine retry, or next fire of a recurring task)
//! - completed -> processing (recurring tasks only)
//! - any non-terminal -> pending (explicit update of a one-time task)
//!
//! A one-time task in `completed` is terminal: only deletion is allowed.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status of a task record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting for its next execution.
    #[default]
    Pending,

    /// An execution is currently running.
    Processing,

    /// The most recent execution succeeded.
    Completed,

    /// The most recent execution failed.
    Failed,
}

impl TaskStatus {
    /// Is a task with this status and cadence terminal?
    pub fn is_terminal(self, is_recurring: bool) -> bool {
        !is_recurring && self == TaskStatus::Completed
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Processing => "processing",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::pending(TaskStatus::Pending, false, false)]
    #[case::processing(TaskStatus::Processing, false, false)]
    #[case::failed(TaskStatus::Failed, false, false)]
    #[case::completed_one_time(TaskStatus::Completed, false, true)]
    #[case::completed_recurring(TaskStatus::Completed, true, false)]
    fn terminal_only_for_completed_one_time(
        #[case] status: TaskStatus,
        #[case] is_recurring: bool,
        #[case] expected: bool,
    ) {
        assert_eq!(status.is_terminal(is_recurring), expected);
    }

    #[test]
    fn status_serializes_lowercase() {
        let s = serde_json::to_string(&TaskStatus::Processing).unwrap();
        assert_eq!(s, "\"processing\"");
        assert_eq!(TaskStatus::default(), TaskStatus::Pending);
    }
}
