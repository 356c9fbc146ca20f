//! Events - queue engine から届く実行イベント
//!
//! Ordering across tasks is not guaranteed. Within one execution `Started`
//! is expected before `Completed`/`Failed`, but handlers must not rely on it.

use chrono::{DateTime, Utc};

use super::ids::{ExecutionRef, TaskId};
use super::schedule::ExecutionPayload;
use super::task::Task;

/// Engine-side facts about the run an event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionContext {
    /// How many runs of this execution the engine has started so far.
    pub run_count: u32,

    /// Next time the engine will fire this execution (next repeat, or retry).
    pub next_run_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    Started {
        execution_ref: ExecutionRef,
        payload: ExecutionPayload,
        context: ExecutionContext,
    },
    Completed {
        execution_ref: ExecutionRef,
        payload: ExecutionPayload,
        /// Snapshot produced by the execution function, if any.
        result: Option<Task>,
        context: ExecutionContext,
    },
    Failed {
        execution_ref: ExecutionRef,
        payload: ExecutionPayload,
        error: String,
        context: ExecutionContext,
    },
}

impl ExecutionEvent {
    pub fn execution_ref(&self) -> &ExecutionRef {
        match self {
            ExecutionEvent::Started { execution_ref, .. }
            | ExecutionEvent::Completed { execution_ref, .. }
            | ExecutionEvent::Failed { execution_ref, .. } => execution_ref,
        }
    }

    pub fn task_id(&self) -> TaskId {
        match self {
            ExecutionEvent::Started { payload, .. }
            | ExecutionEvent::Completed { payload, .. }
            | ExecutionEvent::Failed { payload, .. } => payload.task_id,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ExecutionEvent::Started { .. } => "started",
            ExecutionEvent::Completed { .. } => "completed",
            ExecutionEvent::Failed { .. } => "failed",
        }
    }
}
