//! ExecutionQueue port - queue engine の抽象化
//!
//! The engine owns delay timers, repeat mechanics, retries and worker
//! throttling. The core only consumes this contract:
//! - producer side (`ExecutionQueue`): schedule / cancel / reschedule / fetch /
//!   update payload / obliterate
//! - consumer side (`LeaseSource`): lease a due execution, report its outcome
//!
//! Events produced while executions progress are delivered through
//! `ExecutionListener` (see `execution_listener.rs`).

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{ExecutionContext, ExecutionPayload, ExecutionRef, ScheduleRequest, TaskPatch};

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("execution {0} not found")]
    NotFound(ExecutionRef),

    #[error("queue is closed")]
    Closed,

    #[error("queue operation failed: {0}")]
    OperationFailed(String),
}

/// Result of a successful schedule call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledExecution {
    pub execution_ref: ExecutionRef,

    /// Next time the engine will fire the execution.
    pub next_run_at: Option<DateTime<Utc>>,
}

/// Engine-side state of an execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Waiting for its due time.
    Delayed,

    /// Leased by a worker.
    Active,

    /// Failed with no retries left; retained until removed.
    Failed,
}

/// Read-only view of an execution, as returned by `fetch`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionView {
    pub execution_ref: ExecutionRef,
    pub payload: ExecutionPayload,
    pub state: ExecutionState,
    pub due_at: DateTime<Utc>,
    pub run_count: u32,
    pub is_recurring: bool,
}

#[async_trait]
pub trait ExecutionQueue: Send + Sync {
    /// Schedule an execution. Same idempotency key => same execution.
    async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledExecution, QueueError>;

    /// Remove the execution (and its repeat rule when recurring).
    /// No-op if it is already gone. A running execution is not aborted.
    async fn cancel(&self, execution_ref: &ExecutionRef, is_recurring: bool) -> Result<(), QueueError>;

    async fn fetch(&self, execution_ref: &ExecutionRef) -> Result<Option<ExecutionView>, QueueError>;

    /// Merge a patch into the payload of a live execution.
    /// `QueueError::NotFound` if the execution is gone.
    async fn update_payload(&self, execution_ref: &ExecutionRef, patch: &TaskPatch) -> Result<(), QueueError>;

    /// Move a waiting or failed one-shot execution to fire after `delay`,
    /// keeping its ref. Returns `false` if it is gone, running, or recurring.
    async fn reschedule(&self, execution_ref: &ExecutionRef, delay: Duration) -> Result<bool, QueueError>;

    /// Drop every execution. Running ones finish but emit no further events.
    async fn obliterate_all(&self) -> Result<(), QueueError>;
}

/// A due execution handed to a worker.
#[derive(Debug, Clone)]
pub struct ExecutionLease {
    pub execution_ref: ExecutionRef,
    pub payload: ExecutionPayload,
    pub context: ExecutionContext,
    pub(crate) generation: u64,
}

impl ExecutionLease {
    pub fn new(
        execution_ref: ExecutionRef,
        payload: ExecutionPayload,
        context: ExecutionContext,
        generation: u64,
    ) -> Self {
        Self {
            execution_ref,
            payload,
            context,
            generation,
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Consumer side of the engine, driven by the worker pool.
///
/// `complete` / `fail` return `None` when the lease belongs to an obliterated
/// generation: the outcome is dropped and no event must be emitted.
#[async_trait]
pub trait LeaseSource: Send + Sync {
    /// Wait for the next due execution. `None` once the queue is closed.
    async fn lease(&self) -> Option<ExecutionLease>;

    async fn complete(&self, lease: &ExecutionLease) -> Result<Option<ExecutionContext>, QueueError>;

    async fn fail(&self, lease: &ExecutionLease, error: &str) -> Result<Option<ExecutionContext>, QueueError>;
}
