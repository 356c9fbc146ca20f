//! Errors - コア操作のエラー分類
//!
//! - Validation: malformed create/update input, returned to the caller as is
//! - NotFound: the task id is absent from the store
//! - Conflict: mutation of a terminal one-time task
//! - ExecutionEngine: the queue engine failed to schedule/cancel/fetch
//! - Store: the record store failed
//!
//! Execution failures of the task itself are not errors here; they are
//! `failed` outcomes handled by the event handler.

use thiserror::Error;

use super::ids::TaskId;
use crate::ports::execution_queue::QueueError;
use crate::ports::task_store::StoreError;

#[derive(Debug, Error)]
pub enum CadenceError {
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("task {0} not found")]
    NotFound(TaskId),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("execution engine error: {0}")]
    ExecutionEngine(#[from] QueueError),

    #[error("task store error: {0}")]
    Store(#[from] StoreError),
}

impl CadenceError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, CadenceError::NotFound(_))
    }
}
