//! TaskProcessor port - 実行関数そのもの
//!
//! The work a task performs is outside the core. The processor only reports
//! success (optionally with a task snapshot that saves the handler a store
//! read) or failure.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{ExecutionPayload, Task};

/// A failed run. Not a core error: it becomes a `failed` outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ProcessingError {
    pub message: String,
}

impl ProcessingError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait TaskProcessor: Send + Sync {
    async fn process(&self, payload: &ExecutionPayload) -> Result<Option<Task>, ProcessingError>;
}
