//! Domain identifiers.
//!
//! - `TaskId`: store-assigned numeric identity of a task record.
//! - `ExecutionRef`: opaque handle issued by the queue engine for one live execution.
//!
//! 2 つの ID は出所が異なる（store / queue engine）ので、型で混同を防ぎます。

use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identifier of a task record (assigned by the store on insert).
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(u64);

impl TaskId {
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TaskId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Correlation handle between a task record and its execution in the queue engine.
///
/// The core never interprets the contents; only the engine that issued it does.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ExecutionRef(String);

impl ExecutionRef {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Ref for a one-shot execution, derived from a ULID.
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self(format!("exec-{ulid}"))
    }

    /// Ref for a repeat schedule keyed by its idempotency key.
    pub fn repeat(key: &str) -> Self {
        Self(format!("repeat:{key}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ExecutionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
