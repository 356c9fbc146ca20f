//! Execution record: payload + timing + engine state.

use chrono::{DateTime, Utc};

use crate::domain::{ExecutionPayload, ExecutionRef, RecurrenceRule};
use crate::ports::{ExecutionState, ExecutionView};

/// Metadata + payload for one execution held by the engine.
///
/// Design:
/// - This is the single source of truth for an execution's state.
/// - The schedule heap holds `(due_at, ref, version)` only; an entry whose
///   version no longer matches is stale and gets dropped on pop.
#[derive(Debug, Clone)]
pub struct ExecutionRecord {
    pub execution_ref: ExecutionRef,
    pub payload: ExecutionPayload,

    /// `Some` for repeat executions.
    pub rule: Option<RecurrenceRule>,
    pub idempotency_key: Option<String>,

    pub state: ExecutionState,

    /// When the execution fires next (meaningful while `Delayed`).
    pub due_at: DateTime<Utc>,

    /// Next fire time computed when a repeat run starts.
    pub next_due_at: Option<DateTime<Utc>>,

    /// Runs started over the lifetime of the execution.
    pub run_count: u32,

    /// Runs made since the last reschedule (drives the retry policy).
    pub attempts_made: u32,

    /// Bumped on every re-arm; invalidates older heap entries.
    pub version: u64,

    pub last_error: Option<String>,
}

impl ExecutionRecord {
    pub fn one_shot(execution_ref: ExecutionRef, payload: ExecutionPayload, due_at: DateTime<Utc>) -> Self {
        Self {
            execution_ref,
            payload,
            rule: None,
            idempotency_key: None,
            state: ExecutionState::Delayed,
            due_at,
            next_due_at: None,
            run_count: 0,
            attempts_made: 0,
            version: 0,
            last_error: None,
        }
    }

    pub fn repeat(
        execution_ref: ExecutionRef,
        payload: ExecutionPayload,
        rule: RecurrenceRule,
        idempotency_key: Option<String>,
        due_at: DateTime<Utc>,
    ) -> Self {
        Self {
            rule: Some(rule),
            idempotency_key,
            ..Self::one_shot(execution_ref, payload, due_at)
        }
    }

    pub fn is_recurring(&self) -> bool {
        self.rule.is_some()
    }

    /// Mark as running. For repeat executions the following fire time is
    /// fixed here, so the context handed to the worker already carries it.
    pub fn start_run(&mut self, now: DateTime<Utc>) {
        self.state = ExecutionState::Active;
        self.run_count += 1;
        self.attempts_made += 1;
        self.next_due_at = self
            .rule
            .as_ref()
            .and_then(|rule| rule.next_after(now.max(self.due_at)));
    }

    /// Put the execution back to waiting for `due_at`.
    pub fn arm(&mut self, due_at: DateTime<Utc>) {
        self.state = ExecutionState::Delayed;
        self.due_at = due_at;
        self.version += 1;
    }

    /// Failed with no retries left.
    pub fn mark_failed(&mut self, error: &str) {
        self.state = ExecutionState::Failed;
        self.last_error = Some(error.to_string());
        self.version += 1;
    }

    pub fn view(&self) -> ExecutionView {
        ExecutionView {
            execution_ref: self.execution_ref.clone(),
            payload: self.payload.clone(),
            state: self.state,
            due_at: self.due_at,
            run_count: self.run_count,
            is_recurring: self.is_recurring(),
        }
    }
}
