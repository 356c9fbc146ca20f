//! Task record and the inputs that create / mutate it.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::errors::CadenceError;
use super::ids::{ExecutionRef, TaskId};
use super::recurrence::RecurrenceRule;
use super::state::TaskStatus;

/// The durable record of a task.
///
/// Field-level invariants:
/// - `frequency` is `Some` iff `is_recurring`
/// - `run_at` is `Some` iff a pending/processing future execution exists
/// - a completed one-time task has neither `execution_ref` nor `run_at`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub title: String,
    pub is_recurring: bool,
    pub status: TaskStatus,
    pub run_at: Option<DateTime<Utc>>,
    pub frequency: Option<String>,
    pub execution_ref: Option<ExecutionRef>,
    pub attempts: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_reason: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Completed one-time tasks accept no mutation other than deletion.
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal(self.is_recurring)
    }

    /// Apply a partial update in place.
    pub fn apply(&mut self, changes: &TaskChanges) {
        if let Some(title) = &changes.title {
            self.title = title.clone();
        }
        if let Some(status) = changes.status {
            self.status = status;
        }
        if let Some(run_at) = changes.run_at {
            self.run_at = run_at;
        }
        if let Some(frequency) = &changes.frequency {
            self.frequency = frequency.clone();
        }
        if let Some(execution_ref) = &changes.execution_ref {
            self.execution_ref = execution_ref.clone();
        }
        if let Some(attempts) = changes.attempts {
            self.attempts = attempts;
        }
        if let Some(last_run_at) = changes.last_run_at {
            self.last_run_at = last_run_at;
        }
        if let Some(completed_at) = changes.completed_at {
            self.completed_at = completed_at;
        }
        if let Some(failed_reason) = &changes.failed_reason {
            self.failed_reason = failed_reason.clone();
        }
    }
}

/// A task row before the store assigns its identity.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub is_recurring: bool,
    pub run_at: Option<DateTime<Utc>>,
    pub frequency: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl NewTask {
    /// Materialize the row with a store-assigned id.
    pub fn into_task(self, id: TaskId) -> Task {
        Task {
            id,
            title: self.title,
            is_recurring: self.is_recurring,
            status: TaskStatus::Pending,
            run_at: self.run_at,
            frequency: self.frequency,
            execution_ref: None,
            attempts: 0,
            last_run_at: None,
            completed_at: None,
            failed_reason: None,
            created_at: self.created_at,
        }
    }
}

/// Client input for creating a task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    pub title: String,
    pub is_recurring: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

/// Validated cadence of a definition.
#[derive(Debug, Clone)]
pub enum Cadence {
    Once { run_at: DateTime<Utc> },
    Recurring { rule: RecurrenceRule },
}

impl TaskDefinition {
    pub fn one_time(title: impl Into<String>, run_at: DateTime<Utc>) -> Self {
        Self {
            title: title.into(),
            is_recurring: false,
            run_at: Some(run_at),
            frequency: None,
        }
    }

    pub fn recurring(title: impl Into<String>, frequency: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            is_recurring: true,
            run_at: None,
            frequency: Some(frequency.into()),
        }
    }

    /// Check the definition against the creation rules and return its cadence.
    pub fn validate(&self, now: DateTime<Utc>, min_lead: Duration) -> Result<Cadence, CadenceError> {
        validate_title(&self.title)?;

        if self.is_recurring {
            let frequency = self
                .frequency
                .as_deref()
                .ok_or_else(|| CadenceError::validation("frequency is required for a recurring task"))?;
            let rule = RecurrenceRule::parse(frequency)
                .map_err(|e| CadenceError::validation(e.to_string()))?;
            if rule.next_after(now).is_none() {
                return Err(CadenceError::validation(format!(
                    "frequency '{}' has no upcoming occurrence",
                    rule.expression()
                )));
            }
            return Ok(Cadence::Recurring { rule });
        }

        let run_at = self
            .run_at
            .ok_or_else(|| CadenceError::validation("runAt is required for a one-time task"))?;
        validate_run_at(run_at, now, min_lead)?;
        Ok(Cadence::Once { run_at })
    }

    /// The row to insert, with fields that do not belong to the cadence dropped.
    pub fn to_new_task(&self, created_at: DateTime<Utc>) -> NewTask {
        NewTask {
            title: self.title.trim().to_string(),
            is_recurring: self.is_recurring,
            run_at: if self.is_recurring { None } else { self.run_at },
            frequency: if self.is_recurring {
                self.frequency.as_deref().map(|f| f.trim().to_string())
            } else {
                None
            },
            created_at,
        }
    }
}

/// Client input for updating a task. Absent fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recurring: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<String>,
}

impl TaskPatch {
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Full definition obtained by laying this patch over an existing task.
    pub fn merge_over(&self, task: &Task) -> TaskDefinition {
        let is_recurring = self.is_recurring.unwrap_or(task.is_recurring);
        TaskDefinition {
            title: self.title.clone().unwrap_or_else(|| task.title.clone()),
            is_recurring,
            run_at: if is_recurring { None } else { self.run_at.or(task.run_at) },
            frequency: if is_recurring {
                self.frequency.clone().or_else(|| task.frequency.clone())
            } else {
                None
            },
        }
    }

    /// Rules for an in-place patch of a one-time task.
    pub fn validate_in_place(&self, now: DateTime<Utc>, min_lead: Duration) -> Result<(), CadenceError> {
        if let Some(title) = &self.title {
            validate_title(title)?;
        }
        if let Some(run_at) = self.run_at {
            validate_run_at(run_at, now, min_lead)?;
        }
        Ok(())
    }

    /// Store changes for an in-place update of a one-time task.
    pub fn to_in_place_changes(&self) -> TaskChanges {
        let mut changes = TaskChanges::new()
            .status(TaskStatus::Pending)
            .frequency(None);
        if let Some(title) = &self.title {
            changes = changes.title(title.trim());
        }
        if let Some(run_at) = self.run_at {
            changes = changes.run_at(Some(run_at));
        }
        changes
    }
}

fn validate_title(title: &str) -> Result<(), CadenceError> {
    if title.trim().is_empty() {
        return Err(CadenceError::validation("title must not be empty"));
    }
    Ok(())
}

fn validate_run_at(
    run_at: DateTime<Utc>,
    now: DateTime<Utc>,
    min_lead: Duration,
) -> Result<(), CadenceError> {
    if run_at < now + min_lead {
        return Err(CadenceError::validation(format!(
            "runAt must be at least {} minutes from now",
            min_lead.num_minutes()
        )));
    }
    Ok(())
}

/// Partial update of a task row.
///
/// Outer `Option` = "touch this column", inner `Option` = nullable value.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskChanges {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub run_at: Option<Option<DateTime<Utc>>>,
    pub frequency: Option<Option<String>>,
    pub execution_ref: Option<Option<ExecutionRef>>,
    pub attempts: Option<u32>,
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    pub completed_at: Option<Option<DateTime<Utc>>>,
    pub failed_reason: Option<Option<String>>,
}

impl TaskChanges {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn run_at(mut self, run_at: Option<DateTime<Utc>>) -> Self {
        self.run_at = Some(run_at);
        self
    }

    pub fn frequency(mut self, frequency: Option<String>) -> Self {
        self.frequency = Some(frequency);
        self
    }

    pub fn execution_ref(mut self, execution_ref: Option<ExecutionRef>) -> Self {
        self.execution_ref = Some(execution_ref);
        self
    }

    pub fn attempts(mut self, attempts: u32) -> Self {
        self.attempts = Some(attempts);
        self
    }

    pub fn last_run_at(mut self, last_run_at: Option<DateTime<Utc>>) -> Self {
        self.last_run_at = Some(last_run_at);
        self
    }

    pub fn completed_at(mut self, completed_at: Option<DateTime<Utc>>) -> Self {
        self.completed_at = Some(completed_at);
        self
    }

    pub fn failed_reason(mut self, failed_reason: Option<String>) -> Self {
        self.failed_reason = Some(failed_reason);
        self
    }

    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Precondition of a conditional update (compare-and-swap on the row).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateCondition {
    /// Update whenever the row exists.
    Exists,

    /// Update only if the row's status differs from the given one.
    StatusIsNot(TaskStatus),
}

impl UpdateCondition {
    pub fn holds_for(&self, task: &Task) -> bool {
        match self {
            UpdateCondition::Exists => true,
            UpdateCondition::StatusIsNot(status) => task.status != *status,
        }
    }

    /// Condition that protects a one-time task from leaving its terminal state.
    pub fn unless_terminal(is_recurring: bool) -> Self {
        if is_recurring {
            UpdateCondition::Exists
        } else {
            UpdateCondition::StatusIsNot(TaskStatus::Completed)
        }
    }
}

/// What gets pushed to live-update observers.
///
/// Either a full record, or only the columns one event touched. Absent fields
/// are omitted from the JSON so observers merge it over what they hold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskSnapshot {
    pub id: TaskId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_recurring: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TaskStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frequency: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<Option<String>>,
}

impl TaskSnapshot {
    /// A snapshot carrying only the id.
    pub fn new(id: TaskId) -> Self {
        Self {
            id,
            title: None,
            is_recurring: None,
            status: None,
            run_at: None,
            frequency: None,
            attempts: None,
            last_run_at: None,
            completed_at: None,
            failed_reason: None,
        }
    }

    pub fn from_changes(id: TaskId, changes: &TaskChanges) -> Self {
        Self {
            id,
            title: changes.title.clone(),
            is_recurring: None,
            status: changes.status,
            run_at: changes.run_at,
            frequency: changes.frequency.clone(),
            attempts: changes.attempts,
            last_run_at: changes.last_run_at,
            completed_at: changes.completed_at,
            failed_reason: changes.failed_reason.clone(),
        }
    }
}

impl From<&Task> for TaskSnapshot {
    fn from(task: &Task) -> Self {
        Self {
            id: task.id,
            title: Some(task.title.clone()),
            is_recurring: Some(task.is_recurring),
            status: Some(task.status),
            run_at: Some(task.run_at),
            frequency: Some(task.frequency.clone()),
            attempts: Some(task.attempts),
            last_run_at: Some(task.last_run_at),
            completed_at: Some(task.completed_at),
            failed_reason: Some(task.failed_reason.clone()),
        }
    }
}
