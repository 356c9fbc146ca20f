//! Domain model (ids, task record, status, schedule requests, events, errors).

pub mod errors;
pub mod events;
pub mod ids;
pub mod recurrence;
pub mod schedule;
pub mod state;
pub mod task;

pub use self::errors::CadenceError;
pub use self::events::{ExecutionContext, ExecutionEvent};
pub use self::ids::{ExecutionRef, TaskId};
pub use self::recurrence::{RecurrenceError, RecurrenceRule};
pub use self::schedule::{ExecutionPayload, ScheduleRequest, ScheduleTiming};
pub use self::state::TaskStatus;
pub use self::task::{
    Cadence, NewTask, Task, TaskChanges, TaskDefinition, TaskPatch, TaskSnapshot, UpdateCondition,
};
