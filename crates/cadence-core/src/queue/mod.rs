//! Queue module: in-memory execution engine, its records, and retry logic.
//!
//! Implements both sides of the engine contract (`ports::ExecutionQueue` for
//! the coordinator, `ports::LeaseSource` for the worker pool). Swap it for a
//! real engine by implementing the same two traits.

mod memory;
mod record;
mod retry;

pub use memory::InMemoryExecutionQueue;
pub use record::ExecutionRecord;
pub use retry::RetryPolicy;
