//! IdGenerator port - execution ref の生成
//!
//! Task ids come from the store; only the queue engine mints ids, for
//! one-shot executions. Repeat schedules are keyed by their idempotency key
//! instead (see `ExecutionRef::repeat`).

use std::sync::Arc;

use ulid::Ulid;

use crate::domain::ExecutionRef;
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn generate_execution_ref(&self) -> ExecutionRef;
}

/// ULID based generator. The timestamp part comes from the clock so a
/// `FixedClock` gives deterministic prefixes in tests.
pub struct UlidGenerator {
    clock: Arc<dyn Clock>,
}

impl UlidGenerator {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }
}

impl IdGenerator for UlidGenerator {
    fn generate_execution_ref(&self) -> ExecutionRef {
        let timestamp_ms = self.clock.now().timestamp_millis().max(0) as u64;
        let ulid = Ulid::from_parts(timestamp_ms, rand::random());
        ExecutionRef::from_ulid(ulid)
    }
}
