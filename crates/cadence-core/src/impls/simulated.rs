//! SimulatedProcessor - デモ用の実行関数
//!
//! Sleeps for a fixed duration, then fails with the configured probability.

use std::time::Duration;

use async_trait::async_trait;

use crate::domain::{ExecutionPayload, Task};
use crate::ports::{ProcessingError, TaskProcessor};

#[derive(Debug, Clone)]
pub struct SimulatedProcessor {
    duration: Duration,
    failure_rate: f64,
}

impl SimulatedProcessor {
    pub fn new(duration: Duration, failure_rate: f64) -> Self {
        Self {
            duration,
            failure_rate: failure_rate.clamp(0.0, 1.0),
        }
    }
}

#[async_trait]
impl TaskProcessor for SimulatedProcessor {
    async fn process(&self, payload: &ExecutionPayload) -> Result<Option<Task>, ProcessingError> {
        tracing::debug!(task_id = %payload.task_id, title = %payload.title, "processing task");
        tokio::time::sleep(self.duration).await;

        if rand::random::<f64>() < self.failure_rate {
            return Err(ProcessingError::new(format!(
                "Random failure for task {}",
                payload.task_id.get()
            )));
        }
        Ok(None)
    }
}
