//! ExecutionListener port - 実行イベントの受け口
//!
//! One method per event; `dispatch` routes the typed event enum. The engine
//! side (worker pool) only ever calls `dispatch`.

use async_trait::async_trait;

use crate::domain::{CadenceError, ExecutionContext, ExecutionEvent, ExecutionPayload, ExecutionRef, Task};

#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn on_started(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        context: ExecutionContext,
    ) -> Result<(), CadenceError>;

    async fn on_completed(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        result: Option<Task>,
        context: ExecutionContext,
    ) -> Result<(), CadenceError>;

    async fn on_failed(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        error: &str,
        context: ExecutionContext,
    ) -> Result<(), CadenceError>;

    async fn dispatch(&self, event: ExecutionEvent) -> Result<(), CadenceError> {
        match event {
            ExecutionEvent::Started {
                execution_ref,
                payload,
                context,
            } => self.on_started(&execution_ref, &payload, context).await,
            ExecutionEvent::Completed {
                execution_ref,
                payload,
                result,
                context,
            } => self.on_completed(&execution_ref, &payload, result, context).await,
            ExecutionEvent::Failed {
                execution_ref,
                payload,
                error,
                context,
            } => self.on_failed(&execution_ref, &payload, &error, context).await,
        }
    }
}
