//! ExecutionEventHandler - queue engine からの実行イベントを record に反映
//!
//! # 設計原則
//! - 条件付き update のみ。影響行数 0 = record が消えた or 既に完了 → log して skip
//! - callback 中に record が見つからなくてもエラーにしない（削除との競合は正常系）
//! - 次回実行時刻は engine が計算したものを mirror するだけ
//! - 更新できたときだけ publish

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{
    CadenceError, ExecutionContext, ExecutionPayload, ExecutionRef, Task, TaskChanges, TaskId,
    TaskSnapshot, TaskStatus, UpdateCondition,
};
use crate::ports::{Clock, ExecutionListener, TaskStore, UpdatePublisher};

pub struct ExecutionEventHandler {
    store: Arc<dyn TaskStore>,
    publisher: Arc<dyn UpdatePublisher>,
    clock: Arc<dyn Clock>,
}

impl ExecutionEventHandler {
    pub fn new(store: Arc<dyn TaskStore>, publisher: Arc<dyn UpdatePublisher>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            publisher,
            clock,
        }
    }

    /// Conditional update guarded against resurrecting a completed one-time task.
    /// Returns `false` when nothing was updated.
    async fn apply(
        &self,
        event: &'static str,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        changes: &TaskChanges,
    ) -> Result<bool, CadenceError> {
        let condition = UpdateCondition::unless_terminal(payload.is_recurring);
        let affected = self.store.update(payload.task_id, condition, changes).await?;
        if affected == 0 {
            tracing::warn!(
                task_id = %payload.task_id,
                execution_ref = %execution_ref,
                event,
                "task not found or already completed, event skipped"
            );
            return Ok(false);
        }
        Ok(true)
    }

    async fn publish_current(&self, id: TaskId) -> Result<(), CadenceError> {
        match self.store.find_by_id(id).await? {
            Some(task) => self.publisher.publish(TaskSnapshot::from(&task)),
            None => tracing::debug!(task_id = %id, "task gone before publish"),
        }
        Ok(())
    }
}

#[async_trait]
impl ExecutionListener for ExecutionEventHandler {
    async fn on_started(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        context: ExecutionContext,
    ) -> Result<(), CadenceError> {
        let mut changes = TaskChanges::new()
            .status(TaskStatus::Processing)
            .last_run_at(Some(self.clock.now()))
            .attempts(context.run_count);
        if payload.is_recurring {
            changes = changes.run_at(context.next_run_at);
        }

        if !self.apply("started", execution_ref, payload, &changes).await? {
            return Ok(());
        }

        tracing::info!(
            task_id = %payload.task_id,
            execution_ref = %execution_ref,
            attempts = context.run_count,
            "task active"
        );
        self.publisher
            .publish(TaskSnapshot::from_changes(payload.task_id, &changes));
        Ok(())
    }

    async fn on_completed(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        result: Option<Task>,
        context: ExecutionContext,
    ) -> Result<(), CadenceError> {
        let mut changes = TaskChanges::new()
            .status(TaskStatus::Completed)
            .completed_at(Some(self.clock.now()))
            .failed_reason(None);
        changes = if payload.is_recurring {
            changes.run_at(context.next_run_at)
        } else {
            changes.run_at(None).execution_ref(None)
        };

        if !self.apply("completed", execution_ref, payload, &changes).await? {
            return Ok(());
        }

        tracing::info!(
            task_id = %payload.task_id,
            execution_ref = %execution_ref,
            next_run_at = ?context.next_run_at,
            "task completed"
        );
        match result {
            Some(mut task) => {
                task.apply(&changes);
                self.publisher.publish(TaskSnapshot::from(&task));
                Ok(())
            }
            None => self.publish_current(payload.task_id).await,
        }
    }

    async fn on_failed(
        &self,
        execution_ref: &ExecutionRef,
        payload: &ExecutionPayload,
        error: &str,
        context: ExecutionContext,
    ) -> Result<(), CadenceError> {
        let changes = TaskChanges::new()
            .status(TaskStatus::Failed)
            .failed_reason(Some(error.to_string()))
            .attempts(context.run_count)
            .run_at(context.next_run_at);

        if !self.apply("failed", execution_ref, payload, &changes).await? {
            return Ok(());
        }

        tracing::warn!(
            task_id = %payload.task_id,
            execution_ref = %execution_ref,
            error,
            "task failed"
        );
        self.publish_current(payload.task_id).await
    }
}
