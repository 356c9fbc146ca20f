//! TaskStore port - task record の正本（source of truth）
//!
//! # 設計原則
//! - 1 行単位の atomic create / read / update / delete
//! - update / delete は「実際に変更した行数」を返す
//! - 0 行 = レコードが消えた or 状態が変わった → 呼び出し側は skip

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{NewTask, Task, TaskChanges, TaskId, UpdateCondition};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("{0}")]
    Other(String),
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a row and return it with its store-assigned id.
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError>;

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError>;

    /// All rows, ordered by id.
    async fn find_all(&self) -> Result<Vec<Task>, StoreError>;

    /// Conditional update by id. Returns the number of rows changed (0 or 1).
    async fn update(
        &self,
        id: TaskId,
        condition: UpdateCondition,
        changes: &TaskChanges,
    ) -> Result<u64, StoreError>;

    /// Returns the number of rows deleted (0 or 1).
    async fn delete(&self, id: TaskId) -> Result<u64, StoreError>;

    /// Returns the number of rows deleted.
    async fn delete_all(&self) -> Result<u64, StoreError>;
}
