//! InMemoryTaskStore - 開発用・テスト用の task record 正本
//!
//! # 実装詳細
//! - BTreeMap<TaskId, Task> で id 順を保持（find_all の順序保証）
//! - tokio::sync::Mutex で排他制御。1 行の read-modify-write は 1 ロック内で完結
//! - id は 1 から単調増加。削除しても再利用しない

use std::collections::BTreeMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{NewTask, Task, TaskChanges, TaskId, UpdateCondition};
use crate::ports::{StoreError, TaskStore};

struct StoreState {
    rows: BTreeMap<TaskId, Task>,
    next_id: u64,
}

pub struct InMemoryTaskStore {
    state: Mutex<StoreState>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(StoreState {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: NewTask) -> Result<Task, StoreError> {
        let mut state = self.state.lock().await;
        let id = TaskId::new(state.next_id);
        state.next_id += 1;

        let row = task.into_task(id);
        state.rows.insert(id, row.clone());
        Ok(row)
    }

    async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
        Ok(self.state.lock().await.rows.get(&id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Task>, StoreError> {
        Ok(self.state.lock().await.rows.values().cloned().collect())
    }

    async fn update(
        &self,
        id: TaskId,
        condition: UpdateCondition,
        changes: &TaskChanges,
    ) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        match state.rows.get_mut(&id) {
            Some(row) if condition.holds_for(row) => {
                row.apply(changes);
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete(&self, id: TaskId) -> Result<u64, StoreError> {
        let removed = self.state.lock().await.rows.remove(&id);
        Ok(u64::from(removed.is_some()))
    }

    async fn delete_all(&self) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let removed = state.rows.len() as u64;
        state.rows.clear();
        Ok(removed)
    }
}
