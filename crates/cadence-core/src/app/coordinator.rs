//! SchedulingCoordinator - create / update / delete を store と queue engine の操作に変換
//!
//! # 設計原則
//! - store write と queue effect は必ず対で残す（片方だけ commit しない）
//! - 独立した store / queue 操作は並行に発行して join してから返す
//! - in-place update は queue effect を先に、record write を最後に行う（失敗時は queue 側を戻す）
//! - record mutation の自動 retry はしない
//! - queue client はコンストラクタで注入（グローバルを持たない）

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};

use crate::domain::{
    Cadence, CadenceError, ScheduleRequest, Task, TaskChanges, TaskDefinition, TaskId, TaskPatch,
    TaskStatus, UpdateCondition,
};
use crate::ports::{Clock, ExecutionQueue, ExecutionState, ExecutionView, QueueError, TaskStore};

pub struct SchedulingCoordinator {
    store: Arc<dyn TaskStore>,
    queue: Arc<dyn ExecutionQueue>,
    clock: Arc<dyn Clock>,
    min_lead_time: Duration,
}

impl SchedulingCoordinator {
    pub fn new(
        store: Arc<dyn TaskStore>,
        queue: Arc<dyn ExecutionQueue>,
        clock: Arc<dyn Clock>,
        min_lead_time: Duration,
    ) -> Self {
        Self {
            store,
            queue,
            clock,
            min_lead_time,
        }
    }

    /// Validate, persist, schedule. Returns the saved task with its
    /// `execution_ref` (and mirrored `run_at` for recurring tasks).
    pub async fn create(&self, definition: TaskDefinition) -> Result<Task, CadenceError> {
        let now = self.clock.now();
        let cadence = definition.validate(now, self.min_lead_time)?;
        self.persist_and_schedule(&definition, cadence, now).await
    }

    /// Update a task.
    ///
    /// - terminal one-time task: `Conflict`
    /// - recurring (or becoming recurring): replaced by a new task with a new id
    /// - one-time: patched in place; `Ok(None)` when its execution is gone or running
    pub async fn update(&self, id: TaskId, patch: TaskPatch) -> Result<Option<Task>, CadenceError> {
        let task = self.find_one(id).await?;
        if task.is_terminal() {
            return Err(CadenceError::Conflict(format!(
                "{id} is completed and can only be deleted"
            )));
        }

        let now = self.clock.now();
        if task.is_recurring || patch.is_recurring == Some(true) {
            return self.replace(&task, &patch, now).await.map(Some);
        }
        self.update_in_place(&task, &patch, now).await
    }

    /// Cancel the execution and delete the record. Returns the deleted task.
    pub async fn delete(&self, id: TaskId) -> Result<Task, CadenceError> {
        let task = self.find_one(id).await?;
        if self.remove(&task).await? == 0 {
            return Err(CadenceError::NotFound(id));
        }

        tracing::info!(task_id = %id, "task deleted");
        Ok(task)
    }

    /// Drop every execution and every record. Returns the number of records removed.
    pub async fn delete_all(&self) -> Result<u64, CadenceError> {
        let obliterate = async { self.queue.obliterate_all().await.map_err(CadenceError::from) };
        let delete = async { self.store.delete_all().await.map_err(CadenceError::from) };
        let ((), removed) = tokio::try_join!(obliterate, delete)?;

        tracing::info!(removed, "all tasks deleted");
        Ok(removed)
    }

    pub async fn find_all(&self) -> Result<Vec<Task>, CadenceError> {
        Ok(self.store.find_all().await?)
    }

    pub async fn find_one(&self, id: TaskId) -> Result<Task, CadenceError> {
        self.store
            .find_by_id(id)
            .await?
            .ok_or(CadenceError::NotFound(id))
    }

    async fn persist_and_schedule(
        &self,
        definition: &TaskDefinition,
        cadence: Cadence,
        now: DateTime<Utc>,
    ) -> Result<Task, CadenceError> {
        let mut task = self.store.insert(definition.to_new_task(now)).await?;
        let request = ScheduleRequest::for_task(&task, cadence, now);
        let is_recurring = request.is_recurring();

        let scheduled = match self.queue.schedule(request).await {
            Ok(scheduled) => scheduled,
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "schedule failed, rolling back task record");
                if let Err(rollback) = self.store.delete(task.id).await {
                    tracing::error!(task_id = %task.id, error = %rollback, "rollback of task record failed");
                }
                return Err(err.into());
            }
        };

        let mut changes = TaskChanges::new().execution_ref(Some(scheduled.execution_ref.clone()));
        if is_recurring {
            changes = changes.run_at(scheduled.next_run_at);
        }

        let condition = UpdateCondition::unless_terminal(is_recurring);
        match self.store.update(task.id, condition, &changes).await {
            Ok(0) => {
                // either deleted meanwhile, or a worker already finished the run
                if let Some(current) = self.store.find_by_id(task.id).await? {
                    tracing::debug!(task_id = %task.id, status = %current.status, "execution finished before its ref was recorded");
                    return Ok(current);
                }
                self.queue.cancel(&scheduled.execution_ref, is_recurring).await?;
                return Err(CadenceError::NotFound(task.id));
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "recording execution ref failed, rolling back");
                let cancel = self.queue.cancel(&scheduled.execution_ref, is_recurring);
                let delete = self.store.delete(task.id);
                let (cancelled, deleted) = tokio::join!(cancel, delete);
                if let Err(e) = cancelled {
                    tracing::error!(execution_ref = %scheduled.execution_ref, error = %e, "rollback cancel failed");
                }
                if let Err(e) = deleted {
                    tracing::error!(task_id = %task.id, error = %e, "rollback delete failed");
                }
                return Err(err.into());
            }
        }

        task.apply(&changes);
        tracing::info!(
            task_id = %task.id,
            execution_ref = %scheduled.execution_ref,
            is_recurring,
            run_at = ?task.run_at,
            "task scheduled"
        );
        Ok(task)
    }

    /// Replace a task with one built from `patch` merged over it.
    ///
    /// The replacement is created first and the original removed after; if
    /// removing the original fails, the replacement is removed again.
    async fn replace(&self, task: &Task, patch: &TaskPatch, now: DateTime<Utc>) -> Result<Task, CadenceError> {
        let definition = patch.merge_over(task);
        let cadence = definition.validate(now, self.min_lead_time)?;
        let replacement = self.persist_and_schedule(&definition, cadence, now).await?;

        match self.remove(task).await {
            Ok(affected) => {
                if affected == 0 {
                    tracing::debug!(task_id = %task.id, "original task already gone during replace");
                }
            }
            Err(err) => {
                tracing::error!(
                    task_id = %task.id,
                    replacement_id = %replacement.id,
                    error = %err,
                    "removing original task failed, rolling back replacement"
                );
                if let Err(rollback) = self.remove(&replacement).await {
                    tracing::error!(task_id = %replacement.id, error = %rollback, "rollback of replacement failed");
                }
                return Err(err);
            }
        }

        tracing::info!(
            old_task_id = %task.id,
            task_id = %replacement.id,
            execution_ref = ?replacement.execution_ref,
            "task replaced"
        );
        Ok(replacement)
    }

    async fn update_in_place(
        &self,
        task: &Task,
        patch: &TaskPatch,
        now: DateTime<Utc>,
    ) -> Result<Option<Task>, CadenceError> {
        patch.validate_in_place(now, self.min_lead_time)?;

        let Some(execution_ref) = task.execution_ref.as_ref() else {
            tracing::warn!(task_id = %task.id, "task has no execution, update skipped");
            return Ok(None);
        };
        let Some(execution) = self.queue.fetch(execution_ref).await? else {
            tracing::warn!(task_id = %task.id, execution_ref = %execution_ref, "execution not found, update skipped");
            return Ok(None);
        };
        if execution.state == ExecutionState::Active {
            tracing::warn!(task_id = %task.id, execution_ref = %execution_ref, "execution is running, update skipped");
            return Ok(None);
        }
        tracing::debug!(task_id = %task.id, state = ?execution.state, "patching live execution");

        let rescheduled = match patch.run_at {
            Some(run_at) => {
                if !self.queue.reschedule(execution_ref, run_at - now).await? {
                    tracing::warn!(task_id = %task.id, execution_ref = %execution_ref, "execution left the waiting state, update skipped");
                    return Ok(None);
                }
                true
            }
            None => false,
        };
        match self.queue.update_payload(execution_ref, patch).await {
            Ok(()) => {}
            Err(QueueError::NotFound(_)) => {
                tracing::warn!(task_id = %task.id, execution_ref = %execution_ref, "execution vanished during update");
                return Ok(None);
            }
            Err(err) => {
                if rescheduled {
                    self.restore_execution(task, &execution, true, now).await;
                }
                return Err(err.into());
            }
        }

        let mut changes = patch.to_in_place_changes();
        if execution.state == ExecutionState::Failed && !rescheduled {
            // a failed execution only runs again when it gets a new runAt
            changes.status = None;
        }
        let condition = UpdateCondition::StatusIsNot(TaskStatus::Completed);
        let affected = match self.store.update(task.id, condition, &changes).await {
            Ok(affected) => affected,
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "task update failed, restoring execution");
                self.restore_execution(task, &execution, rescheduled, now).await;
                return Err(err.into());
            }
        };
        if affected == 0 {
            tracing::warn!(task_id = %task.id, "task changed underneath the update");
            return Ok(None);
        }

        tracing::info!(task_id = %task.id, rescheduled, "task updated in place");
        Ok(self.store.find_by_id(task.id).await?)
    }

    /// Put an execution's payload (and due time) back to what they were
    /// before a failed in-place update.
    async fn restore_execution(&self, task: &Task, before: &ExecutionView, rescheduled: bool, now: DateTime<Utc>) {
        let execution_ref = &before.execution_ref;
        let payload = TaskPatch::title(before.payload.title.clone());
        if let Err(e) = self.queue.update_payload(execution_ref, &payload).await {
            tracing::error!(task_id = %task.id, execution_ref = %execution_ref, error = %e, "restoring payload failed");
        }
        if !rescheduled {
            return;
        }
        if before.state == ExecutionState::Failed {
            tracing::warn!(task_id = %task.id, execution_ref = %execution_ref, "failed execution stays re-armed");
            return;
        }
        if let Err(e) = self.queue.reschedule(execution_ref, before.due_at - now).await {
            tracing::error!(task_id = %task.id, execution_ref = %execution_ref, error = %e, "restoring due time failed");
        }
    }

    /// Delete the record, then cancel its execution.
    /// Returns the number of records deleted.
    ///
    /// A record that could not be deleted keeps its execution.
    async fn remove(&self, task: &Task) -> Result<u64, CadenceError> {
        let affected = self.store.delete(task.id).await?;
        if let Some(execution_ref) = &task.execution_ref {
            self.queue.cancel(execution_ref, task.is_recurring).await?;
        }
        Ok(affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ExecutionRef;
    use crate::impls::InMemoryTaskStore;
    use crate::ports::{FixedClock, LeaseSource, ScheduledExecution, StoreError, UlidGenerator};
    use crate::queue::{InMemoryExecutionQueue, RetryPolicy};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use rstest::rstest;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 2, 0).unwrap()
    }

    struct Fixture {
        clock: Arc<FixedClock>,
        store: Arc<InMemoryTaskStore>,
        queue: Arc<InMemoryExecutionQueue>,
        coordinator: SchedulingCoordinator,
    }

    fn engine(clock: &Arc<FixedClock>) -> Arc<InMemoryExecutionQueue> {
        let clock: Arc<dyn Clock> = clock.clone();
        Arc::new(InMemoryExecutionQueue::new(
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(clock)),
            RetryPolicy::none(),
        ))
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = engine(&clock);
        let coordinator = SchedulingCoordinator::new(
            store.clone(),
            queue.clone(),
            clock.clone(),
            Duration::minutes(15),
        );
        Fixture {
            clock,
            store,
            queue,
            coordinator,
        }
    }

    /// Queue engine that refuses every schedule call.
    struct RefusingQueue;

    #[async_trait]
    impl ExecutionQueue for RefusingQueue {
        async fn schedule(&self, _request: ScheduleRequest) -> Result<ScheduledExecution, QueueError> {
            Err(QueueError::OperationFailed("engine down".to_string()))
        }
        async fn cancel(&self, _r: &ExecutionRef, _is_recurring: bool) -> Result<(), QueueError> {
            Ok(())
        }
        async fn fetch(&self, _r: &ExecutionRef) -> Result<Option<ExecutionView>, QueueError> {
            Ok(None)
        }
        async fn update_payload(&self, r: &ExecutionRef, _patch: &TaskPatch) -> Result<(), QueueError> {
            Err(QueueError::NotFound(r.clone()))
        }
        async fn reschedule(&self, _r: &ExecutionRef, _delay: Duration) -> Result<bool, QueueError> {
            Ok(false)
        }
        async fn obliterate_all(&self) -> Result<(), QueueError> {
            Ok(())
        }
    }

    /// Engine whose runs are already finished when `schedule` returns,
    /// as if a worker picked them up immediately.
    struct FinishingQueue {
        inner: Arc<InMemoryExecutionQueue>,
        store: Arc<InMemoryTaskStore>,
    }

    #[async_trait]
    impl ExecutionQueue for FinishingQueue {
        async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledExecution, QueueError> {
            let task_id = request.task_id;
            let scheduled = self.inner.schedule(request).await?;
            let done = TaskChanges::new()
                .status(TaskStatus::Completed)
                .run_at(None)
                .execution_ref(None);
            self.store
                .update(task_id, UpdateCondition::Exists, &done)
                .await
                .map_err(|e| QueueError::OperationFailed(e.to_string()))?;
            Ok(scheduled)
        }
        async fn cancel(&self, r: &ExecutionRef, is_recurring: bool) -> Result<(), QueueError> {
            self.inner.cancel(r, is_recurring).await
        }
        async fn fetch(&self, r: &ExecutionRef) -> Result<Option<ExecutionView>, QueueError> {
            self.inner.fetch(r).await
        }
        async fn update_payload(&self, r: &ExecutionRef, patch: &TaskPatch) -> Result<(), QueueError> {
            self.inner.update_payload(r, patch).await
        }
        async fn reschedule(&self, r: &ExecutionRef, delay: Duration) -> Result<bool, QueueError> {
            self.inner.reschedule(r, delay).await
        }
        async fn obliterate_all(&self) -> Result<(), QueueError> {
            self.inner.obliterate_all().await
        }
    }

    /// Store that can be told to refuse updates, or the deletion of one row.
    struct FlakyStore {
        inner: InMemoryTaskStore,
        refuse_updates: AtomicBool,
        refuse_delete_of: Mutex<Option<TaskId>>,
    }

    impl FlakyStore {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                inner: InMemoryTaskStore::new(),
                refuse_updates: AtomicBool::new(false),
                refuse_delete_of: Mutex::new(None),
            })
        }
    }

    #[async_trait]
    impl TaskStore for FlakyStore {
        async fn insert(&self, task: crate::domain::NewTask) -> Result<Task, StoreError> {
            self.inner.insert(task).await
        }
        async fn find_by_id(&self, id: TaskId) -> Result<Option<Task>, StoreError> {
            self.inner.find_by_id(id).await
        }
        async fn find_all(&self) -> Result<Vec<Task>, StoreError> {
            self.inner.find_all().await
        }
        async fn update(
            &self,
            id: TaskId,
            condition: UpdateCondition,
            changes: &TaskChanges,
        ) -> Result<u64, StoreError> {
            if self.refuse_updates.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("update refused".to_string()));
            }
            self.inner.update(id, condition, changes).await
        }
        async fn delete(&self, id: TaskId) -> Result<u64, StoreError> {
            if *self.refuse_delete_of.lock().unwrap() == Some(id) {
                return Err(StoreError::Unavailable("delete refused".to_string()));
            }
            self.inner.delete(id).await
        }
        async fn delete_all(&self) -> Result<u64, StoreError> {
            self.inner.delete_all().await
        }
    }

    fn flaky_fixture() -> (Arc<FlakyStore>, Arc<InMemoryExecutionQueue>, SchedulingCoordinator) {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = FlakyStore::new();
        let queue = engine(&clock);
        let coordinator = SchedulingCoordinator::new(store.clone(), queue.clone(), clock, Duration::minutes(15));
        (store, queue, coordinator)
    }

    #[tokio::test]
    async fn create_one_time_task_schedules_an_execution() {
        let f = fixture();
        let run_at = t0() + Duration::minutes(20);

        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", run_at))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.run_at, Some(run_at));
        let execution_ref = task.execution_ref.clone().expect("execution ref recorded");

        let view = f.queue.fetch(&execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Delayed);
        assert_eq!(view.due_at, run_at);
        assert_eq!(view.payload.task_id, task.id);

        let stored = f.store.find_by_id(task.id).await.unwrap().unwrap();
        assert_eq!(stored, task);
    }

    #[tokio::test]
    async fn create_recurring_task_mirrors_next_boundary() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();

        assert_eq!(task.run_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 5, 0).unwrap()));
        assert_eq!(task.frequency.as_deref(), Some("*/5 * * * *"));
        assert_eq!(
            task.execution_ref.as_ref().map(ExecutionRef::as_str),
            Some(format!("repeat:{}", task.id.get()).as_str())
        );
    }

    #[rstest]
    #[case::blank_title(TaskDefinition::one_time("  ", t0() + Duration::hours(1)))]
    #[case::too_soon(TaskDefinition::one_time("Soon", t0() + Duration::minutes(14)))]
    #[case::missing_run_at(TaskDefinition { run_at: None, ..TaskDefinition::one_time("x", t0()) })]
    #[case::bad_frequency(TaskDefinition::recurring("Sync", "every five minutes"))]
    #[tokio::test]
    async fn create_rejects_invalid_definitions(#[case] definition: TaskDefinition) {
        let f = fixture();
        let err = f.coordinator.create(definition).await.unwrap_err();

        assert!(matches!(err, CadenceError::Validation(_)), "got {err:?}");
        assert!(f.store.is_empty().await);
        assert_eq!(f.queue.counts().await.total(), 0);
    }

    #[tokio::test]
    async fn schedule_failure_rolls_back_the_record() {
        let clock: Arc<dyn Clock> = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryTaskStore::new());
        let coordinator =
            SchedulingCoordinator::new(store.clone(), Arc::new(RefusingQueue), clock, Duration::minutes(15));

        let err = coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap_err();

        assert!(matches!(err, CadenceError::ExecutionEngine(_)));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn update_recurring_task_replaces_it() {
        let f = fixture();
        let original = f
            .coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();
        let old_ref = original.execution_ref.clone().unwrap();

        let patch = TaskPatch {
            frequency: Some("0 * * * *".to_string()),
            ..TaskPatch::default()
        };
        let replacement = f.coordinator.update(original.id, patch).await.unwrap().unwrap();

        assert_ne!(replacement.id, original.id);
        assert_eq!(replacement.title, "Sync");
        assert_eq!(replacement.frequency.as_deref(), Some("0 * * * *"));
        assert_eq!(replacement.run_at, Some(Utc.with_ymd_and_hms(2024, 1, 1, 13, 0, 0).unwrap()));
        assert!(f.queue.fetch(&old_ref).await.unwrap().is_none());
        assert!(f.store.find_by_id(original.id).await.unwrap().is_none());
        assert_eq!(f.queue.counts().await.delayed, 1);
    }

    #[tokio::test]
    async fn invalid_recurring_update_leaves_everything_untouched() {
        let f = fixture();
        let original = f
            .coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();

        let patch = TaskPatch {
            frequency: Some("nonsense".to_string()),
            ..TaskPatch::default()
        };
        let err = f.coordinator.update(original.id, patch).await.unwrap_err();

        assert!(matches!(err, CadenceError::Validation(_)));
        assert_eq!(f.coordinator.find_all().await.unwrap(), vec![original]);
    }

    #[tokio::test]
    async fn one_time_task_becoming_recurring_is_replaced() {
        let f = fixture();
        let original = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();

        let patch = TaskPatch {
            is_recurring: Some(true),
            frequency: Some("*/5 * * * *".to_string()),
            ..TaskPatch::default()
        };
        let replacement = f.coordinator.update(original.id, patch).await.unwrap().unwrap();

        assert!(replacement.is_recurring);
        assert_ne!(replacement.id, original.id);
        assert!(f.queue.fetch(original.execution_ref.as_ref().unwrap()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_one_time_task_in_place() {
        let f = fixture();
        let original = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();
        let execution_ref = original.execution_ref.clone().unwrap();
        let new_run_at = t0() + Duration::hours(2);

        let patch = TaskPatch {
            title: Some("Report v2".to_string()),
            run_at: Some(new_run_at),
            ..TaskPatch::default()
        };
        let updated = f.coordinator.update(original.id, patch).await.unwrap().unwrap();

        assert_eq!(updated.id, original.id);
        assert_eq!(updated.title, "Report v2");
        assert_eq!(updated.run_at, Some(new_run_at));
        assert_eq!(updated.execution_ref, Some(execution_ref.clone()));

        let view = f.queue.fetch(&execution_ref).await.unwrap().unwrap();
        assert_eq!(view.payload.title, "Report v2");
        assert_eq!(view.due_at, new_run_at);
    }

    #[tokio::test]
    async fn update_after_execution_was_consumed_returns_nothing() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();
        f.queue.cancel(task.execution_ref.as_ref().unwrap(), false).await.unwrap();

        let result = f
            .coordinator
            .update(task.id, TaskPatch::title("Renamed"))
            .await
            .unwrap();

        assert!(result.is_none());
        assert_eq!(f.store.find_by_id(task.id).await.unwrap().unwrap().title, "Report");
    }

    #[tokio::test]
    async fn completed_one_time_task_rejects_updates() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();
        let done = TaskChanges::new()
            .status(TaskStatus::Completed)
            .run_at(None)
            .execution_ref(None);
        f.store.update(task.id, UpdateCondition::Exists, &done).await.unwrap();

        let err = f
            .coordinator
            .update(task.id, TaskPatch::title("Again"))
            .await
            .unwrap_err();
        assert!(matches!(err, CadenceError::Conflict(_)));
    }

    #[tokio::test]
    async fn in_place_update_validates_run_at() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();

        let patch = TaskPatch {
            run_at: Some(t0() + Duration::minutes(5)),
            ..TaskPatch::default()
        };
        let err = f.coordinator.update(task.id, patch).await.unwrap_err();
        assert!(matches!(err, CadenceError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_twice_reports_not_found() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();

        let deleted = f.coordinator.delete(task.id).await.unwrap();
        assert_eq!(deleted.id, task.id);
        assert_eq!(f.queue.counts().await.total(), 0);

        let err = f.coordinator.delete(task.id).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn delete_all_clears_store_and_engine() {
        let f = fixture();
        f.coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();
        f.coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();

        assert_eq!(f.coordinator.delete_all().await.unwrap(), 2);
        assert!(f.coordinator.find_all().await.unwrap().is_empty());
        assert_eq!(f.queue.counts().await.total(), 0);
    }

    #[tokio::test]
    async fn find_one_reports_missing_tasks() {
        let f = fixture();
        let err = f.coordinator.find_one(TaskId::new(42)).await.unwrap_err();
        assert!(matches!(err, CadenceError::NotFound(id) if id == TaskId::new(42)));
    }

    #[tokio::test]
    async fn update_of_a_running_execution_changes_nothing() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();
        f.clock.advance(Duration::hours(1));
        let lease = f.queue.lease().await.expect("due execution");
        assert_eq!(Some(&lease.execution_ref), task.execution_ref.as_ref());

        let patch = TaskPatch {
            title: Some("Renamed".to_string()),
            run_at: Some(f.clock.now() + Duration::hours(2)),
            ..TaskPatch::default()
        };
        let result = f.coordinator.update(task.id, patch).await.unwrap();

        assert!(result.is_none());
        assert_eq!(f.store.find_by_id(task.id).await.unwrap().unwrap(), task);
        let view = f.queue.fetch(&lease.execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Active);
        assert_eq!(view.payload.title, "Report");
    }

    #[tokio::test]
    async fn store_failure_during_in_place_update_restores_the_execution() {
        let (store, queue, coordinator) = flaky_fixture();
        let run_at = t0() + Duration::hours(1);
        let task = coordinator
            .create(TaskDefinition::one_time("Report", run_at))
            .await
            .unwrap();
        store.refuse_updates.store(true, Ordering::SeqCst);

        let patch = TaskPatch {
            title: Some("Renamed".to_string()),
            run_at: Some(t0() + Duration::hours(2)),
            ..TaskPatch::default()
        };
        let err = coordinator.update(task.id, patch).await.unwrap_err();

        assert!(matches!(err, CadenceError::Store(_)), "got {err:?}");
        assert_eq!(store.find_by_id(task.id).await.unwrap().unwrap(), task);
        let view = queue.fetch(task.execution_ref.as_ref().unwrap()).await.unwrap().unwrap();
        assert_eq!(view.payload.title, "Report");
        assert_eq!(view.due_at, run_at);
        assert_eq!(view.state, ExecutionState::Delayed);
    }

    #[tokio::test]
    async fn store_failure_after_scheduling_rolls_back_both_sides() {
        let (store, queue, coordinator) = flaky_fixture();
        store.refuse_updates.store(true, Ordering::SeqCst);

        let err = coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap_err();

        assert!(matches!(err, CadenceError::Store(_)), "got {err:?}");
        assert!(store.inner.is_empty().await);
        assert_eq!(queue.counts().await.total(), 0);
    }

    #[tokio::test]
    async fn failed_removal_of_the_original_rolls_back_the_replacement() {
        let (store, queue, coordinator) = flaky_fixture();
        let original = coordinator
            .create(TaskDefinition::recurring("Sync", "*/5 * * * *"))
            .await
            .unwrap();
        *store.refuse_delete_of.lock().unwrap() = Some(original.id);

        let patch = TaskPatch {
            frequency: Some("0 * * * *".to_string()),
            ..TaskPatch::default()
        };
        let err = coordinator.update(original.id, patch).await.unwrap_err();

        assert!(matches!(err, CadenceError::Store(_)), "got {err:?}");
        assert_eq!(coordinator.find_all().await.unwrap(), vec![original.clone()]);
        assert_eq!(queue.counts().await.delayed, 1);
        assert!(queue.fetch(original.execution_ref.as_ref().unwrap()).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn run_finishing_before_its_ref_is_recorded_stays_terminal() {
        let clock = Arc::new(FixedClock::new(t0()));
        let store = Arc::new(InMemoryTaskStore::new());
        let queue = Arc::new(FinishingQueue {
            inner: engine(&clock),
            store: store.clone(),
        });
        let coordinator = SchedulingCoordinator::new(store.clone(), queue, clock, Duration::zero());

        let task = coordinator
            .create(TaskDefinition::one_time("Quick", t0()))
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.execution_ref, None);
        assert_eq!(task.run_at, None);
        assert_eq!(store.find_by_id(task.id).await.unwrap().unwrap(), task);
    }

    #[tokio::test]
    async fn failed_execution_is_rerun_only_with_a_new_run_at() {
        let f = fixture();
        let task = f
            .coordinator
            .create(TaskDefinition::one_time("Report", t0() + Duration::hours(1)))
            .await
            .unwrap();
        let execution_ref = task.execution_ref.clone().unwrap();
        f.clock.advance(Duration::hours(1));
        let lease = f.queue.lease().await.expect("due execution");
        f.queue.fail(&lease, "boom").await.unwrap();
        let failed = TaskChanges::new()
            .status(TaskStatus::Failed)
            .run_at(None)
            .failed_reason(Some("boom".to_string()));
        f.store.update(task.id, UpdateCondition::Exists, &failed).await.unwrap();

        let renamed = f
            .coordinator
            .update(task.id, TaskPatch::title("Report v2"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(renamed.title, "Report v2");
        assert_eq!(renamed.status, TaskStatus::Failed);
        let view = f.queue.fetch(&execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Failed);
        assert_eq!(view.payload.title, "Report v2");

        let retry_at = f.clock.now() + Duration::hours(1);
        let patch = TaskPatch {
            run_at: Some(retry_at),
            ..TaskPatch::default()
        };
        let rearmed = f.coordinator.update(task.id, patch).await.unwrap().unwrap();
        assert_eq!(rearmed.status, TaskStatus::Pending);
        assert_eq!(rearmed.run_at, Some(retry_at));
        let view = f.queue.fetch(&execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Delayed);
        assert_eq!(view.due_at, retry_at);
    }
}
