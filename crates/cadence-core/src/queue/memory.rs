//! In-memory queue engine.

use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, Notify};

use super::{ExecutionRecord, RetryPolicy};
use crate::app::status::ExecutionCounts;
use crate::domain::{ExecutionContext, ExecutionRef, ScheduleRequest, ScheduleTiming, TaskPatch};
use crate::ports::{
    Clock, ExecutionLease, ExecutionQueue, ExecutionState, ExecutionView, IdGenerator, LeaseSource,
    QueueError, ScheduledExecution,
};

/// Longest a waiting `lease` sleeps before re-checking the heap.
/// Keeps lease responsive to clocks that move without notifying.
const MAX_IDLE_WAIT: StdDuration = StdDuration::from_millis(250);

/// Scheduled execution entry for the priority queue.
///
/// We use Reverse ordering so BinaryHeap acts as a min-heap (earliest first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledEntry {
    due_at: DateTime<Utc>,
    execution_ref: ExecutionRef,
    version: u64,
}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering: earlier times have higher priority
        other
            .due_at
            .cmp(&self.due_at)
            .then_with(|| other.execution_ref.cmp(&self.execution_ref))
    }
}

/// In-memory engine state.
struct EngineState {
    /// All execution records (single source of truth).
    records: HashMap<ExecutionRef, ExecutionRecord>,

    /// Idempotency key -> execution.
    keys: HashMap<String, ExecutionRef>,

    /// Delayed executions ordered by due time.
    scheduled: BinaryHeap<ScheduledEntry>,

    /// Bumped by `obliterate_all`; leases from older generations are void.
    generation: u64,

    closed: bool,
}

impl EngineState {
    fn new() -> Self {
        Self {
            records: HashMap::new(),
            keys: HashMap::new(),
            scheduled: BinaryHeap::new(),
            generation: 0,
            closed: false,
        }
    }

    fn push(&mut self, record: &ExecutionRecord) {
        self.scheduled.push(ScheduledEntry {
            due_at: record.due_at,
            execution_ref: record.execution_ref.clone(),
            version: record.version,
        });
    }

    fn remove(&mut self, execution_ref: &ExecutionRef) -> Option<ExecutionRecord> {
        let record = self.records.remove(execution_ref)?;
        if let Some(key) = &record.idempotency_key {
            self.keys.remove(key);
        }
        Some(record)
    }

    /// Pop the earliest due execution that is still valid.
    fn pop_due(&mut self, now: DateTime<Utc>) -> Option<ExecutionRef> {
        while let Some(entry) = self.scheduled.peek() {
            if entry.due_at > now {
                return None; // Heap is sorted, so we can stop
            }

            let entry = self.scheduled.pop()?;
            let valid = self.records.get(&entry.execution_ref).is_some_and(|record| {
                record.version == entry.version && record.state == ExecutionState::Delayed
            });
            if valid {
                return Some(entry.execution_ref);
            }
        }
        None
    }

    fn counts(&self) -> ExecutionCounts {
        let mut counts = ExecutionCounts::default();
        for record in self.records.values() {
            match record.state {
                ExecutionState::Delayed => counts.delayed += 1,
                ExecutionState::Active => counts.active += 1,
                ExecutionState::Failed => counts.failed += 1,
            }
        }
        counts
    }
}

/// In-memory implementation of the execution queue engine.
///
/// - one-shot executions fire once after their delay, are removed on
///   completion and retained when they fail for good
/// - repeat executions fire on every occurrence of their rule and are
///   re-armed after each run (runs of one execution never overlap)
/// - one-shot failures retry with exponential backoff per `RetryPolicy`
pub struct InMemoryExecutionQueue {
    state: Arc<Mutex<EngineState>>,
    notify: Arc<Notify>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    retry_policy: RetryPolicy,
}

impl InMemoryExecutionQueue {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, retry_policy: RetryPolicy) -> Self {
        Self {
            state: Arc::new(Mutex::new(EngineState::new())),
            notify: Arc::new(Notify::new()),
            clock,
            ids,
            retry_policy,
        }
    }

    /// Stop handing out leases. Waiting `lease` calls return `None`.
    pub async fn close(&self) {
        self.state.lock().await.closed = true;
        self.notify.notify_waiters();
    }

    pub async fn counts(&self) -> ExecutionCounts {
        self.state.lock().await.counts()
    }

    /// Wake waiting consumers, e.g. after moving a `FixedClock`.
    pub fn wake(&self) {
        self.notify.notify_waiters();
    }

    fn due_after(&self, delay: Duration) -> DateTime<Utc> {
        self.clock.now() + delay.max(Duration::zero())
    }
}

#[async_trait]
impl ExecutionQueue for InMemoryExecutionQueue {
    async fn schedule(&self, request: ScheduleRequest) -> Result<ScheduledExecution, QueueError> {
        let now = self.clock.now();
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }

        if let Some(key) = &request.idempotency_key
            && let Some(existing) = state.keys.get(key)
            && let Some(record) = state.records.get(existing)
        {
            tracing::debug!(
                execution_ref = %record.execution_ref,
                idempotency_key = %key,
                "schedule deduplicated by idempotency key"
            );
            return Ok(ScheduledExecution {
                execution_ref: record.execution_ref.clone(),
                next_run_at: Some(record.due_at),
            });
        }

        let record = match request.timing {
            ScheduleTiming::OneShot { delay } => {
                let execution_ref = self.ids.generate_execution_ref();
                let mut record = ExecutionRecord::one_shot(execution_ref, request.payload, self.due_after(delay));
                record.idempotency_key = request.idempotency_key;
                record
            }
            ScheduleTiming::Repeat { rule } => {
                let due_at = rule.next_after(now).ok_or_else(|| {
                    QueueError::OperationFailed(format!(
                        "recurrence '{}' has no upcoming occurrence",
                        rule.expression()
                    ))
                })?;
                let execution_ref = match &request.idempotency_key {
                    Some(key) => ExecutionRef::repeat(key),
                    None => self.ids.generate_execution_ref(),
                };
                ExecutionRecord::repeat(execution_ref, request.payload, rule, request.idempotency_key, due_at)
            }
        };

        let scheduled = ScheduledExecution {
            execution_ref: record.execution_ref.clone(),
            next_run_at: Some(record.due_at),
        };
        if let Some(key) = &record.idempotency_key {
            state.keys.insert(key.clone(), record.execution_ref.clone());
        }
        state.push(&record);
        state.records.insert(record.execution_ref.clone(), record);

        drop(state);
        self.notify.notify_one();

        tracing::debug!(
            task_id = %request.task_id,
            execution_ref = %scheduled.execution_ref,
            "execution scheduled"
        );
        Ok(scheduled)
    }

    async fn cancel(&self, execution_ref: &ExecutionRef, is_recurring: bool) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        match state.remove(execution_ref) {
            Some(record) => {
                if record.is_recurring() != is_recurring {
                    tracing::warn!(
                        execution_ref = %execution_ref,
                        is_recurring,
                        "cancel called with a mismatched recurrence flag"
                    );
                }
                tracing::debug!(execution_ref = %execution_ref, "execution cancelled");
            }
            None => tracing::debug!(execution_ref = %execution_ref, "cancel: execution already gone"),
        }
        Ok(())
    }

    async fn fetch(&self, execution_ref: &ExecutionRef) -> Result<Option<ExecutionView>, QueueError> {
        let state = self.state.lock().await;
        Ok(state.records.get(execution_ref).map(ExecutionRecord::view))
    }

    async fn update_payload(&self, execution_ref: &ExecutionRef, patch: &TaskPatch) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let record = state
            .records
            .get_mut(execution_ref)
            .ok_or_else(|| QueueError::NotFound(execution_ref.clone()))?;
        record.payload.apply_patch(patch);
        Ok(())
    }

    async fn reschedule(&self, execution_ref: &ExecutionRef, delay: Duration) -> Result<bool, QueueError> {
        let due_at = self.due_after(delay);
        let mut state = self.state.lock().await;
        let Some(record) = state.records.get_mut(execution_ref) else {
            return Ok(false);
        };
        if record.is_recurring() || record.state == ExecutionState::Active {
            return Ok(false);
        }

        record.arm(due_at);
        record.attempts_made = 0;
        let record = record.clone();
        state.push(&record);

        drop(state);
        self.notify.notify_one();
        Ok(true)
    }

    async fn obliterate_all(&self) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        let dropped = state.records.len();
        state.records.clear();
        state.keys.clear();
        state.scheduled.clear();
        state.generation += 1;

        drop(state);
        self.notify.notify_waiters();
        tracing::info!(dropped, "all executions obliterated");
        Ok(())
    }
}

#[async_trait]
impl LeaseSource for InMemoryExecutionQueue {
    async fn lease(&self) -> Option<ExecutionLease> {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                if state.closed {
                    return None;
                }

                let now = self.clock.now();
                if let Some(execution_ref) = state.pop_due(now) {
                    let generation = state.generation;
                    if let Some(record) = state.records.get_mut(&execution_ref) {
                        record.start_run(now);
                        let context = ExecutionContext {
                            run_count: record.run_count,
                            next_run_at: record.next_due_at,
                        };
                        return Some(ExecutionLease::new(
                            execution_ref,
                            record.payload.clone(),
                            context,
                            generation,
                        ));
                    }
                    continue;
                }

                // No due executions - wait until the earliest one or a notification
                state
                    .scheduled
                    .peek()
                    .and_then(|entry| (entry.due_at - now).to_std().ok())
                    .map_or(MAX_IDLE_WAIT, |until| until.min(MAX_IDLE_WAIT))
            };

            tokio::select! {
                _ = self.notify.notified() => {},
                _ = tokio::time::sleep(wait) => {},
            }
        }
    }

    async fn complete(&self, lease: &ExecutionLease) -> Result<Option<ExecutionContext>, QueueError> {
        let (context, should_notify) = {
            let mut state = self.state.lock().await;
            if lease.generation() != state.generation {
                return Ok(None);
            }

            let Some(record) = state.records.get_mut(&lease.execution_ref) else {
                // Cancelled while running; the outcome still gets reported.
                return Ok(Some(ExecutionContext {
                    run_count: lease.context.run_count,
                    next_run_at: None,
                }));
            };

            record.last_error = None;
            let next_due_at = record.next_due_at.filter(|_| record.is_recurring());
            let context = ExecutionContext {
                run_count: record.run_count,
                next_run_at: next_due_at,
            };

            match next_due_at {
                Some(next) => {
                    record.arm(next);
                    let record = record.clone();
                    state.push(&record);
                    (context, true)
                }
                None => {
                    state.remove(&lease.execution_ref);
                    (context, false)
                }
            }
        };

        if should_notify {
            self.notify.notify_one();
        }
        Ok(Some(context))
    }

    async fn fail(&self, lease: &ExecutionLease, error: &str) -> Result<Option<ExecutionContext>, QueueError> {
        let now = self.clock.now();
        let (context, should_notify) = {
            let mut state = self.state.lock().await;
            if lease.generation() != state.generation {
                return Ok(None);
            }

            let Some(record) = state.records.get_mut(&lease.execution_ref) else {
                return Ok(Some(ExecutionContext {
                    run_count: lease.context.run_count,
                    next_run_at: None,
                }));
            };
            record.last_error = Some(error.to_string());
            let is_recurring = record.is_recurring();

            let next_due_at = if is_recurring {
                record.next_due_at
            } else if self.retry_policy.should_retry(record.attempts_made) {
                let delay = self.retry_policy.next_delay(record.attempts_made);
                let delay = Duration::from_std(delay).unwrap_or(Duration::MAX);
                Some(now.checked_add_signed(delay).unwrap_or(DateTime::<Utc>::MAX_UTC))
            } else {
                None
            };

            let context = ExecutionContext {
                run_count: record.run_count,
                next_run_at: next_due_at,
            };

            match next_due_at {
                Some(next) => {
                    record.arm(next);
                    let record = record.clone();
                    state.push(&record);
                    tracing::debug!(
                        execution_ref = %lease.execution_ref,
                        next_run_at = %next,
                        "execution re-armed after failure"
                    );
                    (context, true)
                }
                None if is_recurring => {
                    // Rule exhausted.
                    state.remove(&lease.execution_ref);
                    (context, false)
                }
                None => {
                    record.mark_failed(error);
                    (context, false)
                }
            }
        };

        if should_notify {
            self.notify.notify_one();
        }
        Ok(Some(context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ExecutionPayload, RecurrenceRule, TaskId};
    use crate::ports::{SystemClock, UlidGenerator};

    fn payload(id: u64, is_recurring: bool) -> ExecutionPayload {
        ExecutionPayload {
            task_id: TaskId::new(id),
            title: format!("task {id}"),
            is_recurring,
            frequency: is_recurring.then(|| "* * * * * *".to_string()),
        }
    }

    fn one_shot(id: u64, delay: Duration) -> ScheduleRequest {
        ScheduleRequest {
            task_id: TaskId::new(id),
            payload: payload(id, false),
            timing: ScheduleTiming::OneShot { delay },
            idempotency_key: None,
        }
    }

    fn every_second(id: u64) -> ScheduleRequest {
        ScheduleRequest {
            task_id: TaskId::new(id),
            payload: payload(id, true),
            timing: ScheduleTiming::Repeat {
                rule: RecurrenceRule::parse("* * * * * *").unwrap(),
            },
            idempotency_key: Some(id.to_string()),
        }
    }

    fn queue(retry_policy: RetryPolicy) -> InMemoryExecutionQueue {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        InMemoryExecutionQueue::new(Arc::clone(&clock), Arc::new(UlidGenerator::new(clock)), retry_policy)
    }

    async fn lease_soon(queue: &InMemoryExecutionQueue) -> ExecutionLease {
        tokio::time::timeout(StdDuration::from_secs(3), queue.lease())
            .await
            .expect("lease timed out")
            .expect("queue closed")
    }

    #[tokio::test]
    async fn schedule_and_counts() {
        let queue = queue(RetryPolicy::none());
        queue.schedule(one_shot(1, Duration::minutes(20))).await.unwrap();

        let counts = queue.counts().await;
        assert_eq!(counts.delayed, 1);
        assert_eq!(counts.active, 0);
    }

    #[tokio::test]
    async fn lease_transitions_to_active() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::zero())).await.unwrap();

        let lease = lease_soon(&queue).await;
        assert_eq!(lease.execution_ref, scheduled.execution_ref);
        assert_eq!(lease.payload.task_id, TaskId::new(1));
        assert_eq!(lease.context.run_count, 1);

        let view = queue.fetch(&scheduled.execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Active);
    }

    #[tokio::test]
    async fn completed_one_shot_is_removed() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::zero())).await.unwrap();

        let lease = lease_soon(&queue).await;
        let context = queue.complete(&lease).await.unwrap().unwrap();

        assert_eq!(context.next_run_at, None);
        assert!(queue.fetch(&scheduled.execution_ref).await.unwrap().is_none());
        assert_eq!(queue.counts().await, ExecutionCounts::default());
    }

    #[tokio::test]
    async fn failed_one_shot_is_retained() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::zero())).await.unwrap();

        let lease = lease_soon(&queue).await;
        let context = queue.fail(&lease, "boom").await.unwrap().unwrap();

        assert_eq!(context.next_run_at, None);
        let view = queue.fetch(&scheduled.execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Failed);
        assert_eq!(queue.counts().await.failed, 1);
    }

    #[tokio::test]
    async fn failed_one_shot_retries_with_backoff() {
        let queue = queue(RetryPolicy {
            max_attempts: 2,
            base_delay: StdDuration::from_millis(50),
            multiplier: 2.0,
        });
        queue.schedule(one_shot(1, Duration::zero())).await.unwrap();

        let first = lease_soon(&queue).await;
        let context = queue.fail(&first, "boom").await.unwrap().unwrap();
        assert!(context.next_run_at.is_some());

        let second = lease_soon(&queue).await;
        assert_eq!(second.execution_ref, first.execution_ref);
        assert_eq!(second.context.run_count, 2);

        let context = queue.fail(&second, "boom again").await.unwrap().unwrap();
        assert_eq!(context.next_run_at, None);
        assert_eq!(queue.counts().await.failed, 1);
    }

    #[tokio::test]
    async fn idempotency_key_deduplicates_repeat_schedules() {
        let queue = queue(RetryPolicy::none());
        let a = queue.schedule(every_second(7)).await.unwrap();
        let b = queue.schedule(every_second(7)).await.unwrap();

        assert_eq!(a.execution_ref, b.execution_ref);
        assert_eq!(a.execution_ref.as_str(), "repeat:7");
        assert_eq!(queue.counts().await.delayed, 1);
    }

    #[tokio::test]
    async fn repeat_execution_is_re_armed_after_completion() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(every_second(7)).await.unwrap();

        let lease = lease_soon(&queue).await;
        let next = lease.context.next_run_at.expect("repeat has a next fire time");

        let context = queue.complete(&lease).await.unwrap().unwrap();
        assert_eq!(context.next_run_at, Some(next));

        let view = queue.fetch(&scheduled.execution_ref).await.unwrap().unwrap();
        assert_eq!(view.state, ExecutionState::Delayed);
        assert_eq!(view.due_at, next);
    }

    #[tokio::test]
    async fn cancel_removes_the_execution_and_is_idempotent() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(every_second(7)).await.unwrap();

        queue.cancel(&scheduled.execution_ref, true).await.unwrap();
        queue.cancel(&scheduled.execution_ref, true).await.unwrap();

        assert!(queue.fetch(&scheduled.execution_ref).await.unwrap().is_none());

        // The key is free again.
        let again = queue.schedule(every_second(7)).await.unwrap();
        assert_eq!(again.execution_ref, scheduled.execution_ref);
    }

    #[tokio::test]
    async fn update_payload_requires_a_live_execution() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::minutes(20))).await.unwrap();

        queue
            .update_payload(&scheduled.execution_ref, &TaskPatch::title("renamed"))
            .await
            .unwrap();
        let view = queue.fetch(&scheduled.execution_ref).await.unwrap().unwrap();
        assert_eq!(view.payload.title, "renamed");

        let err = queue
            .update_payload(&ExecutionRef::new("exec-missing"), &TaskPatch::title("x"))
            .await
            .unwrap_err();
        assert!(matches!(err, QueueError::NotFound(_)));
    }

    #[tokio::test]
    async fn reschedule_moves_a_waiting_one_shot() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::minutes(20))).await.unwrap();

        assert!(queue.reschedule(&scheduled.execution_ref, Duration::zero()).await.unwrap());
        let lease = lease_soon(&queue).await;
        assert_eq!(lease.execution_ref, scheduled.execution_ref);

        // Running executions cannot be moved.
        assert!(!queue.reschedule(&scheduled.execution_ref, Duration::zero()).await.unwrap());
        assert!(!queue.reschedule(&ExecutionRef::new("exec-missing"), Duration::zero()).await.unwrap());
    }

    #[tokio::test]
    async fn obliterated_leases_report_nothing() {
        let queue = queue(RetryPolicy::none());
        queue.schedule(one_shot(1, Duration::zero())).await.unwrap();
        queue.schedule(every_second(2)).await.unwrap();

        let lease = lease_soon(&queue).await;
        queue.obliterate_all().await.unwrap();

        assert_eq!(queue.complete(&lease).await.unwrap(), None);
        assert_eq!(queue.fail(&lease, "late").await.unwrap(), None);
        assert_eq!(queue.counts().await, ExecutionCounts::default());
    }

    #[tokio::test]
    async fn cancelled_while_running_still_reports() {
        let queue = queue(RetryPolicy::none());
        let scheduled = queue.schedule(one_shot(1, Duration::zero())).await.unwrap();
        let lease = lease_soon(&queue).await;

        queue.cancel(&scheduled.execution_ref, false).await.unwrap();
        let context = queue.complete(&lease).await.unwrap().unwrap();
        assert_eq!(context.run_count, 1);
        assert_eq!(context.next_run_at, None);
    }

    #[tokio::test]
    async fn close_releases_waiting_consumers() {
        let queue = Arc::new(queue(RetryPolicy::none()));
        let waiter = {
            let queue = Arc::clone(&queue);
            tokio::spawn(async move { queue.lease().await })
        };

        tokio::time::sleep(StdDuration::from_millis(20)).await;
        queue.close().await;

        let leased = tokio::time::timeout(StdDuration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(leased.is_none());
        assert!(matches!(
            queue.schedule(one_shot(1, Duration::zero())).await,
            Err(QueueError::Closed)
        ));
    }
}
