//! WorkerLoop - 実行ループ（lease → started → process → complete/fail → completed/failed）
//!
//! # フロー
//! 1. LeaseSource::lease() で due な execution を取得
//! 2. `Started` を listener に dispatch
//! 3. TaskProcessor::process() を実行
//! 4. 結果を engine に報告（complete / fail）。engine が次回時刻・retry を決める
//! 5. engine が返した context で `Completed` / `Failed` を dispatch
//!    （obliterate 済みの世代なら何も emit しない）
//!
//! 並列度 = worker 数。listener のエラーは log のみで、ループは止めない。

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::domain::ExecutionEvent;
use crate::ports::{ExecutionLease, ExecutionListener, LeaseSource, TaskProcessor};

/// Worker group handle.
/// - `request_shutdown()` で新しい lease の取得を止める
/// - `shutdown_and_join()` で全ワーカーの終了を待てる
pub struct WorkerGroup {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl WorkerGroup {
    /// Spawn `n` workers.
    pub fn spawn(
        n: usize,
        leases: Arc<dyn LeaseSource>,
        processor: Arc<dyn TaskProcessor>,
        listener: Arc<dyn ExecutionListener>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut joins = Vec::with_capacity(n);
        for worker_id in 0..n {
            let worker = Worker {
                id: worker_id,
                leases: Arc::clone(&leases),
                processor: Arc::clone(&processor),
                listener: Arc::clone(&listener),
            };
            let mut rx = shutdown_rx.clone();

            let join = tokio::spawn(async move {
                worker.run(&mut rx).await;
            });
            joins.push(join);
        }

        tracing::debug!(workers = n, "worker group started");
        Self { shutdown_tx, joins }
    }

    pub fn len(&self) -> usize {
        self.joins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty()
    }

    /// Request shutdown for all workers.
    /// In-flight executions are not cancelled; workers just stop taking leases.
    pub fn request_shutdown(&self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
    }

    /// Shutdown and wait for all workers.
    pub async fn shutdown_and_join(self) {
        self.request_shutdown();
        for join in self.joins {
            if let Err(e) = join.await {
                tracing::error!(error = %e, "worker task panicked");
            }
        }
    }
}

struct Worker {
    id: usize,
    leases: Arc<dyn LeaseSource>,
    processor: Arc<dyn TaskProcessor>,
    listener: Arc<dyn ExecutionListener>,
}

impl Worker {
    async fn run(&self, shutdown_rx: &mut watch::Receiver<bool>) {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }

            // lease は待つので shutdown と競合させる
            let lease = tokio::select! {
                changed = shutdown_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                lease = self.leases.lease() => lease,
            };

            let Some(lease) = lease else {
                // queue closed
                break;
            };
            self.execute(lease).await;
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    async fn execute(&self, lease: ExecutionLease) {
        self.dispatch(ExecutionEvent::Started {
            execution_ref: lease.execution_ref.clone(),
            payload: lease.payload.clone(),
            context: lease.context,
        })
        .await;

        let outcome = self.processor.process(&lease.payload).await;

        let event = match outcome {
            Ok(result) => match self.leases.complete(&lease).await {
                Ok(Some(context)) => Some(ExecutionEvent::Completed {
                    execution_ref: lease.execution_ref.clone(),
                    payload: lease.payload.clone(),
                    result,
                    context,
                }),
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(worker = self.id, execution_ref = %lease.execution_ref, error = %e, "complete report failed");
                    None
                }
            },
            Err(failure) => match self.leases.fail(&lease, &failure.message).await {
                Ok(Some(context)) => Some(ExecutionEvent::Failed {
                    execution_ref: lease.execution_ref.clone(),
                    payload: lease.payload.clone(),
                    error: failure.message,
                    context,
                }),
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(worker = self.id, execution_ref = %lease.execution_ref, error = %e, "fail report failed");
                    None
                }
            },
        };

        match event {
            Some(event) => self.dispatch(event).await,
            None => tracing::debug!(
                worker = self.id,
                execution_ref = %lease.execution_ref,
                "execution outcome dropped"
            ),
        }
    }

    async fn dispatch(&self, event: ExecutionEvent) {
        let name = event.name();
        let task_id = event.task_id();
        if let Err(e) = self.listener.dispatch(event).await {
            tracing::error!(worker = self.id, task_id = %task_id, event = name, error = %e, "event handler failed");
        }
    }
}
