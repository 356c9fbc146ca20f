//! AppBuilder - アプリケーションの構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - 開発体験の改善（明確なエラーメッセージ）

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::app::coordinator::SchedulingCoordinator;
use crate::app::event_handler::ExecutionEventHandler;
use crate::app::status::{StatusReport, TaskCounts};
use crate::app::worker_loop::WorkerGroup;
use crate::config::Settings;
use crate::domain::{CadenceError, TaskSnapshot};
use crate::impls::{BroadcastPublisher, InMemoryTaskStore, SimulatedProcessor};
use crate::ports::{Clock, SystemClock, TaskProcessor, TaskStore, UlidGenerator};
use crate::queue::{InMemoryExecutionQueue, RetryPolicy};

/// AppBuilder はアプリケーションを構築
///
/// # 使用例
/// ```ignore
/// let app = AppBuilder::new(Settings::default())
///     .with_processor(Arc::new(MyProcessor))
///     .build()?;
/// let workers = app.start_workers();
/// ```
///
/// # Fail-fast 設計
/// - build() 時に settings を検証
/// - 不正な値があれば BuildError を返す（起動後に気づかない）
pub struct AppBuilder {
    settings: Settings,
    clock: Option<Arc<dyn Clock>>,
    store: Option<Arc<dyn TaskStore>>,
    processor: Option<Arc<dyn TaskProcessor>>,
}

/// BuildError はアプリケーション構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },
}

impl AppBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            clock: None,
            store: None,
            processor: None,
        }
    }

    /// Defaults to `SystemClock`.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Defaults to `InMemoryTaskStore`.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Defaults to `SimulatedProcessor` configured from `[simulation]`.
    pub fn with_processor(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// AppBuilder を構築して App を生成
    ///
    /// # 検証
    /// - workers.concurrency >= 1
    /// - retry.max_attempts >= 1, retry.multiplier >= 1
    /// - simulation.failure_rate が [0, 1]
    pub fn build(self) -> Result<App, BuildError> {
        validate(&self.settings)?;
        let settings = self.settings;

        let clock: Arc<dyn Clock> = match self.clock {
            Some(clock) => clock,
            None => Arc::new(SystemClock),
        };
        let store: Arc<dyn TaskStore> = match self.store {
            Some(store) => store,
            None => Arc::new(InMemoryTaskStore::new()),
        };
        let processor: Arc<dyn TaskProcessor> = match self.processor {
            Some(processor) => processor,
            None => Arc::new(SimulatedProcessor::new(
                Duration::from_millis(settings.simulation.duration_ms),
                settings.simulation.failure_rate,
            )),
        };

        let publisher = Arc::new(BroadcastPublisher::new(settings.publisher.capacity));
        let queue = Arc::new(InMemoryExecutionQueue::new(
            Arc::clone(&clock),
            Arc::new(UlidGenerator::new(Arc::clone(&clock))),
            RetryPolicy::from(&settings.retry),
        ));
        let coordinator = Arc::new(SchedulingCoordinator::new(
            Arc::clone(&store),
            queue.clone(),
            Arc::clone(&clock),
            settings.scheduling.min_lead_time(),
        ));
        let handler = Arc::new(ExecutionEventHandler::new(store, publisher.clone(), clock));

        Ok(App {
            settings,
            coordinator,
            handler,
            queue,
            publisher,
            processor,
        })
    }
}

fn validate(settings: &Settings) -> Result<(), BuildError> {
    if settings.workers.concurrency == 0 {
        return Err(BuildError::InvalidSetting {
            key: "workers.concurrency",
            reason: "must be at least 1".to_string(),
        });
    }
    if settings.retry.max_attempts == 0 {
        return Err(BuildError::InvalidSetting {
            key: "retry.max_attempts",
            reason: "must be at least 1".to_string(),
        });
    }
    if settings.retry.multiplier.is_nan() || settings.retry.multiplier < 1.0 {
        return Err(BuildError::InvalidSetting {
            key: "retry.multiplier",
            reason: format!("must be at least 1.0, got {}", settings.retry.multiplier),
        });
    }
    if !(0.0..=1.0).contains(&settings.simulation.failure_rate) {
        return Err(BuildError::InvalidSetting {
            key: "simulation.failure_rate",
            reason: format!("must be within [0, 1], got {}", settings.simulation.failure_rate),
        });
    }
    Ok(())
}

/// App はアプリケーションのランタイム
///
/// coordinator が inbound surface（create / list / get / update / delete）、
/// worker group が engine → event handler の経路を担う。
pub struct App {
    settings: Settings,
    coordinator: Arc<SchedulingCoordinator>,
    handler: Arc<ExecutionEventHandler>,
    queue: Arc<InMemoryExecutionQueue>,
    publisher: Arc<BroadcastPublisher>,
    processor: Arc<dyn TaskProcessor>,
}

impl App {
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn coordinator(&self) -> &Arc<SchedulingCoordinator> {
        &self.coordinator
    }

    pub fn queue(&self) -> &Arc<InMemoryExecutionQueue> {
        &self.queue
    }

    /// Live task snapshots published by the event handler.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskSnapshot> {
        self.publisher.subscribe()
    }

    /// Spawn `workers.concurrency` workers feeding the event handler.
    pub fn start_workers(&self) -> WorkerGroup {
        WorkerGroup::spawn(
            self.settings.workers.concurrency,
            self.queue.clone(),
            Arc::clone(&self.processor),
            self.handler.clone(),
        )
    }

    pub async fn status(&self) -> Result<StatusReport, CadenceError> {
        let tasks = self.coordinator.find_all().await?;
        Ok(StatusReport {
            tasks: TaskCounts::tally(&tasks),
            executions: self.queue.counts().await,
        })
    }

    /// Stop the workers and close the engine. In-flight executions finish first.
    pub async fn shutdown(&self, workers: WorkerGroup) {
        workers.request_shutdown();
        self.queue.close().await;
        workers.shutdown_and_join().await;
        tracing::info!("app stopped");
    }
}
