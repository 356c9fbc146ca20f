//! Ports - 抽象化レイヤー
//!
//! Hexagonal Architecture の「ポート」。外部システム（record store, queue
//! engine, live-update channel, 実行関数）へのインターフェースを定義し、
//! coordinator / event handler には明示的な依存として注入します。
//! グローバルな queue client は持ちません。

pub mod clock;
pub mod execution_listener;
pub mod execution_queue;
pub mod id_generator;
pub mod processor;
pub mod task_store;
pub mod update_publisher;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::execution_listener::ExecutionListener;
pub use self::execution_queue::{
    ExecutionLease, ExecutionQueue, ExecutionState, ExecutionView, LeaseSource, QueueError,
    ScheduledExecution,
};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::processor::{ProcessingError, TaskProcessor};
pub use self::task_store::{StoreError, TaskStore};
pub use self::update_publisher::{NoopPublisher, UpdatePublisher};
