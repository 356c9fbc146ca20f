//! App - アプリケーション層
//!
//! このモジュールは、ports を組み合わせてアプリケーションロジックを実装します。
//!
//! # 主要コンポーネント
//! - **AppBuilder**: アプリケーションの構築とワイヤリング
//! - **SchedulingCoordinator**: create / update / delete を store + queue engine 操作に変換
//! - **ExecutionEventHandler**: started / completed / failed を record に反映して publish
//! - **WorkerGroup**: lease → process → 結果報告 → イベント dispatch の実行ループ
//! - **Status**: store / engine の件数集計

pub mod builder;
pub mod coordinator;
pub mod event_handler;
pub mod status;
pub mod worker_loop;

// 主要な型を再エクスポート
pub use self::builder::{App, AppBuilder, BuildError};
pub use self::coordinator::SchedulingCoordinator;
pub use self::event_handler::ExecutionEventHandler;
pub use self::status::{ExecutionCounts, StatusReport, TaskCounts};
pub use self::worker_loop::WorkerGroup;
