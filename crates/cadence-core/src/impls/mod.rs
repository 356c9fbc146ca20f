//! Impls - 実装（開発用・テスト用）
//!
//! このモジュールには ports の実装を含めます。
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: 開発用の task record 正本
//! - **BroadcastPublisher**: tokio broadcast による live-update channel
//! - **SimulatedProcessor**: 一定時間 sleep してランダムに失敗するデモ用実行関数
//!
//! queue engine の in-memory 実装は `crate::queue` にあります。

pub mod broadcast_publisher;
pub mod inmem_store;
pub mod simulated;

// 主要な型を再エクスポート
pub use self::broadcast_publisher::BroadcastPublisher;
pub use self::inmem_store::InMemoryTaskStore;
pub use self::simulated::SimulatedProcessor;
