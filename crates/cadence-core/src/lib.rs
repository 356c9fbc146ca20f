//! cadence-core
//!
//! Task lifecycle synchronization: keeps a durable record of one-time and
//! recurring tasks consistent with their executions in a queue engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task, status, recurrence, schedule, events, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, ExecutionQueue, LeaseSource, ExecutionListener, UpdatePublisher, TaskProcessor, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（builder, coordinator, event_handler, worker_loop, status）
//! - **queue**: queue engine の in-memory 実装（delay / repeat / retry）
//! - **impls**: ports の実装（InMemoryTaskStore, BroadcastPublisher, SimulatedProcessor）
//! - **config**: TOML settings

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;
pub mod queue;
