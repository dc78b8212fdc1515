//! rebound-core
//!
//! Retry state machine for asynchronously processed tasks.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, status, record, delivery, backoff, decision, errors）
//! - **ports**: 抽象化レイヤー（TaskStore, TaskQueue, DeliveryTransport, UnitOfWork, Clock, IdGenerator）
//! - **app**: アプリケーションロジック（TaskService, TaskProcessor, DeadLetterMonitor, WorkerGroup）
//! - **impls**: 実装（InMemoryTaskStore, InMemoryTaskQueue など開発用）
//! - **config**: 環境変数からの設定

pub mod app;
pub mod config;
pub mod domain;
pub mod impls;
pub mod ports;

pub use config::ReboundConfig;
