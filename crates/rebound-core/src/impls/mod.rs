//! Impls - ports の実装（開発用・テスト用・デモ用）
//!
//! # 含まれる実装
//! - **InMemoryTaskStore**: in-memory の正本
//! - **InMemoryTaskQueue**: 遅延配送と dead-letter path を持つ in-memory transport
//! - **SimulatedWork**: 失敗率を設定できるタスク本体
//! - **ScriptedWork**: 結果を順番に返すタスク本体
//! - **FaultyStore / FaultyQueue**: 部分障害の注入
//!
//! 永続化や本物のキュー（DynamoDB, SQS など）は別クレートで ports を実装する。

pub mod faulty;
pub mod inmem_queue;
pub mod inmem_store;
pub mod scripted_work;
pub mod simulated_work;

pub use self::faulty::{FaultyQueue, FaultyStore, QueueOp, StoreOp};
pub use self::inmem_queue::{InMemoryTaskQueue, QuarantinedMessage, QueueDepths};
pub use self::inmem_store::InMemoryTaskStore;
pub use self::scripted_work::{ScriptedWork, Step};
pub use self::simulated_work::SimulatedWork;
