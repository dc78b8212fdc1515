//! App - アプリケーション層
//!
//! ports を組み合わせてリトライの状態機械を実装します。
//!
//! # 主要コンポーネント
//! - **TaskService**: 受付とステータス照会
//! - **TaskProcessor**: 1 delivery = 1 attempt（成功 / retry / dead-letter）
//! - **DeadLetterMonitor**: dead-letter path から FAILED を保証
//! - **WorkerGroup**: transport を読んで processor / monitor を回す
//! - **StatusCounts**: ステータス別の件数

pub mod monitor;
pub mod processor;
pub mod status;
pub mod submission;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::monitor::{DeadLetterMonitor, MonitorOutcome};
pub use self::processor::{ProcessOutcome, TaskProcessor};
pub use self::status::StatusCounts;
pub use self::submission::{SUBMITTED_MESSAGE, SubmitRequest, SubmitResponse, TaskService};
pub use self::worker_pool::{RedeliveryPolicy, WorkerGroup};
