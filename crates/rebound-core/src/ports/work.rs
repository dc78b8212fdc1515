//! UnitOfWork port - タスクの本体処理
//!
//! Processor は中身を知らない。成功か失敗かだけを見る。

use async_trait::async_trait;

use crate::domain::WorkError;

/// The opaque business logic run for each delivery.
///
/// Deliveries are at-least-once and are not deduplicated, so implementations
/// must tolerate being run more than once for the same payload.
#[async_trait]
pub trait UnitOfWork: Send + Sync {
    async fn run(&self, payload: &str) -> Result<(), WorkError>;
}
