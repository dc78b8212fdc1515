//! SimulatedWork - デモ・テスト用のタスク本体
//!
//! 設定した確率で失敗する。本番の契約には含まれない。

use async_trait::async_trait;
use rand::Rng;

use crate::domain::WorkError;
use crate::ports::UnitOfWork;

/// Unit of work that fails with probability `failure_rate`.
#[derive(Debug, Clone)]
pub struct SimulatedWork {
    failure_rate: f64,
}

impl SimulatedWork {
    /// `failure_rate` is clamped into `[0, 1]`; NaN means never fail.
    pub fn new(failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self { failure_rate }
    }

    pub fn failure_rate(&self) -> f64 {
        self.failure_rate
    }
}

#[async_trait]
impl UnitOfWork for SimulatedWork {
    async fn run(&self, payload: &str) -> Result<(), WorkError> {
        if rand::thread_rng().gen_bool(self.failure_rate) {
            return Err(WorkError::new(format!(
                "simulated failure (rate={}) for payload {payload:?}",
                self.failure_rate
            )));
        }
        Ok(())
    }
}
