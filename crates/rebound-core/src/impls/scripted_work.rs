//! ScriptedWork - 結果を順番に返すタスク本体（テスト・デモ用）

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;

use crate::domain::WorkError;
use crate::ports::UnitOfWork;

/// One scripted result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    Succeed,
    Fail(String),

    /// Raise a fault instead of returning (exercises panic containment).
    Panic(String),
}

/// Unit of work that plays back a script, then succeeds forever.
#[derive(Debug, Default)]
pub struct ScriptedWork {
    steps: Mutex<VecDeque<Step>>,
    calls: AtomicUsize,
    payloads: Mutex<Vec<String>>,
}

impl ScriptedWork {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: Mutex::new(steps.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Fail `n` times with `message`, then succeed.
    pub fn failing_times(n: usize, message: &str) -> Self {
        Self::new(std::iter::repeat_n(Step::Fail(message.to_string()), n))
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Payloads seen so far, in call order.
    pub fn payloads(&self) -> Vec<String> {
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn next_step(&self, payload: &str) -> Step {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.payloads
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(payload.to_string());
        self.steps
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(Step::Succeed)
    }
}

#[async_trait]
impl UnitOfWork for ScriptedWork {
    async fn run(&self, payload: &str) -> Result<(), WorkError> {
        match self.next_step(payload) {
            Step::Succeed => Ok(()),
            Step::Fail(message) => Err(WorkError::new(message)),
            Step::Panic(message) => panic!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plays_script_then_succeeds() {
        let work = ScriptedWork::failing_times(2, "nope");
        assert_eq!(work.run("a").await, Err(WorkError::new("nope")));
        assert_eq!(work.run("b").await, Err(WorkError::new("nope")));
        assert_eq!(work.run("c").await, Ok(()));
        assert_eq!(work.calls(), 3);
        assert_eq!(work.payloads(), vec!["a", "b", "c"]);
    }
}
