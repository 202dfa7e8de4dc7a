use crate::core::domain::{ExecutionRequest, ExecutionResult};

/// Failures of the runner itself, as opposed to failures of the snippet,
/// which are reported inside `ExecutionResult`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum RunError {
    #[error("internal runner error: {msg}")]
    Internal { msg: String },
}

#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait ProcessRunner: std::fmt::Debug + Send + Sync {
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, RunError>;
}
