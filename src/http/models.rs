use serde::{Deserialize, Serialize};

use crate::core::domain::ErrorKind;

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteResponse {
    pub output: String,
    pub error_message: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub execution_time_ms: u64,
    pub output_truncated: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub active_executions: usize,
    pub queued_executions: usize,
    pub free_slots: usize,
}
