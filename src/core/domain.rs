use std::time::Duration;

use serde::Serialize;
use uuid::Uuid;

/// A single snippet submitted for execution together with its limits.
#[derive(Clone, Debug)]
pub struct ExecutionRequest {
    pub id: Uuid,
    pub source: Vec<u8>,
    pub time_limit: Duration,
    pub memory_limit_bytes: Option<u64>,
}

impl ExecutionRequest {
    pub fn new(source: &str, limits: &ExecutionLimits) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.as_bytes().to_vec(),
            time_limit: limits.time_limit,
            memory_limit_bytes: limits.memory_limit_bytes,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ExecutionLimits {
    pub time_limit: Duration,
    pub memory_limit_bytes: Option<u64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Success,
    NonZeroExit(i32),
    TimedOut,
    Killed(i32),
    SpawnFailed(String),
}

/// Raw result of running one interpreter process.
#[derive(Clone, Debug)]
pub struct ExecutionResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub exit_status: ExitStatus,
    pub elapsed: Duration,
    pub output_truncated: bool,
}

impl ExecutionResult {
    pub fn spawn_failed(cause: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_status: ExitStatus::SpawnFailed(cause.into()),
            elapsed,
            output_truncated: false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NoInput,
    SyntaxError,
    RuntimeError,
    Timeout,
    ResourceExceeded,
    SpawnFailure,
    InternalError,
    /// Rejected before a process was spawned because the concurrency cap
    /// and its wait queue were both full.
    Overloaded,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NoInput => "no_input",
            ErrorKind::SyntaxError => "syntax_error",
            ErrorKind::RuntimeError => "runtime_error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ResourceExceeded => "resource_exceeded",
            ErrorKind::SpawnFailure => "spawn_failure",
            ErrorKind::InternalError => "internal_error",
            ErrorKind::Overloaded => "overloaded",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutcomeError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Terminal value handed back to the caller for every execution.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClassifiedOutcome {
    pub output: String,
    pub error: Option<OutcomeError>,
    pub execution_time_ms: u64,
    /// Some of the process output went over the capture limit and is missing
    /// from `output` and the error message.
    pub output_truncated: bool,
}

impl ClassifiedOutcome {
    pub fn success(output: String, execution_time_ms: u64) -> Self {
        Self {
            output,
            error: None,
            execution_time_ms,
            output_truncated: false,
        }
    }

    pub fn failure(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            error: Some(OutcomeError {
                kind,
                message: message.into(),
            }),
            execution_time_ms: 0,
            output_truncated: false,
        }
    }

    pub fn with_output(self, output: String) -> Self {
        Self { output, ..self }
    }

    pub fn with_execution_time_ms(self, execution_time_ms: u64) -> Self {
        Self {
            execution_time_ms,
            ..self
        }
    }

    pub fn with_output_truncated(self, output_truncated: bool) -> Self {
        Self {
            output_truncated,
            ..self
        }
    }

    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(|e| e.kind)
    }
}
