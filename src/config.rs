use std::{net::SocketAddr, path::PathBuf, time::Duration};

use clap::Parser;

use crate::{
    constants::{
        DEFAULT_MAX_CONCURRENT_EXECUTIONS, DEFAULT_MAX_QUEUED_EXECUTIONS,
        DEFAULT_MEMORY_LIMIT_BYTES, DEFAULT_OUTPUT_LIMIT_BYTES, DEFAULT_QUEUE_TIMEOUT_MS,
        DEFAULT_TIME_LIMIT_MS,
    },
    core::{domain::ExecutionLimits, interpreter::Interpreter, service::ServiceConfig},
    native::runner::{Credentials, NativeRunnerConfig},
};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("--run-as-uid and --run-as-gid must be given together")]
    PartialCredentials,
}

/// Runs untrusted snippets in isolated interpreter processes over HTTP.
#[derive(Debug, Clone, Parser)]
#[command(version, about)]
pub struct Config {
    /// Address the HTTP server binds to
    #[arg(long, env = "SNIPPET_RUNNER_ADDR", default_value = "127.0.0.1:5000")]
    pub listen_addr: SocketAddr,

    /// Interpreter binary that receives the snippet as `-c <source>`
    #[arg(long, env = "SNIPPET_RUNNER_INTERPRETER", default_value = "python3")]
    pub interpreter: PathBuf,

    /// Wall-clock limit per execution, in milliseconds
    #[arg(long, env = "SNIPPET_RUNNER_TIME_LIMIT_MS", default_value_t = DEFAULT_TIME_LIMIT_MS)]
    pub time_limit_ms: u64,

    /// Address-space limit per execution, in bytes (0 disables it)
    #[arg(long, env = "SNIPPET_RUNNER_MEMORY_LIMIT_BYTES", default_value_t = DEFAULT_MEMORY_LIMIT_BYTES)]
    pub memory_limit_bytes: u64,

    #[arg(long, env = "SNIPPET_RUNNER_MAX_CONCURRENT", default_value_t = DEFAULT_MAX_CONCURRENT_EXECUTIONS)]
    pub max_concurrent_executions: usize,

    /// Requests allowed to wait for a free slot before new ones are rejected
    #[arg(long, env = "SNIPPET_RUNNER_MAX_QUEUED", default_value_t = DEFAULT_MAX_QUEUED_EXECUTIONS)]
    pub max_queued_executions: usize,

    /// How long a queued request waits for a slot, in milliseconds
    #[arg(long, env = "SNIPPET_RUNNER_QUEUE_TIMEOUT_MS", default_value_t = DEFAULT_QUEUE_TIMEOUT_MS)]
    pub queue_timeout_ms: u64,

    /// Bytes captured per output stream; the rest is discarded
    #[arg(long, env = "SNIPPET_RUNNER_OUTPUT_LIMIT_BYTES", default_value_t = DEFAULT_OUTPUT_LIMIT_BYTES)]
    pub output_limit_bytes: usize,

    /// RLIMIT_NPROC for the interpreter; counts every process of its uid
    #[arg(long, env = "SNIPPET_RUNNER_MAX_PROCESSES")]
    pub max_processes: Option<u64>,

    #[arg(long, env = "SNIPPET_RUNNER_UID", requires = "run_as_gid")]
    pub run_as_uid: Option<u32>,

    #[arg(long, env = "SNIPPET_RUNNER_GID", requires = "run_as_uid")]
    pub run_as_gid: Option<u32>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let positive = [
            ("time_limit_ms", self.time_limit_ms as usize),
            ("max_concurrent_executions", self.max_concurrent_executions),
            ("output_limit_bytes", self.output_limit_bytes),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Zero { name: *name });
        }
        if self.run_as_uid.is_some() != self.run_as_gid.is_some() {
            return Err(ConfigError::PartialCredentials);
        }
        Ok(())
    }

    pub fn interpreter(&self) -> Interpreter {
        Interpreter::python3(&self.interpreter)
    }

    pub fn service_config(&self) -> ServiceConfig {
        ServiceConfig {
            limits: ExecutionLimits {
                time_limit: Duration::from_millis(self.time_limit_ms),
                memory_limit_bytes: (self.memory_limit_bytes > 0).then_some(self.memory_limit_bytes),
            },
            max_concurrent_executions: self.max_concurrent_executions,
            max_queued_executions: self.max_queued_executions,
            queue_timeout: Duration::from_millis(self.queue_timeout_ms),
        }
    }

    pub fn runner_config(&self) -> NativeRunnerConfig {
        let credentials = match (self.run_as_uid, self.run_as_gid) {
            (Some(uid), Some(gid)) => Some(Credentials { uid, gid }),
            _ => None,
        };

        NativeRunnerConfig {
            interpreter: self.interpreter(),
            output_limit_bytes: self.output_limit_bytes,
            max_processes: self.max_processes,
            credentials,
        }
    }
}
