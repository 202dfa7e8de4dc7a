use nix::sys::signal::Signal;

use crate::{
    constants::TIMEOUT_MSG,
    core::{
        domain::{ClassifiedOutcome, ErrorKind, ExecutionResult, ExitStatus},
        interpreter::Interpreter,
    },
};

/// Signals the kernel delivers when an rlimit or the OOM killer ends a process.
const RESOURCE_SIGNALS: [Signal; 3] = [Signal::SIGKILL, Signal::SIGXCPU, Signal::SIGXFSZ];

/// Maps raw process results onto `ErrorKind`. Rules are checked in order and
/// the first match wins.
#[derive(Clone, Debug)]
pub struct ResultClassifier {
    interpreter: Interpreter,
}

impl ResultClassifier {
    pub fn new(interpreter: Interpreter) -> Self {
        Self { interpreter }
    }

    pub fn classify(&self, result: ExecutionResult) -> ClassifiedOutcome {
        let output = String::from_utf8_lossy(&result.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&result.stderr);
        let stderr = stderr.trim();
        let execution_time_ms = result.elapsed.as_millis() as u64;
        let output_truncated = result.output_truncated;

        let outcome = match result.exit_status {
            ExitStatus::TimedOut => ClassifiedOutcome::failure(ErrorKind::Timeout, TIMEOUT_MSG),
            ExitStatus::SpawnFailed(cause) => {
                ClassifiedOutcome::failure(ErrorKind::SpawnFailure, cause)
            }
            ExitStatus::Killed(signal) => {
                let (kind, name) = match Signal::try_from(signal) {
                    Ok(sig) if RESOURCE_SIGNALS.contains(&sig) => {
                        (ErrorKind::ResourceExceeded, sig.as_str().to_string())
                    }
                    Ok(sig) => (ErrorKind::RuntimeError, sig.as_str().to_string()),
                    Err(_) => (ErrorKind::RuntimeError, format!("signal {}", signal)),
                };
                let mut message = format!("process was killed by {}", name);
                if !stderr.is_empty() {
                    message.push('\n');
                    message.push_str(stderr);
                }
                ClassifiedOutcome::failure(kind, message)
            }
            ExitStatus::NonZeroExit(code) => {
                let kind = if self.is_syntax_error(stderr) {
                    ErrorKind::SyntaxError
                } else if self.is_resource_error(stderr) {
                    ErrorKind::ResourceExceeded
                } else {
                    ErrorKind::RuntimeError
                };
                let message = if stderr.is_empty() {
                    format!("process exited with status {}", code)
                } else {
                    stderr.to_string()
                };
                ClassifiedOutcome::failure(kind, message)
            }
            ExitStatus::Success => ClassifiedOutcome::success(String::new(), 0),
        };

        outcome
            .with_output(output)
            .with_execution_time_ms(execution_time_ms)
            .with_output_truncated(output_truncated)
    }

    /// A compile-time syntax error ends with the marker line and carries no
    /// runtime traceback, which separates it from `eval("(")` style failures.
    fn is_syntax_error(&self, stderr: &str) -> bool {
        !stderr.contains(&self.interpreter.traceback_header)
            && last_line_starts_with(stderr, &self.interpreter.syntax_error_markers)
    }

    fn is_resource_error(&self, stderr: &str) -> bool {
        last_line_starts_with(stderr, &self.interpreter.resource_error_markers)
    }
}

fn last_line_starts_with(stderr: &str, markers: &[String]) -> bool {
    let Some(line) = stderr.lines().rev().find(|l| !l.trim().is_empty()) else {
        return false;
    };
    let line = line.trim_start();

    markers.iter().any(|marker| {
        line.strip_prefix(marker.as_str())
            .is_some_and(|rest| rest.is_empty() || rest.starts_with(':'))
    })
}
