use std::time::Duration;

pub const NO_INPUT_MSG: &str = "No code provided";
pub const NUL_BYTE_MSG: &str = "source code cannot contain null bytes";
pub const TIMEOUT_MSG: &str = "execution exceeded the time limit";
pub const OVERLOADED_MSG: &str = "too many concurrent executions, try again later";

/// How long the output collector keeps draining after the process is gone.
/// Only matters when an escaped descendant still holds the pipes open.
pub const DRAIN_GRACE: Duration = Duration::from_millis(200);

/// How long a reaper asked to stop gets to clean up before it is killed.
pub const STOP_GRACE: Duration = Duration::from_millis(500);

pub const DEFAULT_TIME_LIMIT_MS: u64 = 5_000;
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 512 * 1024 * 1024;
pub const DEFAULT_MAX_CONCURRENT_EXECUTIONS: usize = 4;
pub const DEFAULT_MAX_QUEUED_EXECUTIONS: usize = 16;
pub const DEFAULT_QUEUE_TIMEOUT_MS: u64 = 10_000;
pub const DEFAULT_OUTPUT_LIMIT_BYTES: usize = 1024 * 1024;
