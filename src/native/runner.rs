use std::{
    os::unix::{ffi::OsStrExt, process::ExitStatusExt},
    path::Path,
    process::Stdio,
    sync::Arc,
    time::Duration,
};

use tokio::{
    process::{Child, Command},
    sync::oneshot,
    time::Instant,
};

#[cfg(target_os = "linux")]
use crate::native::process::fork_reaper;
use crate::{
    constants::{DRAIN_GRACE, STOP_GRACE},
    core::{
        domain::{ExecutionRequest, ExecutionResult, ExitStatus},
        interpreter::Interpreter,
        traits::runner::{ProcessRunner, RunError},
    },
    native::{
        collector::OutputCollector,
        process::{ResourceLimits, apply_resource_limits, kill_process_group, stop_reaper},
        registry::ProcessRegistry,
    },
};

/// Credentials the interpreter is switched to before exec.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

#[derive(Clone, Debug)]
pub struct NativeRunnerConfig {
    pub interpreter: Interpreter,
    pub output_limit_bytes: usize,
    pub max_processes: Option<u64>,
    pub credentials: Option<Credentials>,
}

/// Runs each snippet in a fresh interpreter process on the host, confined by
/// rlimits, its own process group and a throwaway working directory.
#[derive(Debug)]
pub struct NativeRunner {
    config: NativeRunnerConfig,
    registry: Arc<ProcessRegistry>,
}

enum Termination {
    Exited(std::process::ExitStatus),
    TimedOut,
}

impl NativeRunner {
    pub fn new(config: NativeRunnerConfig, registry: Arc<ProcessRegistry>) -> Self {
        Self { config, registry }
    }

    fn command(&self, request: &ExecutionRequest, workdir: &Path) -> Command {
        let interpreter = &self.config.interpreter;
        let mut cmd = Command::new(&interpreter.program);
        cmd.arg(&interpreter.source_flag)
            .arg(std::ffi::OsStr::from_bytes(&request.source))
            .current_dir(workdir)
            .env_clear()
            .env("PATH", "/usr/local/bin:/usr/bin:/bin")
            .env("HOME", workdir)
            .envs(interpreter.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);

        if let Some(credentials) = self.config.credentials {
            cmd.uid(credentials.uid).gid(credentials.gid);
        }

        let limits = ResourceLimits {
            address_space_bytes: request.memory_limit_bytes,
            cpu_seconds: Some(cpu_seconds(request.time_limit)),
            max_processes: self.config.max_processes,
        };
        // SAFETY: the hook only issues raw syscalls on a Copy value.
        unsafe {
            cmd.pre_exec(move || {
                apply_resource_limits(&limits)?;
                #[cfg(target_os = "linux")]
                fork_reaper()?;
                Ok(())
            });
        }

        cmd
    }

    fn prepare_workdir(&self) -> std::io::Result<tempfile::TempDir> {
        let workdir = tempfile::Builder::new().prefix("snippet-").tempdir()?;
        if let Some(credentials) = self.config.credentials {
            nix::unistd::chown(
                workdir.path(),
                Some(nix::unistd::Uid::from_raw(credentials.uid)),
                Some(nix::unistd::Gid::from_raw(credentials.gid)),
            )?;
        }
        Ok(workdir)
    }
}

#[async_trait::async_trait]
impl ProcessRunner for NativeRunner {
    #[tracing::instrument(skip_all, fields(execution_id = %request.id))]
    async fn run(&self, request: ExecutionRequest) -> Result<ExecutionResult, RunError> {
        let started = Instant::now();

        let workdir = match self.prepare_workdir() {
            Ok(dir) => dir,
            Err(e) => {
                tracing::error!(error = %e, "failed to prepare working directory");
                return Ok(ExecutionResult::spawn_failed(
                    format!("failed to prepare working directory: {}", e),
                    started.elapsed(),
                ));
            }
        };

        let mut child = match self.command(&request, workdir.path()).spawn() {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    program = %self.config.interpreter.program.display(),
                    error = %e,
                    "failed to spawn interpreter"
                );
                return Ok(ExecutionResult::spawn_failed(
                    format!(
                        "failed to spawn {}: {}",
                        self.config.interpreter.program.display(),
                        e
                    ),
                    started.elapsed(),
                ));
            }
        };

        let Some(pid) = child.id() else {
            let _ = child.wait().await;
            return Err(RunError::Internal {
                msg: "child exited before its pid was read".to_string(),
            });
        };
        let _registration = self.registry.register(request.id, pid);
        tracing::debug!(pid, time_limit = ?request.time_limit, "interpreter spawned");

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            reap(&mut child, pid).await;
            return Err(RunError::Internal {
                msg: "child stdio was not captured".to_string(),
            });
        };

        let collector =
            OutputCollector::new(stdout, stderr, self.config.output_limit_bytes, DRAIN_GRACE);
        let (exited_tx, exited_rx) = oneshot::channel();

        let (termination, captured) = tokio::join!(
            async {
                let termination = supervise(&mut child, pid, request.time_limit).await;
                let _ = exited_tx.send(());
                termination
            },
            collector.collect(exited_rx),
        );
        let elapsed = started.elapsed();

        let exit_status = match termination? {
            Termination::TimedOut => ExitStatus::TimedOut,
            Termination::Exited(status) => match (status.code(), status.signal()) {
                (Some(0), _) => ExitStatus::Success,
                (Some(code), _) => ExitStatus::NonZeroExit(code),
                (None, Some(signal)) => ExitStatus::Killed(signal),
                (None, None) => ExitStatus::NonZeroExit(-1),
            },
        };

        tracing::info!(
            pid,
            ?exit_status,
            elapsed_ms = elapsed.as_millis() as u64,
            stdout_len = captured.stdout.len(),
            stderr_len = captured.stderr.len(),
            truncated = captured.truncated,
            "interpreter finished"
        );

        Ok(ExecutionResult {
            stdout: captured.stdout,
            stderr: captured.stderr,
            exit_status,
            elapsed,
            output_truncated: captured.truncated,
        })
    }
}

/// Waits for the child until the deadline. On every path the child is
/// reaped and its process group killed before this returns. The child is the
/// reaper forked in the pre-exec hook, so by the time it has exited every
/// descendant of the interpreter is gone too.
async fn supervise(
    child: &mut Child,
    pid: u32,
    time_limit: Duration,
) -> Result<Termination, RunError> {
    match tokio::time::timeout(time_limit, child.wait()).await {
        Ok(Ok(status)) => {
            // leftovers such as backgrounded grandchildren
            kill_process_group(pid);
            Ok(Termination::Exited(status))
        }
        Ok(Err(e)) => {
            reap(child, pid).await;
            Err(RunError::Internal {
                msg: format!("failed to wait for interpreter: {}", e),
            })
        }
        Err(_) => {
            tracing::info!(pid, ?time_limit, "deadline reached, stopping interpreter");
            stop_reaper(pid);
            match tokio::time::timeout(STOP_GRACE, child.wait()).await {
                Ok(Ok(_)) => kill_process_group(pid),
                Ok(Err(e)) => {
                    tracing::warn!(pid, error = %e, "failed to wait for stopped reaper");
                    reap(child, pid).await;
                }
                Err(_) => {
                    tracing::warn!(pid, grace = ?STOP_GRACE, "reaper did not stop in time");
                    reap(child, pid).await;
                }
            }
            Ok(Termination::TimedOut)
        }
    }
}

async fn reap(child: &mut Child, pid: u32) {
    kill_process_group(pid);
    if let Err(e) = child.kill().await {
        tracing::warn!(pid, error = %e, "failed to kill and reap interpreter");
    }
}

/// CPU budget for the rlimit: the wall-clock limit rounded up plus one
/// second, so the wall-clock deadline normally fires first.
fn cpu_seconds(time_limit: Duration) -> u64 {
    let secs = time_limit.as_secs() + u64::from(time_limit.subsec_nanos() > 0);
    secs.max(1) + 1
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::future::join_all;
    use itertools::Itertools;
    use nix::{sys::signal::kill, unistd::Pid};

    use super::*;
    use crate::core::domain::ExecutionLimits;

    fn python_path() -> String {
        std::env::var("PYTHON_PATH").unwrap_or_else(|_| "python3".to_string())
    }

    fn runner_with(registry: Arc<ProcessRegistry>, program: &str) -> NativeRunner {
        NativeRunner::new(
            NativeRunnerConfig {
                interpreter: Interpreter::python3(program),
                output_limit_bytes: 1024 * 1024,
                max_processes: None,
                credentials: None,
            },
            registry,
        )
    }

    fn runner() -> NativeRunner {
        runner_with(Arc::new(ProcessRegistry::new()), &python_path())
    }

    fn request(source: &str, time_limit_ms: u64) -> ExecutionRequest {
        ExecutionRequest::new(
            source,
            &ExecutionLimits {
                time_limit: Duration::from_millis(time_limit_ms),
                memory_limit_bytes: None,
            },
        )
    }

    fn pid_is_alive(pid: u32) -> bool {
        kill(Pid::from_raw(pid as i32), None).is_ok()
    }

    fn process_with_arg_exists(arg: &str) -> bool {
        std::fs::read_dir("/proc")
            .unwrap()
            .filter_map(Result::ok)
            .any(|entry| {
                std::fs::read(entry.path().join("cmdline"))
                    .map(|cmdline| cmdline.split(|b| *b == 0).any(|a| a == arg.as_bytes()))
                    .unwrap_or(false)
            })
    }

    /// A `sleep` with a unique duration, started in its own session so that
    /// it leaves the interpreter's process group.
    fn detached_sleep_source(marker: &str) -> String {
        format!(
            "import subprocess\n\
             subprocess.Popen(['sleep', '{}'], start_new_session=True,\n\
             stdout=subprocess.DEVNULL, stderr=subprocess.DEVNULL)\n\
             print('spawned', flush=True)\n",
            marker
        )
    }

    fn unique_marker() -> String {
        format!("37.{}", uuid::Uuid::new_v4().as_u128() % 1_000_000_007)
    }

    #[tokio::test]
    async fn test_hello_world() {
        let result = runner()
            .run(request("print('Hello, World!')", 5000))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"Hello, World!\n");
        assert!(result.stderr.is_empty());
        assert!(!result.output_truncated);
    }

    #[tokio::test]
    async fn test_source_is_not_shell_interpreted() {
        let result = runner()
            .run(request("import sys; print(sys.argv[0]); print('$(echo injected)')", 5000))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"-c\n$(echo injected)\n");
    }

    #[tokio::test]
    async fn test_syntax_error_exit() {
        let result = runner()
            .run(request("print('Hello, World!'", 5000))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::NonZeroExit(1));
        assert!(result.stdout.is_empty());
        assert!(String::from_utf8_lossy(&result.stderr).contains("SyntaxError"));
    }

    #[tokio::test]
    async fn test_timeout_kills_and_reaps_process() {
        let registry = Arc::new(ProcessRegistry::new());
        let runner = runner_with(registry.clone(), &python_path());
        let req = request("print('started', flush=True)\nwhile True: pass", 1000);
        let id = req.id;

        let run = tokio::spawn(async move { runner.run(req).await });

        let pid = loop {
            if let Some(process) = registry.get(&id) {
                break process.pid;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };

        let started = std::time::Instant::now();
        let result = run.await.unwrap().unwrap();

        assert!(started.elapsed() < Duration::from_secs(3));
        assert_eq!(result.exit_status, ExitStatus::TimedOut);
        assert_eq!(result.stdout, b"started\n");
        assert!(registry.is_empty());
        assert!(!pid_is_alive(pid));
    }

    #[tokio::test]
    async fn test_background_grandchild_does_not_hold_request() {
        let source = "import subprocess; subprocess.Popen(['sleep', '30']); print('parent done')";
        let started = std::time::Instant::now();

        let result = runner().run(request(source, 5000)).await.unwrap();

        assert!(started.elapsed() < Duration::from_secs(5));
        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"parent done\n");
    }

    #[tokio::test]
    async fn test_detached_descendant_is_killed_after_exit() {
        let marker = unique_marker();

        let result = runner()
            .run(request(&detached_sleep_source(&marker), 5000))
            .await
            .unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"spawned\n");
        assert!(!process_with_arg_exists(&marker));
    }

    #[tokio::test]
    async fn test_detached_descendant_is_killed_on_timeout() {
        let marker = unique_marker();
        let source = format!("{}while True: pass\n", detached_sleep_source(&marker));
        let runner = runner();

        let run = tokio::spawn(async move { runner.run(request(&source, 1500)).await });

        let mut seen = false;
        for _ in 0..100 {
            if process_with_arg_exists(&marker) {
                seen = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let result = run.await.unwrap().unwrap();

        assert!(seen);
        assert_eq!(result.exit_status, ExitStatus::TimedOut);
        assert_eq!(result.stdout, b"spawned\n");
        assert!(!process_with_arg_exists(&marker));
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_spawn_failure() {
        let registry = Arc::new(ProcessRegistry::new());
        let runner = runner_with(registry.clone(), "/nonexistent/python3");

        let result = runner.run(request("print(1)", 1000)).await.unwrap();

        assert!(matches!(result.exit_status, ExitStatus::SpawnFailed(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_nul_byte_in_source_is_spawn_failure() {
        let result = runner().run(request("print(1)\0", 1000)).await.unwrap();

        assert!(matches!(result.exit_status, ExitStatus::SpawnFailed(_)));
    }

    #[tokio::test]
    async fn test_large_stderr_does_not_deadlock() {
        let source = "import sys; sys.stderr.write('e' * (1 << 20)); print('ok')";

        let result = runner().run(request(source, 5000)).await.unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"ok\n");
        assert_eq!(result.stderr.len(), 1 << 20);
    }

    #[tokio::test]
    async fn test_output_limit_truncates() {
        let runner = NativeRunner::new(
            NativeRunnerConfig {
                interpreter: Interpreter::python3(python_path()),
                output_limit_bytes: 16,
                max_processes: None,
                credentials: None,
            },
            Arc::new(ProcessRegistry::new()),
        );

        let result = runner.run(request("print('x' * 100000)", 5000)).await.unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout.len(), 16);
        assert!(result.output_truncated);
    }

    #[tokio::test]
    async fn test_memory_limit() {
        let req = ExecutionRequest::new(
            "x = bytearray(1 << 31)\nprint(len(x))",
            &ExecutionLimits {
                time_limit: Duration::from_secs(5),
                memory_limit_bytes: Some(256 * 1024 * 1024),
            },
        );

        let result = runner().run(req).await.unwrap();

        assert!(matches!(
            result.exit_status,
            ExitStatus::NonZeroExit(_) | ExitStatus::Killed(_)
        ));
        assert!(result.stdout.is_empty());
    }

    #[tokio::test]
    async fn test_environment_is_cleared() {
        let source = "import os; print(sorted(k for k in os.environ if k.startswith('CARGO')))";

        let result = runner().run(request(source, 5000)).await.unwrap();

        assert_eq!(result.exit_status, ExitStatus::Success);
        assert_eq!(result.stdout, b"[]\n");
    }

    #[tokio::test]
    async fn test_concurrent_runs_are_isolated() {
        let runner = Arc::new(runner());

        let results = join_all((0..8).map(|i| {
            let runner = runner.clone();
            async move {
                let source = format!("import time; time.sleep(0.2); print('run-{}')", i);
                (i, runner.run(request(&source, 5000)).await.unwrap())
            }
        }))
        .await;

        for (i, result) in &results {
            assert_eq!(result.exit_status, ExitStatus::Success);
            assert_eq!(
                String::from_utf8_lossy(&result.stdout),
                format!("run-{}\n", i)
            );
        }
        assert!(results.iter().map(|(_, r)| r.stdout.clone()).all_unique());
    }

    #[test]
    fn test_cpu_seconds_rounds_up() {
        assert_eq!(cpu_seconds(Duration::from_millis(1000)), 2);
        assert_eq!(cpu_seconds(Duration::from_millis(1500)), 3);
        assert_eq!(cpu_seconds(Duration::from_millis(10)), 2);
    }
}
