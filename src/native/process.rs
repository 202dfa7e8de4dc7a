use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};

use nix::{
    errno::Errno,
    libc,
    sys::{
        resource::{Resource, getrlimit, setrlimit},
        signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, kill, killpg, sigaction},
        wait::{WaitStatus, waitpid},
    },
    unistd::{ForkResult, Pid, fork, getpid},
};

/// Kernel-enforced ceilings applied to the child between fork and exec.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ResourceLimits {
    pub address_space_bytes: Option<u64>,
    pub cpu_seconds: Option<u64>,
    pub max_processes: Option<u64>,
}

/// Runs in the forked child before exec, so it must stay async-signal-safe:
/// plain syscalls only, no allocation, no locks.
pub fn apply_resource_limits(limits: &ResourceLimits) -> std::io::Result<()> {
    #[cfg(target_os = "linux")]
    nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)?;

    setrlimit(Resource::RLIMIT_CORE, 0, 0)?;

    if let Some(bytes) = limits.address_space_bytes {
        setrlimit(Resource::RLIMIT_AS, bytes, bytes)?;
    }
    if let Some(seconds) = limits.cpu_seconds {
        // SIGXCPU at the soft limit, SIGKILL one second later
        setrlimit(Resource::RLIMIT_CPU, seconds, seconds + 1)?;
    }
    if let Some(count) = limits.max_processes {
        setrlimit(Resource::RLIMIT_NPROC, count, count)?;
    }

    Ok(())
}

static STOP_REQUESTED: AtomicBool = AtomicBool::new(false);
static INTERPRETER_PID: AtomicI32 = AtomicI32::new(0);

extern "C" fn request_stop(_: libc::c_int) {
    STOP_REQUESTED.store(true, Ordering::SeqCst);
    let pid = INTERPRETER_PID.load(Ordering::SeqCst);
    if pid > 0 {
        // SAFETY: kill is async-signal-safe.
        unsafe { libc::kill(pid, libc::SIGKILL) };
    }
}

/// Splits the pre-exec child in two. The forked half returns and goes on to
/// exec the interpreter. The half the caller spawned stays behind as a reaper:
/// it is a child subreaper, so every descendant that loses its parent, even
/// one that left the process group with `setsid`, is reparented to it. Once
/// the interpreter exits, or SIGTERM asks it to stop, the reaper kills and
/// reaps everything left and exits with the interpreter's own status.
///
/// Must be called last in the pre-exec hook, after the rlimits, so both
/// halves inherit them. Never returns in the reaper.
#[cfg(target_os = "linux")]
pub fn fork_reaper() -> std::io::Result<()> {
    nix::sys::prctl::set_child_subreaper(true)?;

    let stop = SigAction::new(
        SigHandler::Handler(request_stop),
        SaFlags::empty(),
        SigSet::empty(),
    );
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: the handler only touches atomics and calls kill.
    unsafe {
        sigaction(Signal::SIGTERM, &stop)?;
        sigaction(Signal::SIGCHLD, &default)?;
    }

    // SAFETY: the reaper half only issues raw syscalls until it exits.
    match unsafe { fork() }? {
        ForkResult::Child => {
            // SAFETY: restores the default disposition inherited from the reaper.
            unsafe { sigaction(Signal::SIGTERM, &default)? };
            nix::sys::prctl::set_pdeathsig(Signal::SIGKILL)?;
            Ok(())
        }
        ForkResult::Parent { child } => run_reaper(child),
    }
}

#[cfg(target_os = "linux")]
fn run_reaper(interpreter: Pid) -> ! {
    // The exec status pipe of the spawning process is among these; it has to
    // close here or the spawn would wait for the reaper instead of the exec.
    close_all_fds();

    INTERPRETER_PID.store(interpreter.as_raw(), Ordering::SeqCst);
    // a SIGTERM that arrived before the pid was stored
    if STOP_REQUESTED.load(Ordering::SeqCst) {
        let _ = kill(interpreter, Signal::SIGKILL);
    }

    let mut status = None;
    while status.is_none() {
        match waitpid(None, None) {
            Ok(WaitStatus::Exited(pid, code)) if pid == interpreter => status = Some(Ok(code)),
            Ok(WaitStatus::Signaled(pid, signal, _)) if pid == interpreter => {
                status = Some(Err(signal))
            }
            Ok(_) | Err(Errno::EINTR) => {}
            Err(_) => break,
        }
    }

    loop {
        if !kill_children() {
            break;
        }
        match waitpid(None, None) {
            Ok(_) | Err(Errno::EINTR) => {}
            Err(_) => break,
        }
    }

    match status {
        Some(Ok(code)) => exit_now(code),
        Some(Err(signal)) => {
            let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
            // SAFETY: resets the disposition so the re-raised signal terminates us.
            let _ = unsafe { sigaction(signal, &default) };
            let _ = kill(getpid(), signal);
            exit_now(128 + signal as i32)
        }
        None => exit_now(1),
    }
}

/// SIGKILLs every pid listed in `/proc/thread-self/children`. Returns false
/// when the list cannot be read, in which case nothing is waited for.
#[cfg(target_os = "linux")]
fn kill_children() -> bool {
    // SAFETY: a NUL-terminated literal path and a stack buffer.
    let fd = unsafe {
        libc::open(
            c"/proc/thread-self/children".as_ptr(),
            libc::O_RDONLY | libc::O_CLOEXEC,
        )
    };
    if fd < 0 {
        return false;
    }

    let mut buf = [0u8; 512];
    let mut pid: i32 = 0;
    loop {
        // SAFETY: reads at most buf.len() bytes into buf.
        let n = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if n <= 0 {
            break;
        }
        for &byte in &buf[..n as usize] {
            if byte.is_ascii_digit() {
                pid = pid.saturating_mul(10).saturating_add(i32::from(byte - b'0'));
            } else if pid > 0 {
                let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
                pid = 0;
            }
        }
    }
    if pid > 0 {
        let _ = kill(Pid::from_raw(pid), Signal::SIGKILL);
    }

    // SAFETY: fd was opened above and is not used afterwards.
    unsafe { libc::close(fd) };
    true
}

#[cfg(target_os = "linux")]
fn close_all_fds() {
    // SAFETY: close_range only closes descriptors of this process.
    let closed = unsafe { libc::syscall(libc::SYS_close_range, 0u32, u32::MAX, 0u32) } == 0;
    if closed {
        return;
    }

    let max = getrlimit(Resource::RLIMIT_NOFILE)
        .map(|(soft, _)| soft)
        .unwrap_or(1024)
        .min(i32::MAX as u64) as i32;
    for fd in 0..max {
        // SAFETY: closing a descriptor that may not exist is harmless.
        unsafe { libc::close(fd) };
    }
}

#[cfg(target_os = "linux")]
fn exit_now(code: i32) -> ! {
    // SAFETY: skips atexit handlers that belong to the parent's runtime.
    unsafe { libc::_exit(code) }
}

/// Asks the reaper led by `pid` to kill the interpreter and everything it
/// started. No-op if the process is already gone.
pub fn stop_reaper(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    match kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => tracing::debug!(pid, "reaper asked to stop"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pid, error = %e, "failed to signal reaper"),
    }
}

/// Kill the whole process group led by `pid` via `killpg(SIGKILL)`.
///
/// The child must have been spawned with `process_group(0)` so its PGID equals
/// its PID. No-op if the group no longer exists or the PID does not fit `i32`.
pub fn kill_process_group(pid: u32) {
    let Ok(pid) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(pid), Signal::SIGKILL) {
        Ok(()) => tracing::debug!(pgid = pid, "process group killed"),
        Err(Errno::ESRCH) => {}
        Err(e) => tracing::warn!(pgid = pid, error = %e, "failed to kill process group"),
    }
}
