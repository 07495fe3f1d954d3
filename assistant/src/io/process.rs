//! Helpers for running child processes with timeouts and bounded output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::Serialize;
use tracing::{debug, error, instrument, warn};
use wait_timeout::ChildExt;

/// What a finished (or killed) command produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionOutput {
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
}

impl ExecutionOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    pub fn truncated_notice(&self) -> String {
        let mut notice = String::new();
        if self.stdout_truncated > 0 {
            notice.push_str(&format!("[stdout truncated {} bytes]\n", self.stdout_truncated));
        }
        if self.stderr_truncated > 0 {
            notice.push_str(&format!("[stderr truncated {} bytes]\n", self.stderr_truncated));
        }
        notice
    }
}

/// Captured child process output plus whether the timeout fired.
#[derive(Debug)]
pub struct CommandOutput {
    pub status: ExitStatus,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub stdout_truncated: usize,
    pub stderr_truncated: usize,
    pub timed_out: bool,
}

impl CommandOutput {
    pub fn into_execution_output(self) -> ExecutionOutput {
        ExecutionOutput {
            exit_code: self.status.code(),
            stdout: String::from_utf8_lossy(&self.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&self.stderr).into_owned(),
            stdout_truncated: self.stdout_truncated,
            stderr_truncated: self.stderr_truncated,
        }
    }
}

/// Limits applied to one child process.
#[derive(Debug, Clone, Copy)]
pub struct ProcessLimits {
    pub timeout: Duration,
    /// Time between SIGTERM and SIGKILL once `timeout` has passed.
    pub kill_grace: Duration,
    pub output_limit_bytes: usize,
}

/// Run a command with a timeout and capture stdout/stderr without risking pipe deadlocks.
///
/// The child gets its own process group so that a timeout terminates everything
/// it spawned. Output is read concurrently while the child runs; bytes beyond
/// `output_limit_bytes` are counted and discarded while still draining the pipe.
///
/// `timeout` bounds the whole run, not just the leader: if the leader exits but
/// descendants still hold the output pipes at the deadline, the group is
/// terminated and the run counts as timed out.
#[instrument(skip_all, fields(timeout_ms = limits.timeout.as_millis() as u64, output_limit_bytes = limits.output_limit_bytes))]
pub fn run_command_with_timeout(mut cmd: Command, limits: ProcessLimits) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        cmd.process_group(0);
    }

    debug!("spawning child process");
    let deadline = Instant::now() + limits.timeout;
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, "failed to spawn command");
            return Err(e).context("spawn command");
        }
    };

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| anyhow!("stdout was not piped"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| anyhow!("stderr was not piped"))?;

    let limit = limits.output_limit_bytes;
    let stdout_rx = spawn_reader(stdout, limit);
    let stderr_rx = spawn_reader(stderr, limit);

    let mut timed_out = false;
    let status = match child.wait_timeout(limits.timeout).context("wait for command")? {
        Some(status) => status,
        None => {
            warn!(
                timeout_ms = limits.timeout.as_millis() as u64,
                "command timed out, terminating"
            );
            timed_out = true;
            terminate(&mut child, limits.kill_grace)?
        }
    };

    let (mut stdout, mut stderr) = (None, None);
    if !timed_out {
        stdout = recv_until(&stdout_rx, deadline);
        stderr = recv_until(&stderr_rx, deadline);
        if stdout.is_none() || stderr.is_none() {
            warn!(
                timeout_ms = limits.timeout.as_millis() as u64,
                "descendants still hold the output open, terminating"
            );
            timed_out = true;
            #[cfg(unix)]
            signal_group(child.id(), libc::SIGTERM);
            let grace_deadline = Instant::now() + limits.kill_grace;
            stdout = stdout.or_else(|| recv_until(&stdout_rx, grace_deadline));
            stderr = stderr.or_else(|| recv_until(&stderr_rx, grace_deadline));
            #[cfg(unix)]
            signal_group(child.id(), libc::SIGKILL);
        }
    }

    let (stdout, stdout_truncated) = finish_output(stdout, &stdout_rx).context("join stdout")?;
    let (stderr, stderr_truncated) = finish_output(stderr, &stderr_rx).context("join stderr")?;

    if stdout_truncated > 0 || stderr_truncated > 0 {
        warn!(stdout_truncated, stderr_truncated, "output truncated");
    }

    debug!(exit_code = ?status.code(), timed_out, "command finished");
    Ok(CommandOutput {
        status,
        stdout,
        stderr,
        stdout_truncated,
        stderr_truncated,
        timed_out,
    })
}

type StreamResult = Result<(Vec<u8>, usize)>;

fn spawn_reader<R: Read + Send + 'static>(reader: R, limit: usize) -> Receiver<StreamResult> {
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        // The receiver is gone only if the caller already bailed out.
        let _ = tx.send(read_stream_limited(reader, limit));
    });
    rx
}

/// `None` while the stream is still open at `deadline`.
fn recv_until(rx: &Receiver<StreamResult>, deadline: Instant) -> Option<StreamResult> {
    match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
        Ok(result) => Some(result),
        Err(RecvTimeoutError::Timeout) => None,
        Err(RecvTimeoutError::Disconnected) => Some(Err(anyhow!("output reader thread panicked"))),
    }
}

fn finish_output(received: Option<StreamResult>, rx: &Receiver<StreamResult>) -> StreamResult {
    match received {
        Some(result) => result,
        None => rx
            .recv()
            .map_err(|_| anyhow!("output reader thread panicked"))?,
    }
}

/// SIGTERM the process group, give it `grace`, then SIGKILL whatever is left.
#[cfg(unix)]
fn terminate(child: &mut Child, grace: Duration) -> Result<ExitStatus> {
    signal_group(child.id(), libc::SIGTERM);
    let exited = child
        .wait_timeout(grace)
        .context("wait for command after SIGTERM")?;
    // Sweep the group even if the leader exited: grandchildren may still hold the pipes.
    signal_group(child.id(), libc::SIGKILL);
    match exited {
        Some(status) => Ok(status),
        None => {
            warn!(grace_ms = grace.as_millis() as u64, "command ignored SIGTERM, killed");
            child.wait().context("wait for command after kill")
        }
    }
}

#[cfg(not(unix))]
fn terminate(child: &mut Child, _grace: Duration) -> Result<ExitStatus> {
    child.kill().context("kill command")?;
    child.wait().context("wait for command after kill")
}

#[cfg(unix)]
#[allow(unsafe_code)]
fn signal_group(pid: u32, signal: libc::c_int) {
    let Ok(pid) = libc::pid_t::try_from(pid) else {
        return;
    };
    // SAFETY: kill(2) takes plain integers and has no memory-safety
    // preconditions; a negative pid addresses the group created at spawn.
    let rc = unsafe { libc::kill(-pid, signal) };
    if rc != 0 {
        debug!(pid, signal, "process group already gone");
    }
}

fn read_stream_limited<R: Read>(mut reader: R, limit: usize) -> Result<(Vec<u8>, usize)> {
    let mut buf = Vec::new();
    let mut truncated = 0usize;
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).context("read output")?;
        if n == 0 {
            break;
        }
        let keep = n.min(limit.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..keep]);
        truncated += n - keep;
    }

    Ok((buf, truncated))
}
