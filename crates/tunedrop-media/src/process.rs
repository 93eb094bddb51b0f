//! Child process ownership, termination and stderr capture.
//!
//! # Design
//! - A `ProcessHandle` has exactly one owner and is never reused across requests.
//! - Termination is polite first: SIGTERM, a grace period, then SIGKILL.
//! - Every command sets `kill_on_drop` so a dropped handle cannot leak a process.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::fmt;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::io::AsyncReadExt;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, warn};
use tunedrop_config::ToolCommand;
use tunedrop_telemetry::Metrics;

use crate::error::{MediaError, MediaResult};

const STDERR_TAIL_LINES: usize = 20;
const STDERR_LINE_CHARS: usize = 512;
const STDERR_PENDING_BYTES: usize = 4 * STDERR_LINE_CHARS;
const STDERR_READ_CHUNK: usize = 4096;
const STDERR_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// What a child process is doing for the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessRole {
    /// The media retrieval tool.
    Retrieval,
    /// The audio encoder.
    Encoding,
}

impl ProcessRole {
    /// Label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Retrieval => "retrieval",
            Self::Encoding => "encoding",
        }
    }

    /// Name of the tool playing this role.
    #[must_use]
    pub const fn tool_name(self) -> &'static str {
        match self {
            Self::Retrieval => "yt-dlp",
            Self::Encoding => "ffmpeg",
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Observed lifecycle state of a child process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// Not yet reaped.
    Running,
    /// Exited on its own with the given code.
    Exited(i32),
    /// Ended by a signal.
    Killed,
}

impl ProcessState {
    fn from_status(status: ExitStatus) -> Self {
        status.code().map_or(Self::Killed, Self::Exited)
    }

    /// Whether the process has been reaped.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Sole owner of one spawned child process.
pub struct ProcessHandle {
    role: ProcessRole,
    pid: Option<u32>,
    child: Child,
    state: ProcessState,
    terminated: bool,
    kill_grace: Duration,
    metrics: Metrics,
}

impl fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("role", &self.role)
            .field("pid", &self.pid)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

impl ProcessHandle {
    /// Spawn `tool` with `args`, piping stdout and stderr.
    pub(crate) fn spawn(
        role: ProcessRole,
        tool: &ToolCommand,
        args: &[OsString],
        stdin: Stdio,
        kill_grace: Duration,
        metrics: &Metrics,
    ) -> MediaResult<Self> {
        let mut command = Command::new(&tool.program);
        command
            .args(&tool.prefix_args)
            .args(args)
            .stdin(stdin)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        let child = command.spawn().map_err(|source| MediaError::ProcessSpawn {
            role,
            program: tool.program.clone(),
            source,
        })?;
        let pid = child.id();
        debug!(role = role.as_str(), pid, program = %tool.program.display(), "spawned child process");
        Ok(Self {
            role,
            pid,
            child,
            state: ProcessState::Running,
            terminated: false,
            kill_grace,
            metrics: metrics.clone(),
        })
    }

    /// Role of this process.
    #[must_use]
    pub const fn role(&self) -> ProcessRole {
        self.role
    }

    /// OS process id captured at spawn time.
    #[must_use]
    pub const fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Last observed state, without polling the OS.
    #[must_use]
    pub const fn state(&self) -> ProcessState {
        self.state
    }

    /// Whether the service, rather than the process itself, ended it.
    #[must_use]
    pub const fn was_terminated(&self) -> bool {
        self.terminated
    }

    pub(crate) fn take_stdout(&mut self) -> MediaResult<ChildStdout> {
        self.child.stdout.take().ok_or_else(|| MediaError::Io {
            operation: "take_stdout",
            source: std::io::Error::other("child stdout already taken"),
        })
    }

    pub(crate) fn take_stderr(&mut self) -> Option<ChildStderr> {
        self.child.stderr.take()
    }

    /// Poll the OS for an exit without blocking.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Io`] when the status cannot be queried.
    pub fn refresh(&mut self) -> MediaResult<ProcessState> {
        if self.state == ProcessState::Running
            && let Some(status) = self.child.try_wait().map_err(|source| MediaError::Io {
                operation: "poll_child",
                source,
            })?
        {
            self.state = ProcessState::from_status(status);
        }
        Ok(self.state)
    }

    /// Wait for the process to exit.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Io`] when waiting fails.
    pub async fn wait(&mut self) -> MediaResult<ProcessState> {
        if self.state == ProcessState::Running {
            let status = self.child.wait().await.map_err(|source| MediaError::Io {
                operation: "wait_child",
                source,
            })?;
            self.state = ProcessState::from_status(status);
            debug!(role = self.role.as_str(), pid = self.pid, state = ?self.state, "child process exited");
        }
        Ok(self.state)
    }

    /// Wait at most `limit`; returns [`ProcessState::Running`] if it is still alive.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Io`] when waiting fails.
    pub async fn wait_for(&mut self, limit: Duration) -> MediaResult<ProcessState> {
        let waited = timeout(limit, self.wait()).await;
        match waited {
            Ok(result) => result,
            Err(_elapsed) => Ok(self.state),
        }
    }

    /// End the process if it is still running: SIGTERM, wait the grace period,
    /// then SIGKILL. Calling it on an exited process is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MediaError::Io`] when the process cannot be signalled or reaped.
    pub async fn terminate(&mut self) -> MediaResult<()> {
        if self.refresh()?.is_terminal() {
            return Ok(());
        }
        self.terminated = true;
        if self.send_sigterm() && self.wait_for(self.kill_grace).await?.is_terminal() {
            self.metrics
                .inc_process_termination(self.role.as_str(), "graceful");
            debug!(role = self.role.as_str(), pid = self.pid, "child process terminated");
            return Ok(());
        }
        self.child.kill().await.map_err(|source| MediaError::Io {
            operation: "kill_child",
            source,
        })?;
        self.state = ProcessState::Killed;
        self.metrics
            .inc_process_termination(self.role.as_str(), "forced");
        warn!(
            role = self.role.as_str(),
            pid = self.pid,
            grace_ms = u64::try_from(self.kill_grace.as_millis()).unwrap_or(u64::MAX),
            "child process ignored SIGTERM; killed"
        );
        Ok(())
    }

    #[cfg(unix)]
    fn send_sigterm(&self) -> bool {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let Some(pid) = self.pid.and_then(|pid| i32::try_from(pid).ok()) else {
            return false;
        };
        match kill(Pid::from_raw(pid), Signal::SIGTERM) {
            Ok(()) => true,
            Err(errno) => {
                debug!(role = self.role.as_str(), pid, %errno, "SIGTERM delivery failed");
                false
            }
        }
    }

    #[cfg(not(unix))]
    const fn send_sigterm(&self) -> bool {
        false
    }
}

/// Background drain of a child's stderr that keeps a bounded tail.
#[derive(Debug)]
pub(crate) struct StderrTail {
    task: Option<JoinHandle<String>>,
}

impl StderrTail {
    pub(crate) fn capture(role: ProcessRole, stderr: Option<ChildStderr>) -> Self {
        Self {
            task: stderr.map(|stderr| tokio::spawn(drain_stderr(role, stderr))),
        }
    }

    /// Collect the tail once the pipe closes; gives up after a short wait so a
    /// grandchild holding the pipe open cannot stall error reporting.
    pub(crate) async fn collect(&mut self) -> String {
        let Some(task) = self.task.take() else {
            return String::new();
        };
        let abort = task.abort_handle();
        match timeout(STDERR_DRAIN_TIMEOUT, task).await {
            Ok(Ok(tail)) => tail,
            Ok(Err(_join)) => String::new(),
            Err(_elapsed) => {
                abort.abort();
                String::new()
            }
        }
    }

    pub(crate) fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for StderrTail {
    fn drop(&mut self) {
        self.abort();
    }
}

async fn drain_stderr(role: ProcessRole, mut stderr: ChildStderr) -> String {
    let mut tail = LineTail::new(role);
    let mut chunk = vec![0_u8; STDERR_READ_CHUNK];
    loop {
        match stderr.read(&mut chunk).await {
            Ok(0) => break,
            Ok(read) => tail.push(&chunk[..read]),
            Err(err) => {
                debug!(role = role.as_str(), error = %err, "child stderr read failed");
                break;
            }
        }
    }
    tail.finish()
}

/// Bounded tail of stderr lines. Both `\n` and `\r` end a line so progress
/// redraws do not merge with the message that follows them.
struct LineTail {
    role: ProcessRole,
    lines: VecDeque<String>,
    pending: Vec<u8>,
}

impl LineTail {
    fn new(role: ProcessRole) -> Self {
        Self {
            role,
            lines: VecDeque::with_capacity(STDERR_TAIL_LINES),
            pending: Vec::new(),
        }
    }

    fn push(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            if byte == b'\n' || byte == b'\r' {
                self.flush();
            } else {
                self.pending.push(byte);
            }
        }
        if self.pending.len() > STDERR_PENDING_BYTES {
            let excess = self.pending.len() - STDERR_PENDING_BYTES;
            self.pending.drain(..excess);
        }
    }

    fn flush(&mut self) {
        if self.pending.is_empty() {
            return;
        }
        let decoded = String::from_utf8_lossy(&self.pending);
        let trimmed = decoded.trim();
        let skip = trimmed.chars().count().saturating_sub(STDERR_LINE_CHARS);
        let text: String = trimmed.chars().skip(skip).collect();
        self.pending.clear();
        if text.is_empty() {
            return;
        }
        debug!(role = self.role.as_str(), line = %text, "child stderr");
        if self.lines.len() == STDERR_TAIL_LINES {
            self.lines.pop_front();
        }
        self.lines.push_back(text);
    }

    fn finish(mut self) -> String {
        self.flush();
        Vec::from(self.lines).join("\n")
    }
}
