//! Worker process supervision.
//!
//! One call to [`Supervisor::execute`] owns one worker from spawn to a
//! terminal [`Outcome`]:
//!
//! `Idle -> Spawning -> Running -> {Succeeded | Failed | TimedOut}`
//!
//! The worker gets its own process group so a timeout or an operator stop
//! can kill everything it started. stdout/stderr are drained continuously
//! into bounded buffers that drop the oldest bytes past the cap. Nothing
//! here retries.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use toolgate_core::command::CommandLine;

/// Environment variable carrying the artifact directory to the worker.
pub const OUTPUT_DIR_ENV: &str = "TOOLGATE_OUTPUT_DIR";

const READ_CHUNK: usize = 8 * 1024;
/// How long to keep draining pipes after the worker is gone.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, utoipa::ToSchema)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ProcessState {
    Idle,
    Spawning,
    Running { pid: u32 },
    Succeeded,
    Failed,
    TimedOut,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Non-zero exit. `None` when the worker died from a signal.
    Exit(Option<i32>),
    Spawn(String),
    Timeout(Duration),
    Stopped,
}

#[derive(Debug, Clone)]
pub enum Outcome {
    Success {
        stdout: String,
        stderr: String,
    },
    Failure {
        reason: FailureReason,
        stdout: String,
        stderr: String,
    },
}

impl Outcome {
    pub fn stdout(&self) -> &str {
        match self {
            Outcome::Success { stdout, .. } | Outcome::Failure { stdout, .. } => stdout,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            Outcome::Success { stderr, .. } | Outcome::Failure { stderr, .. } => stderr,
        }
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Outcome::Success { .. } => Some(0),
            Outcome::Failure {
                reason: FailureReason::Exit(code),
                ..
            } => *code,
            Outcome::Failure { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    /// Wall-clock ceiling; `None` waits for natural exit
    pub timeout: Option<Duration>,
    /// Exported to the worker as [`OUTPUT_DIR_ENV`]
    pub artifact_dir: Option<PathBuf>,
}

/// Shared handle between the orchestrator and one running execution:
/// an operator stop signal in, lifecycle state out.
#[derive(Debug)]
pub struct ProcessControl {
    stop: CancellationToken,
    state: watch::Sender<ProcessState>,
}

impl Default for ProcessControl {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl {
    pub fn new() -> Self {
        let (state, _) = watch::channel(ProcessState::Idle);
        Self {
            stop: CancellationToken::new(),
            state,
        }
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop.clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state.subscribe()
    }

    #[cfg(test)]
    pub fn state(&self) -> ProcessState {
        *self.state.borrow()
    }

    /// Mark a run that ended before reaching the supervisor (lease refused, stop while queued).
    pub fn abandon(&self) {
        self.transition(ProcessState::Failed);
    }

    fn transition(&self, next: ProcessState) {
        let previous = self.state.send_replace(next);
        tracing::debug!(from = ?previous, to = ?next, "worker state transition");
    }
}

/// Append-only byte buffer that keeps the newest `cap` bytes.
#[derive(Debug)]
pub struct BoundedBuffer {
    cap: usize,
    bytes: VecDeque<u8>,
    dropped: usize,
}

impl BoundedBuffer {
    pub fn new(cap: usize) -> Self {
        Self {
            cap,
            bytes: VecDeque::new(),
            dropped: 0,
        }
    }

    pub fn push(&mut self, chunk: &[u8]) {
        let chunk = if chunk.len() > self.cap {
            self.dropped += chunk.len() - self.cap;
            &chunk[chunk.len() - self.cap..]
        } else {
            chunk
        };
        let overflow = (self.bytes.len() + chunk.len()).saturating_sub(self.cap);
        if overflow > 0 {
            self.bytes.drain(..overflow);
            self.dropped += overflow;
        }
        self.bytes.extend(chunk);
    }

    pub fn dropped(&self) -> usize {
        self.dropped
    }

    pub fn to_text(&self) -> String {
        let (head, tail) = self.bytes.as_slices();
        let mut raw = Vec::with_capacity(self.bytes.len());
        raw.extend_from_slice(head);
        raw.extend_from_slice(tail);
        let text = String::from_utf8_lossy(&raw);
        if self.dropped > 0 {
            format!("[{} earlier bytes dropped]\n{}", self.dropped, text)
        } else {
            text.into_owned()
        }
    }
}

enum Termination {
    Exited(std::io::Result<std::process::ExitStatus>),
    TimedOut(Duration),
    Stopped,
}

pub struct Supervisor {
    output_cap: usize,
    spawn_attempts: AtomicU64,
}

impl Supervisor {
    pub fn new(output_cap: usize) -> Self {
        Self {
            output_cap,
            spawn_attempts: AtomicU64::new(0),
        }
    }

    /// Number of times a worker launch was attempted since startup.
    pub fn spawn_attempts(&self) -> u64 {
        self.spawn_attempts.load(Ordering::Relaxed)
    }

    pub async fn execute(
        &self,
        command: &CommandLine,
        options: &ExecOptions,
        control: &ProcessControl,
    ) -> Outcome {
        let started = Instant::now();

        if control.stop.is_cancelled() {
            control.transition(ProcessState::Failed);
            return Outcome::Failure {
                reason: FailureReason::Stopped,
                stdout: String::new(),
                stderr: String::new(),
            };
        }

        control.transition(ProcessState::Spawning);
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = &command.working_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &command.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &options.artifact_dir {
            cmd.env(OUTPUT_DIR_ENV, dir);
        }
        #[cfg(unix)]
        cmd.process_group(0);

        self.spawn_attempts.fetch_add(1, Ordering::Relaxed);
        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(err) => {
                let reason = describe_spawn_error(&command.program, &err);
                tracing::error!(
                    program = %command.program,
                    error = %err,
                    "worker could not be started"
                );
                control.transition(ProcessState::Failed);
                return Outcome::Failure {
                    reason: FailureReason::Spawn(reason),
                    stdout: String::new(),
                    stderr: String::new(),
                };
            }
        };

        let pid = child.id().unwrap_or_default();
        control.transition(ProcessState::Running { pid });
        tracing::info!(pid, command = %command.display(), "worker started");

        let stdout = Arc::new(Mutex::new(BoundedBuffer::new(self.output_cap)));
        let stderr = Arc::new(Mutex::new(BoundedBuffer::new(self.output_cap)));
        let stdout_task = capture(child.stdout.take(), stdout.clone());
        let stderr_task = capture(child.stderr.take(), stderr.clone());

        let deadline = async {
            match options.timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    limit
                }
                None => std::future::pending().await,
            }
        };

        let termination = tokio::select! {
            status = child.wait() => Termination::Exited(status),
            limit = deadline => Termination::TimedOut(limit),
            _ = control.stop.cancelled() => Termination::Stopped,
        };

        if !matches!(termination, Termination::Exited(_)) {
            kill_tree(&mut child, pid).await;
        }

        let stdout = drain(stdout_task, &stdout).await;
        let mut stderr = drain(stderr_task, &stderr).await;
        let elapsed = started.elapsed();

        let (reason, state) = match termination {
            Termination::Exited(Ok(status)) if status.success() => {
                control.transition(ProcessState::Succeeded);
                tracing::info!(pid, elapsed_ms = elapsed.as_millis() as u64, "worker succeeded");
                return Outcome::Success { stdout, stderr };
            }
            Termination::Exited(Ok(status)) => {
                tracing::info!(pid, exit_code = ?status.code(), "worker exited with failure");
                (FailureReason::Exit(status.code()), ProcessState::Failed)
            }
            Termination::Exited(Err(err)) => {
                tracing::warn!(pid, error = %err, "failed to wait for worker");
                stderr.push_str(&format!("\n[gateway] wait failed: {err}"));
                (FailureReason::Exit(None), ProcessState::Failed)
            }
            Termination::TimedOut(limit) => {
                tracing::warn!(pid, limit_secs = limit.as_secs_f64(), "worker timed out and was killed");
                (FailureReason::Timeout(limit), ProcessState::TimedOut)
            }
            Termination::Stopped => {
                tracing::warn!(pid, "worker stopped by operator");
                (FailureReason::Stopped, ProcessState::Failed)
            }
        };

        control.transition(state);
        Outcome::Failure {
            reason,
            stdout,
            stderr,
        }
    }
}

fn describe_spawn_error(program: &str, err: &std::io::Error) -> String {
    match err.kind() {
        std::io::ErrorKind::NotFound => format!("worker program '{program}' was not found"),
        std::io::ErrorKind::PermissionDenied => {
            format!("permission denied starting worker program '{program}'")
        }
        _ => format!("worker program '{program}' could not be started: {err}"),
    }
}

fn capture<R>(stream: Option<R>, buffer: Arc<Mutex<BoundedBuffer>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let Some(mut stream) = stream else { return };
        let mut chunk = vec![0u8; READ_CHUNK];
        loop {
            match stream.read(&mut chunk).await {
                Ok(0) | Err(_) => break,
                Ok(n) => buffer
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .push(&chunk[..n]),
            }
        }
    })
}

/// Wait briefly for a reader to hit EOF, then take whatever was captured.
/// A descendant that escaped the process group can hold the pipe open forever.
async fn drain(mut task: JoinHandle<()>, buffer: &Mutex<BoundedBuffer>) -> String {
    if tokio::time::timeout(DRAIN_GRACE, &mut task).await.is_err() {
        task.abort();
    }
    let buffer = buffer.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    if buffer.dropped() > 0 {
        tracing::debug!(dropped = buffer.dropped(), "worker output exceeded the capture cap");
    }
    buffer.to_text()
}

async fn kill_tree(child: &mut Child, pid: u32) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(pid)
            && pgid > 0
        {
            // SAFETY: kill(2) has no memory-safety preconditions; the group id is our
            // own child's, created by process_group(0) at spawn.
            unsafe {
                libc::kill(-pgid, libc::SIGKILL);
            }
        }
    }
    #[cfg(not(unix))]
    let _ = pid;

    if let Err(err) = child.start_kill() {
        tracing::debug!(error = %err, "worker already gone when killed");
    }
    if let Err(err) = child.wait().await {
        tracing::warn!(error = %err, "failed to reap killed worker");
    }
}
