//! Per-process supervisor task.
//!
//! The supervisor owns the [`Child`] and is the only code that touches it.
//! It forwards parsed stdout lines, writes stdin lines on request, applies
//! terminate → force-kill escalation, and reports the exit exactly once,
//! after the output that preceded it.

use std::process::ExitStatus;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::codec::FramedRead;
use tracing::{debug, info, warn};

use crate::process::codec::NdjsonCodec;
use crate::process::parser::{parse_line, AgentLine};
use crate::{AppError, Result};

/// How long buffered stdout is still drained after the process exits.
pub const DRAIN_WINDOW: Duration = Duration::from_millis(500);

/// Messages from a supervisor to the runner that owns the process.
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessInput {
    /// A recognised stdout line.
    Line {
        /// Launch the line came from.
        generation: u64,
        /// Parsed line.
        line: AgentLine,
    },
    /// The process exited; always the last message for a generation.
    Exited {
        /// Launch that exited.
        generation: u64,
        /// Exit code, `None` when terminated by a signal.
        exit_code: Option<i32>,
    },
}

/// Requests from the runner to a supervisor.
#[derive(Debug)]
pub(crate) enum ProcessControl {
    Write(String),
    Terminate,
    Kill,
}

/// Runner-side handle to a supervised agent process.
#[derive(Debug)]
pub struct AgentProcess {
    generation: u64,
    pid: Option<u32>,
    control_tx: mpsc::UnboundedSender<ProcessControl>,
    task: JoinHandle<()>,
}

impl AgentProcess {
    pub(crate) fn new(
        generation: u64,
        pid: Option<u32>,
        control_tx: mpsc::UnboundedSender<ProcessControl>,
        task: JoinHandle<()>,
    ) -> Self {
        Self {
            generation,
            pid,
            control_tx,
            task,
        }
    }

    /// Launch counter this process was spawned with.
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// OS process id, if the platform reported one.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Whether the supervisor is still running (the process has not been reaped).
    #[must_use]
    pub fn is_running(&self) -> bool {
        !self.control_tx.is_closed()
    }

    /// Queue one NDJSON line for the process's stdin.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Spawn` if the process has already exited.
    pub fn write_line(&self, line: String) -> Result<()> {
        self.control_tx
            .send(ProcessControl::Write(line))
            .map_err(|_| AppError::Spawn("agent process is no longer running".into()))
    }

    /// Ask the process to exit; it is force-killed after the grace period.
    ///
    /// Idempotent, and a no-op once the process has exited.
    pub fn terminate(&self) {
        let _ = self.control_tx.send(ProcessControl::Terminate);
    }

    /// Force-kill the process immediately.
    pub fn kill(&self) {
        let _ = self.control_tx.send(ProcessControl::Kill);
    }

    /// Wait for the supervisor to finish, i.e. for the process to be reaped.
    pub async fn wait(self) {
        if let Err(err) = self.task.await {
            warn!(%err, "agent process supervisor task failed");
        }
    }
}

/// Everything the supervisor task takes ownership of.
pub(crate) struct Supervised {
    pub child: Child,
    pub stdout: ChildStdout,
    pub stderr: Option<ChildStderr>,
    pub stdin: Option<ChildStdin>,
    pub generation: u64,
    pub input_tx: mpsc::Sender<ProcessInput>,
    pub control_rx: mpsc::UnboundedReceiver<ProcessControl>,
    pub kill_grace: Duration,
}

/// Supervisor loop for one process.
pub(crate) async fn supervise(supervised: Supervised) {
    let Supervised {
        mut child,
        stdout,
        stderr,
        mut stdin,
        generation,
        input_tx,
        mut control_rx,
        kill_grace,
    } = supervised;

    if let Some(stderr) = stderr {
        tokio::spawn(drain_stderr(stderr));
    }

    // Dropped on EOF or a read error, so a still-writing agent sees EPIPE
    // rather than blocking on a full pipe.
    let mut lines = Some(FramedRead::new(stdout, NdjsonCodec::new()));
    let mut control_open = true;
    let mut kill_at: Option<Instant> = None;

    let exit_code = loop {
        let escalation = async move {
            match kill_at {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            status = child.wait() => break exit_code_of(status),

            item = next_item(&mut lines) => {
                if !handle_stdout_item(item, generation, &input_tx).await {
                    lines = None;
                }
            }

            control = control_rx.recv(), if control_open => match control {
                Some(ProcessControl::Write(line)) => {
                    if let Err(err) = write_stdin(&mut stdin, &line).await {
                        warn!(%err, "failed to write to agent stdin");
                        stdin = None;
                    }
                }
                Some(ProcessControl::Terminate) => {
                    if kill_at.is_none() {
                        // Closing stdin lets well-behaved CLIs exit on their own.
                        stdin = None;
                        request_terminate(&mut child);
                        kill_at = Some(Instant::now() + kill_grace);
                    }
                }
                Some(ProcessControl::Kill) => force_kill(&mut child),
                None => {
                    control_open = false;
                    if kill_at.is_none() {
                        request_terminate(&mut child);
                        kill_at = Some(Instant::now() + kill_grace);
                    }
                }
            },

            () = escalation => {
                warn!(grace = ?kill_grace, "agent did not exit within grace period, forcing kill");
                force_kill(&mut child);
                kill_at = None;
            }
        }
    };

    info!(exit_code, "agent process exited");

    if let Some(mut lines) = lines {
        let drain = async {
            while let Some(item) = lines.next().await {
                if !handle_stdout_item(Some(item), generation, &input_tx).await {
                    break;
                }
            }
        };
        if tokio::time::timeout(DRAIN_WINDOW, drain).await.is_err() {
            debug!("stdout still open after exit, abandoning drain");
        }
    }

    if input_tx
        .send(ProcessInput::Exited {
            generation,
            exit_code,
        })
        .await
        .is_err()
    {
        debug!("runner gone before exit could be delivered");
    }
}

async fn next_item(lines: &mut Option<FramedRead<ChildStdout, NdjsonCodec>>) -> Option<Result<String>> {
    match lines {
        Some(lines) => lines.next().await,
        None => std::future::pending().await,
    }
}

/// Forward one framed stdout item. Returns whether stdout is still open.
async fn handle_stdout_item(
    item: Option<Result<String>>,
    generation: u64,
    input_tx: &mpsc::Sender<ProcessInput>,
) -> bool {
    match item {
        None => {
            debug!("agent stdout closed");
            false
        }
        Some(Err(err)) => {
            warn!(%err, "agent stdout read error, no further output will be read");
            false
        }
        Some(Ok(raw)) => {
            match parse_line(&raw) {
                Ok(Some(line)) => {
                    if input_tx
                        .send(ProcessInput::Line { generation, line })
                        .await
                        .is_err()
                    {
                        debug!("runner gone, dropping agent output");
                    }
                }
                Ok(None) => {}
                Err(err) => debug!(%err, "dropping malformed agent line"),
            }
            true
        }
    }
}

async fn write_stdin(stdin: &mut Option<ChildStdin>, line: &str) -> Result<()> {
    let Some(pipe) = stdin.as_mut() else {
        return Err(AppError::Io("agent stdin is closed".into()));
    };
    let mut bytes = line.as_bytes().to_vec();
    bytes.push(b'\n');
    pipe.write_all(&bytes).await?;
    pipe.flush().await?;
    Ok(())
}

async fn drain_stderr(stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => debug!(stderr = line.as_str(), "agent stderr"),
            Ok(None) => break,
            Err(err) => {
                debug!(%err, "agent stderr read failed");
                break;
            }
        }
    }
}

fn exit_code_of(status: std::io::Result<ExitStatus>) -> Option<i32> {
    match status {
        Ok(status) => status.code(),
        Err(err) => {
            warn!(%err, "error waiting for agent process");
            None
        }
    }
}

#[cfg(unix)]
fn request_terminate(child: &mut Child) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    // No pid means the child has already been reaped.
    let Some(raw) = child.id().and_then(|raw| i32::try_from(raw).ok()) else {
        return;
    };
    if let Err(err) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
        warn!(%err, "SIGTERM failed, forcing kill");
        force_kill(child);
    }
}

/// Whether a process with this pid currently exists.
///
/// Sends no signal. A pid the OS has since reused reports `true`.
#[cfg(unix)]
#[must_use]
pub fn process_exists(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    // EPERM: alive, owned by another user.
    matches!(kill(Pid::from_raw(raw), None), Ok(()) | Err(Errno::EPERM))
}

/// Whether a process with this pid currently exists. Always `false` where
/// liveness cannot be probed.
#[cfg(not(unix))]
#[must_use]
pub fn process_exists(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
fn request_terminate(child: &mut Child) {
    force_kill(child);
}

fn force_kill(child: &mut Child) {
    if let Err(err) = child.start_kill() {
        debug!(%err, "force kill failed (process likely exited)");
    }
}
