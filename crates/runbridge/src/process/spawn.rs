// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::io::Write;
use std::process::Stdio;
use std::time::Duration;

use bytes::Bytes;
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{ExitStatus, ProcessError, ProcessEvent, ProcessEventKind, ProcessInput, ProcessSpec};
use crate::mux;

/// A freshly spawned interpreter whose pipes are not yet wired up.
pub struct Process {
    child: Child,
    pid: u32,
    stdin: ChildStdin,
    stdout: ChildStdout,
    stderr: ChildStderr,
    script: NamedTempFile,
}

/// Timing and queue limits applied to a started process.
#[derive(Debug, Clone, Copy)]
pub struct StartOptions {
    /// Time between SIGTERM and SIGKILL when killing.
    pub kill_grace: Duration,
    /// How long a pipe may stay silent after exit before its reader stops.
    pub drain_timeout: Duration,
    /// Pending stdin writes before `write` reports backpressure.
    pub input_queue: usize,
}

impl Process {
    /// Write `source` to a temporary script and start the interpreter on it.
    ///
    /// The child is placed in its own process group so the whole tree can be
    /// signalled, and is killed if the handle is dropped without being reaped.
    pub async fn spawn(spec: &ProcessSpec, source: impl Into<String>) -> Result<Self, ProcessError> {
        let source = source.into();
        let suffix = spec.script_suffix.clone();
        let script = tokio::task::spawn_blocking(move || write_script(&suffix, &source))
            .await
            .map_err(|e| ProcessError::Script(std::io::Error::other(e)))??;

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .arg(script.path())
            .envs(spec.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(true);
        if let Some(ref dir) = spec.workdir {
            cmd.current_dir(dir);
        }

        let spawn_err =
            |source: std::io::Error| ProcessError::Spawn { program: spec.program.clone(), source };
        let mut child = cmd.spawn().map_err(spawn_err)?;
        let pid = child.id().ok_or_else(|| spawn_err(std::io::Error::other("no pid")))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(spawn_err(std::io::Error::other("missing stdio pipe")));
        };

        Ok(Self { child, pid, stdin, stdout, stderr, script })
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Wire up the pipes and supervise the process until it exits.
    ///
    /// Output and the final [`ProcessEventKind::Exited`] are delivered on
    /// `events` tagged with `run_id`. The exit event is sent exactly once,
    /// after both output streams have been drained.
    pub fn start(
        self,
        run_id: u64,
        events: mpsc::Sender<ProcessEvent>,
        opts: StartOptions,
    ) -> ProcessHandle {
        let Process { mut child, pid, stdin, stdout, stderr, script } = self;
        let (input_tx, input_rx) = mpsc::channel(opts.input_queue.max(1));
        let kill = CancellationToken::new();

        let readers =
            mux::spawn_readers(run_id, stdout, stderr, events.clone(), opts.drain_timeout);
        let writer = tokio::spawn(pump_stdin(run_id, stdin, input_rx, events.clone()));

        let token = kill.clone();
        tokio::spawn(async move {
            let status = supervise(&mut child, pid, &token, opts.kill_grace).await;
            writer.abort();
            // Background children may still hold the pipes open.
            signal_group(pid, Signal::SIGKILL);
            readers.drain().await;
            drop(script);
            debug!(run = run_id, pid, code = ?status.code, signal = ?status.signal, "process reaped");
            let _ = events.send(ProcessEvent::exited(run_id, status)).await;
        });

        ProcessHandle { run_id, pid, input_tx, kill }
    }
}

fn write_script(suffix: &str, source: &str) -> Result<NamedTempFile, ProcessError> {
    let mut script = tempfile::Builder::new()
        .prefix("runbridge-")
        .suffix(suffix)
        .tempfile()
        .map_err(ProcessError::Script)?;
    script.write_all(source.as_bytes()).map_err(ProcessError::Script)?;
    script.flush().map_err(ProcessError::Script)?;
    Ok(script)
}

/// Owning handle to a started process. Holds the only stdin sender.
///
/// Dropping the handle kills the process.
#[derive(Debug)]
pub struct ProcessHandle {
    run_id: u64,
    pid: u32,
    input_tx: mpsc::Sender<ProcessInput>,
    kill: CancellationToken,
}

impl ProcessHandle {
    pub fn run_id(&self) -> u64 {
        self.run_id
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    /// Queue bytes for stdin. Writes are applied in call order.
    pub fn write(&self, data: Bytes) -> Result<(), ProcessError> {
        if data.is_empty() {
            return Ok(());
        }
        self.send(ProcessInput::Write(data))
    }

    /// Signal end-of-input once queued writes are flushed.
    pub fn close_stdin(&self) -> Result<(), ProcessError> {
        self.send(ProcessInput::Close)
    }

    /// Request termination. Returns `true` only for the first call. Killing a
    /// process that already exited has no effect.
    pub fn kill(&self) -> bool {
        if self.kill.is_cancelled() {
            return false;
        }
        self.kill.cancel();
        true
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_cancelled()
    }

    fn send(&self, input: ProcessInput) -> Result<(), ProcessError> {
        self.input_tx.try_send(input).map_err(|e| match e {
            TrySendError::Full(_) => ProcessError::InputBackpressure,
            TrySendError::Closed(_) => ProcessError::StdinClosed,
        })
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        self.kill.cancel();
    }
}

/// Wait for the child, or terminate it once `kill` fires.
async fn supervise(
    child: &mut Child,
    pid: u32,
    kill: &CancellationToken,
    grace: Duration,
) -> ExitStatus {
    let waited = tokio::select! {
        result = child.wait() => Some(result),
        _ = kill.cancelled() => None,
    };
    let result = match waited {
        Some(result) => result,
        None => terminate(child, pid, grace).await,
    };
    match result {
        Ok(status) => status.into(),
        Err(e) => {
            warn!(pid, err = %e, "failed to wait for process");
            ExitStatus::default()
        }
    }
}

/// SIGTERM the process group, escalating to SIGKILL after `grace`.
async fn terminate(
    child: &mut Child,
    pid: u32,
    grace: Duration,
) -> std::io::Result<std::process::ExitStatus> {
    signal_group(pid, Signal::SIGTERM);
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(result) => result,
        Err(_) => {
            debug!(pid, "grace period elapsed, sending SIGKILL");
            signal_group(pid, Signal::SIGKILL);
            let _ = child.start_kill();
            child.wait().await
        }
    }
}

/// Signal every process in the group led by `pid`. A group that no longer
/// exists is not an error.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    match killpg(Pid::from_raw(raw), signal) {
        Ok(()) | Err(Errno::ESRCH) => {}
        Err(e) => warn!(pid, ?signal, err = %e, "killpg failed"),
    }
}

async fn pump_stdin(
    run_id: u64,
    mut stdin: ChildStdin,
    mut input_rx: mpsc::Receiver<ProcessInput>,
    events: mpsc::Sender<ProcessEvent>,
) {
    while let Some(input) = input_rx.recv().await {
        let data = match input {
            ProcessInput::Write(data) => data,
            ProcessInput::Close => break,
        };
        let result = match stdin.write_all(&data).await {
            Ok(()) => stdin.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            debug!(run = run_id, err = %e, "stdin write failed");
            let event = ProcessEvent {
                run_id,
                kind: ProcessEventKind::WriteFailed { message: format!("write to stdin failed: {e}") },
            };
            let _ = events.send(event).await;
            return;
        }
    }
}

#[cfg(test)]
#[path = "spawn_tests.rs"]
mod tests;
